//! Tree cache keyed by a sequence of keys, one tree level per key element.

use std::hash::Hash;

use crate::collections::map::HashMap;
use crate::hash::hash_one;

pub struct CacheNode<K, V> {
    payload: Option<V>,
    children: HashMap<K, CacheNode<K, V>>,
}

impl<K, V> CacheNode<K, V> {
    fn new() -> Self {
        Self {
            payload: None,
            children: HashMap::default(),
        }
    }

    pub fn value(&self) -> Option<&V> {
        self.payload.as_ref()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// No payload and no children.
    pub fn is_empty(&self) -> bool {
        self.payload.is_none() && self.children.is_empty()
    }
}

pub struct KeyedCache<K, V> {
    root: CacheNode<K, V>,
    // Handed out on every lookup miss; never written to.
    empty: CacheNode<K, V>,
}

impl<K: Eq + Hash + Clone, V> Default for KeyedCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone, V> KeyedCache<K, V> {
    pub fn new() -> Self {
        Self {
            root: CacheNode::new(),
            empty: CacheNode::new(),
        }
    }

    /// The node at `path`, or the shared empty node when the path is absent.
    pub fn node(&self, path: &[K]) -> &CacheNode<K, V> {
        let mut node = &self.root;
        for key in path {
            match node.children.get(key) {
                Some(child) => node = child,
                None => return &self.empty,
            }
        }
        node
    }

    pub fn empty_node(&self) -> &CacheNode<K, V> {
        &self.empty
    }

    pub fn get(&self, path: &[K]) -> Option<&V> {
        self.node(path).value()
    }

    pub fn get_mut(&mut self, path: &[K]) -> Option<&mut V> {
        let mut node = &mut self.root;
        for key in path {
            node = node.children.get_mut(key)?;
        }
        node.payload.as_mut()
    }

    /// Stores `value` at `path`, returning the payload it replaced.
    pub fn set(&mut self, path: &[K], value: V) -> Option<V> {
        self.node_mut(path).payload.replace(value)
    }

    pub fn get_or_insert_with(&mut self, path: &[K], f: impl FnOnce() -> V) -> &mut V {
        self.node_mut(path).payload.get_or_insert_with(f)
    }

    fn node_mut(&mut self, path: &[K]) -> &mut CacheNode<K, V> {
        let mut node = &mut self.root;
        for key in path {
            node = node
                .children
                .entry(key.clone())
                .or_insert_with(CacheNode::new);
        }
        node
    }

    /// Removes the payload at `path`. Entries stored deeper under the same
    /// path survive; nodes left with neither payload nor children are pruned.
    pub fn delete(&mut self, path: &[K]) -> Option<V> {
        fn remove<K: Eq + Hash, V>(node: &mut CacheNode<K, V>, path: &[K]) -> Option<V> {
            let Some((first, rest)) = path.split_first() else {
                return node.payload.take();
            };
            let child = node.children.get_mut(first)?;
            let removed = remove(child, rest);
            if child.is_empty() {
                node.children.remove(first);
            }
            removed
        }
        remove(&mut self.root, path)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn clear(&mut self) {
        self.root = CacheNode::new();
    }
}

/// Turns an argument tuple into a key path for a [`KeyedCache`], one hash
/// per element. Equal arguments always produce equal paths; distinct
/// arguments may collide, so callers compare the arguments themselves at the
/// terminal node.
pub trait ArgKey {
    fn key_path(&self) -> Vec<u64>;
}

impl ArgKey for () {
    fn key_path(&self) -> Vec<u64> {
        Vec::new()
    }
}

macro_rules! impl_arg_key_scalar {
    ($($t:ty),* $(,)?) => {
        $(
            impl ArgKey for $t {
                fn key_path(&self) -> Vec<u64> {
                    vec![hash_one(self)]
                }
            }
        )*
    };
}

impl_arg_key_scalar!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, String,
    &'static str
);

impl<T: Hash> ArgKey for Option<T> {
    fn key_path(&self) -> Vec<u64> {
        vec![hash_one(self)]
    }
}

impl<T: Hash> ArgKey for Vec<T> {
    fn key_path(&self) -> Vec<u64> {
        self.iter().map(hash_one).collect()
    }
}

macro_rules! impl_arg_key_tuple {
    ($($name:ident),+) => {
        impl<$($name: Hash),+> ArgKey for ($($name,)+) {
            #[allow(non_snake_case)]
            fn key_path(&self) -> Vec<u64> {
                let ($($name,)+) = self;
                vec![$(hash_one($name)),+]
            }
        }
    };
}

impl_arg_key_tuple!(A);
impl_arg_key_tuple!(A, B);
impl_arg_key_tuple!(A, B, C);
impl_arg_key_tuple!(A, B, C, D);
impl_arg_key_tuple!(A, B, C, D, E);
impl_arg_key_tuple!(A, B, C, D, E, F);
