//! Structural mutators for valued state: shallow `merge` and `add`.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::rc::Rc;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeDelta, Timelike, Utc};
use indexmap::IndexMap;

use crate::mutable_state::MutableState;

/// Shallow merge of keyed entries.
///
/// `merged` returns `None` when every entry already holds an equal value, so
/// callers can keep the original container (and its identity).
pub trait Merge: Sized {
    type Key;
    type Value;

    fn merged<I>(&self, entries: I) -> Option<Self>
    where
        I: IntoIterator<Item = (Self::Key, Self::Value)>;
}

macro_rules! merge_map_entries {
    () => {
        fn merged<I>(&self, entries: I) -> Option<Self>
        where
            I: IntoIterator<Item = (Self::Key, Self::Value)>,
        {
            let mut next: Option<Self> = None;
            for (key, value) in entries {
                if self.get(&key) == Some(&value) {
                    continue;
                }
                next.get_or_insert_with(|| self.clone()).insert(key, value);
            }
            next
        }
    };
}

impl<K, V, S> Merge for std::collections::HashMap<K, V, S>
where
    K: Eq + Hash + Clone,
    V: PartialEq + Clone,
    S: BuildHasher + Clone,
{
    type Key = K;
    type Value = V;
    merge_map_entries!();
}

impl<K, V, S> Merge for hashbrown::HashMap<K, V, S>
where
    K: Eq + Hash + Clone,
    V: PartialEq + Clone,
    S: BuildHasher + Clone,
{
    type Key = K;
    type Value = V;
    merge_map_entries!();
}

impl<K, V, S> Merge for IndexMap<K, V, S>
where
    K: Eq + Hash + Clone,
    V: PartialEq + Clone,
    S: BuildHasher + Clone,
{
    type Key = K;
    type Value = V;
    merge_map_entries!();
}

impl<K, V> Merge for BTreeMap<K, V>
where
    K: Ord + Clone,
    V: PartialEq + Clone,
{
    type Key = K;
    type Value = V;
    merge_map_entries!();
}

/// Index-keyed merge. An index at or past the end appends the value.
impl<T: PartialEq + Clone> Merge for Vec<T> {
    type Key = usize;
    type Value = T;

    fn merged<I>(&self, entries: I) -> Option<Self>
    where
        I: IntoIterator<Item = (usize, T)>,
    {
        let mut next: Option<Self> = None;
        for (index, value) in entries {
            if self.get(index) == Some(&value) {
                continue;
            }
            let next = next.get_or_insert_with(|| self.clone());
            match next.get_mut(index) {
                Some(slot) => *slot = value,
                None => next.push(value),
            }
        }
        next
    }
}

impl<M: Merge> Merge for Rc<M> {
    type Key = M::Key;
    type Value = M::Value;

    fn merged<I>(&self, entries: I) -> Option<Self>
    where
        I: IntoIterator<Item = (Self::Key, Self::Value)>,
    {
        M::merged(self, entries).map(Rc::new)
    }
}

/// Result of an `add` that left the representable range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutOfRange;

impl fmt::Display for OutOfRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "value out of range after add")
    }
}

impl std::error::Error for OutOfRange {}

/// Additive step of a state value: a number for numbers, a duration for
/// dates.
pub trait Advance<By>: Sized {
    fn advanced(&self, by: By) -> Result<Self, OutOfRange>;
}

macro_rules! impl_advance_int {
    ($($t:ty),* $(,)?) => {
        $(
            impl Advance<$t> for $t {
                fn advanced(&self, by: $t) -> Result<Self, OutOfRange> {
                    self.checked_add(by).ok_or(OutOfRange)
                }
            }
        )*
    };
}

impl_advance_int!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

impl Advance<f32> for f32 {
    fn advanced(&self, by: f32) -> Result<Self, OutOfRange> {
        Ok(self + by)
    }
}

impl Advance<f64> for f64 {
    fn advanced(&self, by: f64) -> Result<Self, OutOfRange> {
        Ok(self + by)
    }
}

/// Calendar offset applied field by field. Each field may overflow into the
/// next larger one: January 31st plus one month is March 3rd (or 2nd in a
/// leap year), and 90 minutes is one hour and a half.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CalendarDuration {
    pub years: i64,
    pub months: i64,
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
    pub milliseconds: i64,
}

impl CalendarDuration {
    pub fn years(years: i64) -> Self {
        Self {
            years,
            ..Self::default()
        }
    }

    pub fn months(months: i64) -> Self {
        Self {
            months,
            ..Self::default()
        }
    }

    pub fn days(days: i64) -> Self {
        Self {
            days,
            ..Self::default()
        }
    }

    pub fn milliseconds(milliseconds: i64) -> Self {
        Self {
            milliseconds,
            ..Self::default()
        }
    }

    fn apply(&self, at: &NaiveDateTime) -> Option<NaiveDateTime> {
        let months = (i64::from(at.year()) * 12 + i64::from(at.month0()))
            .checked_add(self.years.checked_mul(12)?)?
            .checked_add(self.months)?;
        let year = i32::try_from(months.div_euclid(12)).ok()?;
        let month = u32::try_from(months.rem_euclid(12)).ok()? + 1;
        let start = NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;

        let days = i64::from(at.day() - 1).checked_add(self.days)?;
        let hours = i64::from(at.hour()).checked_add(self.hours)?;
        let minutes = i64::from(at.minute()).checked_add(self.minutes)?;
        let seconds = i64::from(at.second()).checked_add(self.seconds)?;
        let offset = TimeDelta::try_days(days)?
            .checked_add(&TimeDelta::try_hours(hours)?)?
            .checked_add(&TimeDelta::try_minutes(minutes)?)?
            .checked_add(&TimeDelta::try_seconds(seconds)?)?
            .checked_add(&TimeDelta::try_milliseconds(self.milliseconds)?)?
            .checked_add(&TimeDelta::nanoseconds(i64::from(at.nanosecond())))?;
        start.checked_add_signed(offset)
    }
}

impl Advance<CalendarDuration> for NaiveDateTime {
    fn advanced(&self, by: CalendarDuration) -> Result<Self, OutOfRange> {
        by.apply(self).ok_or(OutOfRange)
    }
}

impl Advance<CalendarDuration> for DateTime<Utc> {
    fn advanced(&self, by: CalendarDuration) -> Result<Self, OutOfRange> {
        by.apply(&self.naive_utc())
            .map(|naive| naive.and_utc())
            .ok_or(OutOfRange)
    }
}

impl Advance<TimeDelta> for NaiveDateTime {
    fn advanced(&self, by: TimeDelta) -> Result<Self, OutOfRange> {
        self.checked_add_signed(by).ok_or(OutOfRange)
    }
}

impl Advance<TimeDelta> for DateTime<Utc> {
    fn advanced(&self, by: TimeDelta) -> Result<Self, OutOfRange> {
        self.checked_add_signed(by).ok_or(OutOfRange)
    }
}

impl<T: Merge + Clone + PartialEq + 'static> MutableState<T> {
    /// Writes the merged container, or nothing when no entry differs.
    pub fn merge<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (T::Key, T::Value)>,
    {
        let next = self.with(|current| current.merged(entries));
        if let Some(next) = next {
            self.set(next);
        }
    }
}

impl<T: Clone + PartialEq + 'static> MutableState<T> {
    pub fn add<By>(&self, by: By) -> Result<(), OutOfRange>
    where
        T: Advance<By>,
    {
        let next = self.with(|current| current.advanced(by))?;
        self.set(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;
    use std::cell::Cell;

    fn at(y: i32, m: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(h, mi, 0))
            .expect("valid test date")
    }

    #[test]
    fn merging_equal_entries_keeps_the_same_rc() {
        let (runtime, _) = Runtime::manual();
        let map: Rc<BTreeMap<&str, i32>> = Rc::new(BTreeMap::from([("a", 1)]));
        let state = runtime.state(Rc::clone(&map));
        let hits = Rc::new(Cell::new(0));
        {
            let hits = Rc::clone(&hits);
            let _ = crate::Observable::subscribe(&state, move |_| hits.set(hits.get() + 1));
        }

        state.merge([("a", 1)]);
        assert!(Rc::ptr_eq(&state.get(), &map));
        assert_eq!(hits.get(), 0);

        state.merge([("a", 1), ("b", 2)]);
        let merged = state.get();
        assert!(!Rc::ptr_eq(&merged, &map));
        assert_eq!(*merged, BTreeMap::from([("a", 1), ("b", 2)]));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn vec_merge_replaces_by_index_and_appends_past_the_end() {
        let items = vec!['a', 'b'];
        assert_eq!(items.merged([(0, 'a')]), None);
        assert_eq!(items.merged([(1, 'x'), (7, 'z')]), Some(vec!['a', 'x', 'z']));
    }

    #[test]
    fn adding_twice_accumulates() {
        let (runtime, _) = Runtime::manual();
        let state = runtime.state(0i32);
        state.add(1i32).expect("in range");
        state.add(1i32).expect("in range");
        assert_eq!(state.get(), 2);
    }

    #[test]
    fn integer_overflow_leaves_the_state_untouched() {
        let (runtime, _) = Runtime::manual();
        let state = runtime.state(u8::MAX);
        assert_eq!(state.add(1u8), Err(OutOfRange));
        assert_eq!(state.get(), u8::MAX);
    }

    #[test]
    fn calendar_fields_overflow_into_larger_units() {
        let end_of_january = at(2023, 1, 31, 12, 0);
        assert_eq!(
            end_of_january.advanced(CalendarDuration::months(1)),
            Ok(at(2023, 3, 3, 12, 0))
        );

        let late = at(2023, 12, 31, 23, 30);
        let step = CalendarDuration {
            minutes: 45,
            ..CalendarDuration::default()
        };
        assert_eq!(late.advanced(step), Ok(at(2024, 1, 1, 0, 15)));

        assert_eq!(
            at(2024, 3, 1, 0, 0).advanced(CalendarDuration::days(-1)),
            Ok(at(2024, 2, 29, 0, 0))
        );
        assert_eq!(
            at(2024, 2, 29, 0, 0).advanced(CalendarDuration::years(1)),
            Ok(at(2025, 3, 1, 0, 0))
        );
    }

    #[test]
    fn oversized_calendar_fields_are_out_of_range() {
        let start = at(2020, 5, 1, 8, 0);
        for step in [
            CalendarDuration::months(i64::MAX),
            CalendarDuration::days(i64::MAX),
            CalendarDuration {
                hours: i64::MAX,
                ..CalendarDuration::default()
            },
            CalendarDuration {
                seconds: i64::MAX,
                ..CalendarDuration::default()
            },
        ] {
            assert_eq!(start.advanced(step), Err(OutOfRange), "{step:?}");
        }
    }

    #[test]
    fn utc_dates_accept_time_deltas() {
        let start = at(2020, 5, 1, 8, 0).and_utc();
        let later = start.advanced(TimeDelta::minutes(90)).expect("in range");
        assert_eq!(later.naive_utc(), at(2020, 5, 1, 9, 30));
    }
}
