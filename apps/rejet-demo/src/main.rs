use anyhow::Context as _;
use rejet_core::{
    Action, ActionContext, ActionError, Observable, RuntimeHandle, SelectorError, Selection,
};
use rejet_runtime_std::StdRuntime;

const CATALOGUE: &[&str] = &["rejet", "reqwest", "regex", "rayon", "serde", "tokio"];
const SEARCH_LATENCY_MS: u64 = 40;
const TYPING_INTERVAL_MS: u64 = 15;
const DEBOUNCE_MS: u64 = 30;

fn lookup(handle: &RuntimeHandle, query: String) -> Selection<Vec<&'static str>> {
    if query.is_empty() {
        return Selection::Ready(Vec::new());
    }
    let handle = handle.clone();
    Selection::pending(async move {
        handle.delay(SEARCH_LATENCY_MS).await;
        if query.contains('!') {
            return Err(SelectorError::new(anyhow::anyhow!("invalid query {query:?}")));
        }
        Ok(CATALOGUE
            .iter()
            .copied()
            .filter(|name| name.starts_with(query.as_str()))
            .collect())
    })
}

/// `ActionError` is not `Send`; carry its message into `anyhow` instead.
fn settled<T>(outcome: Result<T, ActionError>) -> anyhow::Result<T> {
    outcome.map_err(|error| anyhow::anyhow!("{error}"))
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("=== rejet demo ===");
    println!("  - an epic counting clicks until it is cancelled");
    println!("  - a debounced search box feeding an async computed value");

    let std_runtime = StdRuntime::new();
    let runtime = std_runtime.runtime();

    let clicks = runtime.state(0u32);
    let click: Action<&'static str, &'static str> = Action::passthrough(&runtime);
    let epic = {
        let (click, clicks) = (click.clone(), clicks.clone());
        runtime.async_action(move |ctx: ActionContext<()>, ()| {
            let (click, clicks) = (click.clone(), clicks.clone());
            async move {
                while !ctx.is_cancelled() {
                    let button = ctx.watch(&click).await?;
                    ctx.add(&clicks, 1u32)?;
                    log::info!("clicked {button}");
                }
                Ok(())
            }
        })
    };
    let counting = epic.call(());
    for button in ["left", "right", "left"] {
        settled(click.call(button))?;
        std_runtime.run_until_idle();
    }
    counting.cancel();
    settled(std_runtime.block_on(counting).context("epic never settled")?)?;
    println!("clicks counted by the epic: {}", clicks.get());

    let query = runtime.state(String::new());
    let results = {
        let (query, handle) = (query.clone(), runtime.handle());
        runtime.async_computed(move |tracker| lookup(&handle, tracker.get(&query)))
    };
    let watched = results.clone();
    let _log_results = results.subscribe(move |_| match watched.loadable().value() {
        Some(found) => log::info!("search settled: {found:?}"),
        None => log::debug!("search changed: {:?}", watched.loadable().status()),
    });

    let type_query = {
        let query = query.clone();
        runtime.async_action(move |ctx: ActionContext<()>, text: &'static str| {
            let query = query.clone();
            async move {
                let search = {
                    let query = query.clone();
                    let writer = ctx.clone();
                    ctx.debounce(DEBOUNCE_MS, move |typed: String| {
                        if let Err(error) = writer.set(&query, typed) {
                            log::debug!("search skipped: {error}");
                        }
                    })?
                };
                let mut typed = String::new();
                for letter in text.chars() {
                    typed.push(letter);
                    search.call(typed.clone());
                    ctx.delay(TYPING_INTERVAL_MS).await?;
                }
                ctx.delay(DEBOUNCE_MS).await?;
                Ok(())
            }
        })
    };
    settled(
        std_runtime
            .block_on(type_query.call("re"))
            .context("typing never settled")?,
    )?;
    let found = std_runtime
        .block_on({
            let results = results.clone();
            async move { results.resolve(&()).await }
        })
        .context("search never settled")?
        .map_err(|error| anyhow::anyhow!("{error}"))?;
    println!("results for {:?}: {found:?}", query.get());

    let failing = runtime.action(|ctx: &ActionContext<()>, ()| {
        ctx.call(|| ())?;
        Err(ActionError::msg("demonstrating a failed action"))
    });
    if let Err(error) = failing.call(()) {
        println!("failed action reported: {error}");
    }

    println!("final loadable status: {:?}", results.loadable().status());
    Ok(())
}
