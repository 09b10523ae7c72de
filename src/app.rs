use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use crate::bridge::DispatchTarget;
use crate::cli::CliOptions;
use crate::config::BridgeConfig;
use crate::runtime::ScriptRuntime;
use crate::watch::ScriptWatcher;

const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Loads the configured classes and runs the commands requested on the command line.
pub fn run(options: CliOptions) -> Result<()> {
    let mut config = match &options.config {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::default(),
    };
    let overrides = options.config_overrides();
    if !overrides.is_empty() {
        info!("Applying CLI overrides: {}", overrides.applied_fields().join(", "));
        config.apply_overrides(&overrides);
    }

    let runtime = ScriptRuntime::new(config);
    if let Err(failures) = runtime.load_classes() {
        warn!("{} class(es) failed to load", failures.len());
    }

    for &index in &options.reload {
        runtime.reload_class(index).with_context(|| format!("reloading class {index}"))?;
    }

    if options.list {
        for (index, identity) in runtime.class_identities().iter().enumerate() {
            println!("{index:>3}  {identity}");
        }
    }

    for (class, callback) in &options.dispatch {
        let index = runtime.class_index(class).ok_or_else(|| anyhow!("class '{class}' is not loaded"))?;
        let outcome = runtime.dispatch(&DispatchTarget::class(index), callback, &[]);
        println!("{class}:{callback} handled={} result={:?}", outcome.handled, outcome.result);
    }

    if runtime.config().watch {
        let seconds = options.watch_seconds.unwrap_or(0);
        watch_for(&runtime, Duration::from_secs(seconds))?;
    }

    runtime.shutdown();
    Ok(())
}

fn watch_for(runtime: &ScriptRuntime, duration: Duration) -> Result<()> {
    let mut watcher = ScriptWatcher::new()?;
    watcher.watch_root(&runtime.config().script_root)?;
    info!("Watching {} for {}s", runtime.config().script_root.display(), duration.as_secs());
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        let changes = watcher.drain_changes();
        if !changes.is_empty() {
            for (index, outcome) in runtime.reload_changed(&changes) {
                match outcome {
                    Ok(true) => info!("class {index} hot-reloaded"),
                    Ok(false) => {}
                    Err(err) => warn!("class {index} failed to hot-reload: {err}"),
                }
            }
        }
        thread::sleep(WATCH_POLL_INTERVAL);
    }
    Ok(())
}
