use anyhow::{bail, Context, Result};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use tracing::warn;

pub const SCRIPT_EXTENSION: &str = "rhai";

/// Watches script directories. notify delivers events on its own thread; they queue in a channel
/// until the owner calls [`ScriptWatcher::drain_changes`].
pub struct ScriptWatcher {
    watcher: RecommendedWatcher,
    events: Receiver<notify::Result<Event>>,
    roots: Vec<PathBuf>,
}

impl ScriptWatcher {
    pub fn new() -> Result<Self> {
        let (tx, events) = channel::<notify::Result<Event>>();
        let watcher = notify::recommended_watcher(tx).context("create script watcher")?;
        Ok(Self { watcher, events, roots: Vec::new() })
    }

    /// Watches every script below `root`. Watching the same directory twice is a no-op.
    pub fn watch_root(&mut self, root: impl AsRef<Path>) -> Result<()> {
        let root = root.as_ref();
        if !root.is_dir() {
            bail!("script root '{}' is not a directory", root.display());
        }
        let root = resolve_path(root);
        if self.roots.contains(&root) {
            return Ok(());
        }
        self.watcher.watch(&root, RecursiveMode::Recursive).with_context(|| format!("watch {}", root.display()))?;
        self.roots.push(root);
        Ok(())
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Script files touched since the last drain, deduplicated.
    pub fn drain_changes(&mut self) -> Vec<PathBuf> {
        let events = self.events.try_iter().filter_map(|event| match event {
            Ok(event) => Some(event),
            Err(err) => {
                warn!(target: "script", "script watcher error: {err}");
                None
            }
        });
        script_changes(events, &self.roots)
    }
}

/// Paths of scripts under `roots` that were created, rewritten or renamed by `events`.
pub fn script_changes(events: impl IntoIterator<Item = Event>, roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut changed = BTreeSet::new();
    for event in events {
        if !touches_content(&event.kind) {
            continue;
        }
        for path in event.paths.iter().filter(|path| is_script_path(path)) {
            let path = resolve_path(path);
            if roots.iter().any(|root| path.starts_with(root)) {
                changed.insert(path);
            }
        }
    }
    changed.into_iter().collect()
}

fn touches_content(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) => true,
        EventKind::Modify(modify) => matches!(modify, ModifyKind::Data(_) | ModifyKind::Name(_) | ModifyKind::Any),
        _ => false,
    }
}

pub fn is_script_path(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()).map_or(false, |ext| ext.eq_ignore_ascii_case(SCRIPT_EXTENSION))
}

// A file reported by a rename may already be gone, so fall back to resolving its directory.
fn resolve_path(path: &Path) -> PathBuf {
    if let Ok(resolved) = fs::canonicalize(path) {
        return resolved;
    }
    match (path.parent().and_then(|parent| fs::canonicalize(parent).ok()), path.file_name()) {
        (Some(parent), Some(name)) => parent.join(name),
        _ => path.to_path_buf(),
    }
}
