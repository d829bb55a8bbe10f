//! Where change notifications come from.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace};

use crate::error::WatchError;

/// A subscription-based source of file change notifications.
///
/// `subscribe` replaces the whole watched set; each notification carries the
/// changed path.
pub trait ChangeSource: Send + 'static {
    fn subscribe(&mut self, paths: &BTreeSet<PathBuf>, sink: UnboundedSender<PathBuf>) -> Result<(), WatchError>;

    fn unsubscribe(&mut self) -> Result<(), WatchError>;
}

#[derive(Debug, Default)]
struct Subscription {
    paths: BTreeSet<PathBuf>,
    sink: Option<UnboundedSender<PathBuf>>,
}

impl Subscription {
    fn deliver(&self, path: &Path) -> bool {
        match &self.sink {
            Some(sink) if self.paths.contains(path) => sink.send(path.to_path_buf()).is_ok(),
            _ => false,
        }
    }
}

/// Native file watching through `notify`.
///
/// Watches the parent directory of every path non-recursively, so editors
/// that save by rename are still seen, and forwards only events on
/// subscribed paths.
pub struct NotifySource {
    watcher: RecommendedWatcher,
    directories: BTreeSet<PathBuf>,
    subscription: Arc<Mutex<Subscription>>,
}

impl NotifySource {
    pub fn new() -> Result<Self, WatchError> {
        let subscription = Arc::new(Mutex::new(Subscription::default()));
        let shared = Arc::clone(&subscription);
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    debug!(error = %e, "file watcher error");
                    return;
                }
            };
            if matches!(event.kind, EventKind::Access(_)) {
                return;
            }
            let Ok(subscription) = shared.lock() else {
                return;
            };
            for path in &event.paths {
                if subscription.deliver(path) {
                    trace!(path = %path.display(), kind = ?event.kind, "change");
                }
            }
        })?;

        Ok(Self {
            watcher,
            directories: BTreeSet::new(),
            subscription,
        })
    }
}

impl std::fmt::Debug for NotifySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifySource")
            .field("directories", &self.directories)
            .finish_non_exhaustive()
    }
}

impl ChangeSource for NotifySource {
    fn subscribe(&mut self, paths: &BTreeSet<PathBuf>, sink: UnboundedSender<PathBuf>) -> Result<(), WatchError> {
        let directories: BTreeSet<PathBuf> = paths
            .iter()
            .filter_map(|p| p.parent())
            .map(Path::to_path_buf)
            .collect();

        for stale in self.directories.difference(&directories) {
            // the directory may already be gone
            if let Err(e) = self.watcher.unwatch(stale) {
                debug!(dir = %stale.display(), error = %e, "unwatch failed");
            }
        }
        for dir in directories.difference(&self.directories) {
            self.watcher.watch(dir, RecursiveMode::NonRecursive)?;
        }
        debug!(files = paths.len(), dirs = directories.len(), "watching");
        self.directories = directories;

        if let Ok(mut subscription) = self.subscription.lock() {
            subscription.paths = paths.clone();
            subscription.sink = Some(sink);
        }
        Ok(())
    }

    fn unsubscribe(&mut self) -> Result<(), WatchError> {
        if let Ok(mut subscription) = self.subscription.lock() {
            *subscription = Subscription::default();
        }
        for dir in std::mem::take(&mut self.directories) {
            if let Err(e) = self.watcher.unwatch(&dir) {
                debug!(dir = %dir.display(), error = %e, "unwatch failed");
            }
        }
        Ok(())
    }
}

/// A source fed by hand through its [`ChangeTrigger`].
#[derive(Debug, Default)]
pub struct ChannelSource {
    subscription: Arc<Mutex<Subscription>>,
}

/// Reports changes to a [`ChannelSource`]. Cloneable.
#[derive(Debug, Clone)]
pub struct ChangeTrigger {
    subscription: Arc<Mutex<Subscription>>,
}

impl ChannelSource {
    pub fn new() -> (Self, ChangeTrigger) {
        let source = Self::default();
        let trigger = ChangeTrigger {
            subscription: Arc::clone(&source.subscription),
        };
        (source, trigger)
    }
}

impl ChangeSource for ChannelSource {
    fn subscribe(&mut self, paths: &BTreeSet<PathBuf>, sink: UnboundedSender<PathBuf>) -> Result<(), WatchError> {
        if let Ok(mut subscription) = self.subscription.lock() {
            subscription.paths = paths.clone();
            subscription.sink = Some(sink);
        }
        Ok(())
    }

    fn unsubscribe(&mut self) -> Result<(), WatchError> {
        if let Ok(mut subscription) = self.subscription.lock() {
            *subscription = Subscription::default();
        }
        Ok(())
    }
}

impl ChangeTrigger {
    /// Report a change to `path`. Returns `false` when nothing subscribed to it.
    pub fn notify(&self, path: impl AsRef<Path>) -> bool {
        self.subscription
            .lock()
            .map(|subscription| subscription.deliver(path.as_ref()))
            .unwrap_or(false)
    }

    /// The currently subscribed paths.
    pub fn watched(&self) -> BTreeSet<PathBuf> {
        self.subscription
            .lock()
            .map(|subscription| subscription.paths.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_channel_source_filters_to_subscription() {
        let (mut source, trigger) = ChannelSource::new();
        assert!(!trigger.notify("/src/a.ts"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        source
            .subscribe(&BTreeSet::from([PathBuf::from("/src/a.ts")]), tx)
            .unwrap();
        assert!(trigger.notify("/src/a.ts"));
        assert!(!trigger.notify("/src/b.ts"));
        assert_eq!(rx.try_recv().unwrap(), PathBuf::from("/src/a.ts"));
        assert!(rx.try_recv().is_err());

        source.unsubscribe().unwrap();
        assert!(!trigger.notify("/src/a.ts"));
        assert!(trigger.watched().is_empty());
    }

    #[tokio::test]
    async fn test_notify_source_reports_writes() {
        let temp = tempfile::tempdir().unwrap();
        let dir = std::fs::canonicalize(temp.path()).unwrap();
        let watched = dir.join("main.ts");
        let ignored = dir.join("other.ts");
        std::fs::write(&watched, "1").unwrap();
        std::fs::write(&ignored, "1").unwrap();

        let mut source = NotifySource::new().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        source.subscribe(&BTreeSet::from([watched.clone()]), tx).unwrap();

        std::fs::write(&ignored, "2").unwrap();
        std::fs::write(&watched, "2").unwrap();
        let path = tokio::time::timeout(std::time::Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(path, watched);

        source.unsubscribe().unwrap();
    }
}
