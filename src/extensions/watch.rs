//! Filesystem change subscriptions.
//!
//! Watch backends run on their own threads and only forward events over a
//! channel. Extension callbacks are invoked on the host thread when the host
//! pumps the channel, so no extension code ever runs off-thread.

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};

use super::error::{ExtensionError, ExtensionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(u64);

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchEventKind {
    Create,
    Modify,
    Rename,
    Remove,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub paths: Vec<PathBuf>,
}

impl From<notify::Event> for WatchEvent {
    fn from(event: notify::Event) -> Self {
        use notify::event::ModifyKind;
        use notify::EventKind;

        let kind = match event.kind {
            EventKind::Create(_) => WatchEventKind::Create,
            EventKind::Modify(ModifyKind::Name(_)) => WatchEventKind::Rename,
            EventKind::Modify(_) => WatchEventKind::Modify,
            EventKind::Remove(_) => WatchEventKind::Remove,
            _ => WatchEventKind::Other,
        };
        Self {
            kind,
            paths: event.paths,
        }
    }
}

/// How watch targets are resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WatchBase {
    /// Relative paths resolve against the library root.
    #[default]
    Library,
    /// Paths are taken as given.
    Absolute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub recursive: bool,
    pub base: WatchBase,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            base: WatchBase::Library,
        }
    }
}

pub type WatchCallback = Box<dyn FnMut(&WatchEvent) -> anyhow::Result<()>>;

/// Sending half handed to a backend for one subscription.
#[derive(Clone)]
pub struct WatchSink {
    id: WatchId,
    tx: Sender<(WatchId, WatchEvent)>,
}

impl WatchSink {
    /// Queue an event. Returns `false` once the host is gone.
    pub fn send(&self, event: WatchEvent) -> bool {
        self.tx.send((self.id, event)).is_ok()
    }
}

/// A live backend subscription.
pub trait ActiveWatch {
    fn cancel(self: Box<Self>) -> ExtensionResult<()>;
}

/// Source of filesystem events.
pub trait WatchBackend {
    fn subscribe(
        &self,
        paths: &[PathBuf],
        recursive: bool,
        sink: WatchSink,
    ) -> ExtensionResult<Box<dyn ActiveWatch>>;
}

/// Backend built on the platform's recommended `notify` watcher.
#[derive(Debug, Default)]
pub struct NotifyBackend;

struct NotifyWatch {
    watcher: RecommendedWatcher,
    paths: Vec<PathBuf>,
}

fn notify_error(context: &str, e: notify::Error) -> ExtensionError {
    ExtensionError::io(context, std::io::Error::other(e))
}

impl WatchBackend for NotifyBackend {
    fn subscribe(
        &self,
        paths: &[PathBuf],
        recursive: bool,
        sink: WatchSink,
    ) -> ExtensionResult<Box<dyn ActiveWatch>> {
        let mut watcher = notify::recommended_watcher(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    sink.send(WatchEvent::from(event));
                }
                Err(e) => tracing::warn!(error = %e, "Watch error"),
            },
        )
        .map_err(|e| notify_error("Failed to create watcher", e))?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        for path in paths {
            watcher
                .watch(path, mode)
                .map_err(|e| notify_error(&format!("Failed to watch {}", path.display()), e))?;
        }

        Ok(Box::new(NotifyWatch {
            watcher,
            paths: paths.to_vec(),
        }))
    }
}

impl ActiveWatch for NotifyWatch {
    fn cancel(mut self: Box<Self>) -> ExtensionResult<()> {
        let mut first_error = None;
        for path in &self.paths {
            if let Err(e) = self.watcher.unwatch(path) {
                first_error.get_or_insert(notify_error(
                    &format!("Failed to unwatch {}", path.display()),
                    e,
                ));
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

struct Subscription {
    extension_id: String,
    callback: Rc<RefCell<WatchCallback>>,
    active: Box<dyn ActiveWatch>,
}

/// Event delivered to a subscription's callback on the host thread.
pub(crate) struct PendingEvent {
    pub id: WatchId,
    pub extension_id: String,
    pub callback: Rc<RefCell<WatchCallback>>,
    pub event: WatchEvent,
}

/// All live subscriptions plus the shared event channel.
pub struct WatchService {
    backend: Box<dyn WatchBackend>,
    tx: Sender<(WatchId, WatchEvent)>,
    rx: Receiver<(WatchId, WatchEvent)>,
    subscriptions: BTreeMap<WatchId, Subscription>,
    next_id: u64,
}

impl WatchService {
    pub fn new(backend: Box<dyn WatchBackend>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            backend,
            tx,
            rx,
            subscriptions: BTreeMap::new(),
            next_id: 0,
        }
    }

    pub fn subscribe(
        &mut self,
        extension_id: &str,
        paths: &[PathBuf],
        recursive: bool,
        callback: WatchCallback,
    ) -> ExtensionResult<WatchId> {
        if paths.is_empty() {
            return Err(ExtensionError::Validation("no paths to watch".into()));
        }
        self.next_id += 1;
        let id = WatchId(self.next_id);
        let sink = WatchSink {
            id,
            tx: self.tx.clone(),
        };
        let active = self.backend.subscribe(paths, recursive, sink)?;
        self.subscriptions.insert(
            id,
            Subscription {
                extension_id: extension_id.to_string(),
                callback: Rc::new(RefCell::new(callback)),
                active,
            },
        );
        tracing::debug!(extension = %extension_id, watch = %id, "Watch started");
        Ok(id)
    }

    /// Cancel one subscription. Returns `Ok(false)` if it was already gone.
    pub fn cancel(&mut self, id: WatchId) -> ExtensionResult<bool> {
        match self.subscriptions.remove(&id) {
            Some(sub) => {
                sub.active.cancel()?;
                tracing::debug!(extension = %sub.extension_id, watch = %id, "Watch cancelled");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Cancel every subscription of an extension, returning how many went.
    pub fn cancel_extension(&mut self, extension_id: &str) -> usize {
        let ids: Vec<WatchId> = self
            .subscriptions
            .iter()
            .filter(|(_, s)| s.extension_id == extension_id)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            if let Err(e) = self.cancel(*id) {
                tracing::warn!(extension = %extension_id, watch = %id, error = %e, "Failed to cancel watch");
            }
        }
        ids.len()
    }

    pub fn count_for(&self, extension_id: &str) -> usize {
        self.subscriptions
            .values()
            .filter(|s| s.extension_id == extension_id)
            .count()
    }

    /// Drain queued events. Events for cancelled subscriptions are dropped.
    pub(crate) fn drain(&mut self) -> Vec<PendingEvent> {
        let mut pending = Vec::new();
        while let Ok((id, event)) = self.rx.try_recv() {
            if let Some(sub) = self.subscriptions.get(&id) {
                pending.push(PendingEvent {
                    id,
                    extension_id: sub.extension_id.clone(),
                    callback: sub.callback.clone(),
                    event,
                });
            }
        }
        pending
    }
}

impl Default for WatchService {
    fn default() -> Self {
        Self::new(Box::new(NotifyBackend))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process backend for tests: records subscriptions and lets tests
    //! push events by hand.

    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[derive(Default)]
    pub struct MockState {
        pub sinks: RefCell<Vec<(Vec<PathBuf>, WatchSink)>>,
        pub cancelled: Cell<usize>,
        pub cancel_log: RefCell<Vec<Vec<PathBuf>>>,
        pub fail_cancel: Cell<bool>,
    }

    #[derive(Clone, Default)]
    pub struct MockBackend {
        pub state: Rc<MockState>,
    }

    struct MockWatch {
        state: Rc<MockState>,
        paths: Vec<PathBuf>,
    }

    impl WatchBackend for MockBackend {
        fn subscribe(
            &self,
            paths: &[PathBuf],
            _recursive: bool,
            sink: WatchSink,
        ) -> ExtensionResult<Box<dyn ActiveWatch>> {
            self.state.sinks.borrow_mut().push((paths.to_vec(), sink));
            Ok(Box::new(MockWatch {
                state: self.state.clone(),
                paths: paths.to_vec(),
            }))
        }
    }

    impl ActiveWatch for MockWatch {
        fn cancel(self: Box<Self>) -> ExtensionResult<()> {
            self.state.cancelled.set(self.state.cancelled.get() + 1);
            self.state.cancel_log.borrow_mut().push(self.paths);
            if self.state.fail_cancel.get() {
                return Err(ExtensionError::io(
                    "Failed to unwatch",
                    std::io::Error::from(std::io::ErrorKind::NotFound),
                ));
            }
            Ok(())
        }
    }

    impl MockBackend {
        /// Emit an event on the `idx`-th subscription ever made.
        pub fn emit(&self, idx: usize, kind: WatchEventKind, path: &str) {
            let sinks = self.state.sinks.borrow();
            sinks[idx].1.send(WatchEvent {
                kind,
                paths: vec![PathBuf::from(path)],
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockBackend;
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_events_are_routed_to_their_subscription() {
        let backend = MockBackend::default();
        let mut service = WatchService::new(Box::new(backend.clone()));

        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let id = service
            .subscribe(
                "a",
                &[PathBuf::from("/lib")],
                true,
                Box::new(move |event| {
                    assert_eq!(event.kind, WatchEventKind::Create);
                    counter.set(counter.get() + 1);
                    Ok(())
                }),
            )
            .unwrap();

        backend.emit(0, WatchEventKind::Create, "/lib/a.md");
        let pending = service.drain();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        for p in pending {
            let mut callback = p.callback.borrow_mut();
            (*callback)(&p.event).unwrap();
        }
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_cancel_is_idempotent_and_drops_late_events() {
        let backend = MockBackend::default();
        let mut service = WatchService::new(Box::new(backend.clone()));
        let id = service
            .subscribe("a", &[PathBuf::from("/lib")], true, Box::new(|_| Ok(())))
            .unwrap();

        backend.emit(0, WatchEventKind::Modify, "/lib/a.md");
        assert!(service.cancel(id).unwrap());
        assert!(!service.cancel(id).unwrap());
        assert_eq!(backend.state.cancelled.get(), 1);
        assert!(service.drain().is_empty());
    }

    #[test]
    fn test_cancel_extension() {
        let backend = MockBackend::default();
        let mut service = WatchService::new(Box::new(backend.clone()));
        for ext in ["a", "a", "b"] {
            service
                .subscribe(ext, &[PathBuf::from("/lib")], false, Box::new(|_| Ok(())))
                .unwrap();
        }
        assert_eq!(service.cancel_extension("a"), 2);
        assert_eq!(service.count_for("a"), 0);
        assert_eq!(service.count_for("b"), 1);
    }

    #[test]
    fn test_empty_paths_rejected() {
        let mut service = WatchService::new(Box::new(MockBackend::default()));
        assert!(service.subscribe("a", &[], true, Box::new(|_| Ok(()))).is_err());
    }

    #[test]
    fn test_notify_backend_watches_real_directory() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut service = WatchService::default();
        let id = service
            .subscribe("a", &[temp.path().to_path_buf()], true, Box::new(|_| Ok(())))
            .unwrap();
        assert!(service.cancel(id).unwrap());
    }
}
