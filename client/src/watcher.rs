//! Watches a feature file and hands its contents to a single subscriber.
//!
//! The parent directory is watched rather than the file itself so atomic
//! replacements (write to a temp file, rename over the target) are seen.

use crate::metrics_defs::{WATCHER_DELIVERIES, WATCHER_ERRORS};
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher as _};
use parking_lot::Mutex;
use shared::counter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);
// A burst of events is never debounced for longer than this many windows.
const MAX_DEBOUNCE_WINDOWS: u32 = 10;

#[derive(thiserror::Error, Debug)]
pub enum WatcherError {
    #[error("failed to resolve {}: {source}", path.display())]
    Setup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("notification error: {0}")]
    Notify(#[from] notify::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("read empty feature file {}", .0.display())]
    EmptyRead(PathBuf),
    #[error("no subscriber registered")]
    NotRegistered,
    #[error("watcher is not initialized")]
    NotInitialized,
    #[error("subscriber went away")]
    SubscriberClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Uninitialized,
    Watching,
    Failed,
}

#[derive(Default)]
struct WatchInner {
    dir: Option<PathBuf>,
    notifier: Option<RecommendedWatcher>,
    events: Option<std_mpsc::Receiver<notify::Result<Event>>>,
    last_delivered: Option<Vec<u8>>,
}

impl WatchInner {
    fn rearm(&mut self) -> Result<(), WatcherError> {
        if let (Some(notifier), Some(dir)) = (self.notifier.as_mut(), self.dir.as_ref()) {
            notifier.watch(dir, RecursiveMode::NonRecursive)?;
        }
        Ok(())
    }
}

pub struct Watcher {
    path: PathBuf,
    debounce: Duration,
    state: Mutex<WatcherState>,
    inner: Mutex<WatchInner>,
    sender: Mutex<Option<UnboundedSender<Vec<u8>>>>,
    closed: AtomicBool,
}

impl Watcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Watcher {
            path: path.into(),
            debounce: DEFAULT_DEBOUNCE,
            state: Mutex::new(WatcherState::Uninitialized),
            inner: Mutex::new(WatchInner::default()),
            sender: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> WatcherState {
        *self.state.lock()
    }

    /// Checks the feature file is readable and starts watching the
    /// directory holding it.
    pub fn init(&self) -> Result<(), WatcherError> {
        let result = self.try_init();
        *self.state.lock() = match result {
            Ok(()) => WatcherState::Watching,
            Err(_) => WatcherState::Failed,
        };
        result
    }

    fn try_init(&self) -> Result<(), WatcherError> {
        let setup_error = |source| WatcherError::Setup {
            path: self.path.clone(),
            source,
        };

        // Symlinks are not resolved: swapping the link itself must be seen
        let initial = std::fs::read(&self.path).map_err(setup_error)?;
        if self.path.file_name().is_none() {
            return Err(setup_error(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "path does not name a file",
            )));
        }
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = std_mpsc::channel();
        let mut notifier = RecommendedWatcher::new(tx, NotifyConfig::default())?;
        notifier.watch(&dir, RecursiveMode::NonRecursive)?;

        let mut inner = self.inner.lock();
        inner.dir = Some(dir);
        inner.notifier = Some(notifier);
        inner.events = Some(rx);
        inner.last_delivered = (!initial.is_empty()).then_some(initial);
        Ok(())
    }

    fn is_relevant(&self, event: &Event) -> bool {
        let content_affecting = match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => false,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any => true,
            _ => false,
        };
        if !content_affecting {
            return false;
        }

        let Some(target) = self.path.file_name() else {
            return false;
        };
        event
            .paths
            .iter()
            .any(|path| path.file_name() == Some(target))
    }

    /// Sets the channel that receives file contents. Only one subscriber is
    /// supported; registering again replaces the previous one.
    pub fn register(&self, sender: UnboundedSender<Vec<u8>>) {
        *self.sender.lock() = Some(sender);
    }

    /// Reads the whole feature file. An empty file is an error.
    pub fn read_file(&self) -> Result<Vec<u8>, WatcherError> {
        let bytes = std::fs::read(&self.path)?;
        if bytes.is_empty() {
            return Err(WatcherError::EmptyRead(self.path.clone()));
        }
        Ok(bytes)
    }

    /// Blocks the calling thread delivering file changes until the watcher
    /// is closed or the subscriber goes away.
    ///
    /// Only one loop runs per watcher: it owns the notification receiver
    /// and handles each event and re-arm under the watcher's lock.
    pub fn watch(&self) -> Result<(), WatcherError> {
        if self.state() != WatcherState::Watching {
            return Err(WatcherError::NotInitialized);
        }
        let sender = self
            .sender
            .lock()
            .take()
            .ok_or(WatcherError::NotRegistered)?;
        let events = self
            .inner
            .lock()
            .events
            .take()
            .ok_or(WatcherError::NotInitialized)?;

        tracing::info!(path = %self.path.display(), "Watching feature file");

        while !self.closed.load(Ordering::Acquire) {
            let event = match events.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(event)) => event,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Feature file notification error");
                    counter!(WATCHER_ERRORS).increment(1);
                    continue;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            if !self.is_relevant(&event) {
                continue;
            }
            self.drain_burst(&events);

            let mut inner = self.inner.lock();
            match self.deliver(&mut inner, &sender) {
                Ok(()) => {}
                Err(WatcherError::SubscriberClosed) => break,
                Err(e @ WatcherError::EmptyRead(_)) => {
                    tracing::warn!(error = %e, "Skipping feature file update");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read feature file");
                    counter!(WATCHER_ERRORS).increment(1);
                }
            }

            if let Err(e) = inner.rearm() {
                tracing::error!(error = %e, "Failed to re-arm feature file watch");
                counter!(WATCHER_ERRORS).increment(1);
            }
        }

        tracing::info!(path = %self.path.display(), "Stopped watching feature file");
        Ok(())
    }

    // Swallows follow-up events until the directory has been quiet for one
    // debounce window.
    fn drain_burst(&self, events: &std_mpsc::Receiver<notify::Result<Event>>) {
        let deadline = Instant::now() + self.debounce * MAX_DEBOUNCE_WINDOWS;

        while Instant::now() < deadline {
            match events.recv_timeout(self.debounce) {
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Feature file notification error");
                }
                Err(_) => break,
            }
        }
    }

    fn deliver(
        &self,
        inner: &mut WatchInner,
        sender: &UnboundedSender<Vec<u8>>,
    ) -> Result<(), WatcherError> {
        let bytes = self.read_file()?;
        if inner.last_delivered.as_deref() == Some(bytes.as_slice()) {
            tracing::debug!(path = %self.path.display(), "Feature file unchanged");
            return Ok(());
        }

        sender
            .send(bytes.clone())
            .map_err(|_| WatcherError::SubscriberClosed)?;
        inner.last_delivered = Some(bytes);
        counter!(WATCHER_DELIVERIES).increment(1);
        Ok(())
    }

    /// Stops the watch loop and releases the notification source. Does not
    /// wait for the loop to exit.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.inner.lock().notifier.take();
        self.sender.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;
    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

    fn start(path: &Path) -> (Arc<Watcher>, UnboundedReceiver<Vec<u8>>) {
        let watcher = Arc::new(Watcher::new(path).with_debounce(Duration::from_millis(20)));
        watcher.init().unwrap();
        let (tx, rx) = unbounded_channel();
        watcher.register(tx);

        let thread_watcher = watcher.clone();
        std::thread::spawn(move || thread_watcher.watch().unwrap());
        // Give the thread a moment to enter its loop
        std::thread::sleep(Duration::from_millis(100));
        (watcher, rx)
    }

    async fn next(rx: &mut UnboundedReceiver<Vec<u8>>) -> Option<Vec<u8>> {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .ok()
            .flatten()
    }

    async fn nothing_within(rx: &mut UnboundedReceiver<Vec<u8>>, wait: Duration) -> bool {
        tokio::time::timeout(wait, rx.recv()).await.is_err()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_single_write_single_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decider.json");
        std::fs::write(&path, b"first").unwrap();

        let (watcher, mut rx) = start(&path);
        assert_eq!(watcher.state(), WatcherState::Watching);

        std::fs::write(&path, b"second").unwrap();
        assert_eq!(next(&mut rx).await.unwrap(), b"second");
        assert!(nothing_within(&mut rx, Duration::from_millis(500)).await);

        watcher.close();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_atomic_replace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decider.json");
        std::fs::write(&path, b"first").unwrap();

        let (watcher, mut rx) = start(&path);

        let mut tmp = tempfile::NamedTempFile::new_in(dir.path()).unwrap();
        tmp.write_all(b"replaced").unwrap();
        tmp.persist(&path).unwrap();

        assert_eq!(next(&mut rx).await.unwrap(), b"replaced");
        watcher.close();
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_symlink_swap() {
        let dir = tempfile::tempdir().unwrap();
        for (data, content) in [("data1", "first"), ("data2", "second")] {
            std::fs::create_dir(dir.path().join(data)).unwrap();
            std::fs::write(dir.path().join(data).join("decider.json"), content).unwrap();
        }
        let path = dir.path().join("decider.json");
        std::os::unix::fs::symlink(dir.path().join("data1/decider.json"), &path).unwrap();

        let (watcher, mut rx) = start(&path);

        let staged = dir.path().join("decider.json.tmp");
        std::os::unix::fs::symlink(dir.path().join("data2/decider.json"), &staged).unwrap();
        std::fs::rename(&staged, &path).unwrap();

        assert_eq!(next(&mut rx).await.unwrap(), b"second");
        watcher.close();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_empty_write_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decider.json");
        std::fs::write(&path, b"first").unwrap();

        let (watcher, mut rx) = start(&path);

        std::fs::write(&path, b"").unwrap();
        assert!(nothing_within(&mut rx, Duration::from_millis(500)).await);

        std::fs::write(&path, b"after").unwrap();
        assert_eq!(next(&mut rx).await.unwrap(), b"after");
        assert!(nothing_within(&mut rx, Duration::from_millis(300)).await);
        watcher.close();
    }

    #[cfg(target_os = "linux")]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_permission_change_delivers() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decider.json");
        std::fs::write(&path, b"first").unwrap();
        // Writes through a link outside the watched directory raise no event
        std::fs::create_dir(dir.path().join("other")).unwrap();
        let alias = dir.path().join("other/alias.json");
        std::fs::hard_link(&path, &alias).unwrap();

        let (watcher, mut rx) = start(&path);

        std::fs::write(&alias, b"second").unwrap();
        assert!(nothing_within(&mut rx, Duration::from_millis(500)).await);

        let mut permissions = std::fs::metadata(&path).unwrap().permissions();
        permissions.set_mode(0o600);
        std::fs::set_permissions(&path, permissions).unwrap();

        assert_eq!(next(&mut rx).await.unwrap(), b"second");
        watcher.close();
    }

    #[test]
    fn test_relevant_events() {
        use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind};

        let watcher = Watcher::new("/etc/dcdr/decider.json");
        let event = |kind, path: &str| Event::new(kind).add_path(PathBuf::from(path));
        let target = "/etc/dcdr/decider.json";

        for kind in [
            EventKind::Create(CreateKind::File),
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            EventKind::Any,
        ] {
            assert!(watcher.is_relevant(&event(kind, target)), "{kind:?}");
        }

        for kind in [
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            EventKind::Remove(RemoveKind::File),
            EventKind::Access(AccessKind::Read),
        ] {
            assert!(!watcher.is_relevant(&event(kind, target)), "{kind:?}");
        }

        let other = EventKind::Modify(ModifyKind::Data(DataChange::Content));
        assert!(!watcher.is_relevant(&event(other, "/etc/dcdr/other.json")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_returns_promptly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decider.json");
        std::fs::write(&path, b"first").unwrap();

        let (watcher, mut rx) = start(&path);

        let started = Instant::now();
        watcher.close();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(next(&mut rx).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unchanged_and_unrelated_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decider.json");
        std::fs::write(&path, b"same").unwrap();

        let (watcher, mut rx) = start(&path);

        std::fs::write(&path, b"same").unwrap();
        std::fs::write(dir.path().join("other.json"), b"other").unwrap();
        assert!(nothing_within(&mut rx, Duration::from_millis(500)).await);

        std::fs::write(&path, b"changed").unwrap();
        assert_eq!(next(&mut rx).await.unwrap(), b"changed");
        watcher.close();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_ends_subscription() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decider.json");
        std::fs::write(&path, b"first").unwrap();

        let (watcher, mut rx) = start(&path);
        watcher.close();

        // The sender is dropped once the loop exits
        assert!(next(&mut rx).await.is_none());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = Watcher::new(dir.path().join("missing.json"));

        assert!(matches!(watcher.init(), Err(WatcherError::Setup { .. })));
        assert_eq!(watcher.state(), WatcherState::Failed);
        assert!(matches!(watcher.watch(), Err(WatcherError::NotInitialized)));
    }

    #[test]
    fn test_watch_requires_subscriber() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decider.json");
        std::fs::write(&path, b"{}").unwrap();

        let watcher = Watcher::new(&path);
        assert_eq!(watcher.state(), WatcherState::Uninitialized);
        watcher.init().unwrap();
        assert!(matches!(watcher.watch(), Err(WatcherError::NotRegistered)));
    }

    #[test]
    fn test_read_file_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decider.json");
        std::fs::write(&path, b"").unwrap();

        let watcher = Watcher::new(&path);
        assert!(matches!(
            watcher.read_file(),
            Err(WatcherError::EmptyRead(_))
        ));
    }
}
