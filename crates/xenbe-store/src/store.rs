use crate::error::{Result, StoreError};
use crate::raw::RawStore;
use crate::watch::{ErrorCallback, WatchEngine};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// One control-store session with typed point operations and a watch
/// dispatcher.
///
/// The dispatch thread starts at construction and is joined on drop. Point
/// operations go straight to the session and are valid concurrently with
/// dispatch, including from inside watch callbacks.
pub struct Store {
    raw: Arc<dyn RawStore>,
    engine: Arc<WatchEngine>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Store {
    /// Opens the store on `session`. Unrecoverable session errors are logged;
    /// use [`Store::with_error_callback`] to observe them.
    pub fn new(session: impl RawStore) -> Store {
        Self::build(
            Arc::new(session),
            Box::new(|err| {
                tracing::error!("store session failed: {err}");
            }),
        )
    }

    /// Like [`Store::new`], with a callback invoked (once, off the normal
    /// dispatch path) if the session fails unrecoverably. The dispatcher
    /// exits afterwards; the failure is reported, never retried.
    pub fn with_error_callback(
        session: impl RawStore,
        on_error: impl Fn(&StoreError) + Send + 'static,
    ) -> Store {
        Self::build(Arc::new(session), Box::new(on_error))
    }

    fn build(raw: Arc<dyn RawStore>, on_error: ErrorCallback) -> Store {
        let engine = Arc::new(WatchEngine::default());
        let dispatcher = {
            let engine = engine.clone();
            let raw = raw.clone();
            thread::spawn(move || engine.run(raw.as_ref(), &on_error))
        };
        Store {
            raw,
            engine,
            dispatcher: Some(dispatcher),
        }
    }

    pub fn read_string(&self, path: &str) -> Result<String> {
        self.raw.read(path)?.ok_or_else(|| StoreError::NotFound {
            path: path.to_string(),
        })
    }

    pub fn read_int(&self, path: &str) -> Result<i64> {
        let value = self.read_string(path)?;
        value.trim().parse().map_err(|_| StoreError::Parse {
            path: path.to_string(),
            expected: "integer",
            value,
        })
    }

    pub fn read_uint(&self, path: &str) -> Result<u64> {
        let value = self.read_string(path)?;
        value.trim().parse().map_err(|_| StoreError::Parse {
            path: path.to_string(),
            expected: "unsigned integer",
            value,
        })
    }

    pub fn write_string(&self, path: &str, value: &str) -> Result<()> {
        self.raw.write(path, value)
    }

    pub fn write_int(&self, path: &str, value: i64) -> Result<()> {
        self.raw.write(path, &value.to_string())
    }

    pub fn write_uint(&self, path: &str, value: u64) -> Result<()> {
        self.raw.write(path, &value.to_string())
    }

    pub fn remove_path(&self, path: &str) -> Result<()> {
        self.raw.remove(path)
    }

    pub fn exists(&self, path: &str) -> Result<bool> {
        self.raw.exists(path)
    }

    /// Immediate child names under `path`, sorted. Empty for missing paths.
    pub fn read_directory(&self, path: &str) -> Result<Vec<String>> {
        self.raw.list(path)
    }

    pub fn domain_path(&self, domid: u32) -> String {
        self.raw.domain_path(domid)
    }

    /// Registers `callback` for changes at `path` or below, replacing any
    /// previous registration for the path. With `init_notify` the callback
    /// also fires once for the current value, even if nothing ever changes;
    /// initial notifications are dispatched in registration order, before the
    /// engine blocks for real events.
    ///
    /// Callbacks run serially on the dispatch thread and take no arguments;
    /// they re-read whatever store state they care about.
    pub fn set_watch(
        &self,
        path: &str,
        init_notify: bool,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Result<()> {
        self.engine
            .set_watch(self.raw.as_ref(), path, init_notify, Arc::new(callback))
    }

    /// Unregisters the watch on `path`. Once this returns, the callback is
    /// not running and will not run again. Safe to call from inside the
    /// watch's own callback. Clearing an unknown path is a no-op.
    pub fn clear_watch(&self, path: &str) -> Result<()> {
        self.engine.clear_watch(self.raw.as_ref(), path)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.engine.stop(self.raw.as_ref());
        if let Some(handle) = self.dispatcher.take() {
            if handle.join().is_err() {
                tracing::error!("store watch dispatcher panicked");
            }
        }
        for path in self.engine.drain_registrations() {
            let _ = self.raw.unwatch(&path);
        }
    }
}
