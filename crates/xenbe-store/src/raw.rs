use crate::error::Result;
use std::time::Duration;

/// One session against the hierarchical control store.
///
/// Implementations wrap the real store client; [`crate::MemStore`] sessions
/// implement it in-process. Paths are absolute, `/`-separated, with no
/// trailing slash.
///
/// A session is shared between the threads of its owning [`crate::Store`]:
/// point operations and watch arm/disarm may come from any caller thread
/// while the dispatch thread sits in [`RawStore::wait_event`]. `cancel_wait`
/// must be safe to call concurrently with a blocked `wait_event` and must
/// wake it.
pub trait RawStore: Send + Sync + 'static {
    /// Reads the value at `path`. `Ok(None)` when the path does not exist.
    fn read(&self, path: &str) -> Result<Option<String>>;

    /// Writes `value` at `path`. Parent nodes exist implicitly.
    fn write(&self, path: &str, value: &str) -> Result<()>;

    /// Removes `path` and everything below it. Removing a missing path is a
    /// no-op.
    fn remove(&self, path: &str) -> Result<()>;

    /// Whether `path` (or anything below it) currently exists.
    fn exists(&self, path: &str) -> Result<bool>;

    /// Immediate child names under `path`, sorted. Empty for missing paths.
    fn list(&self, path: &str) -> Result<Vec<String>>;

    /// Home directory of a domain, e.g. `/local/domain/3`.
    fn domain_path(&self, domid: u32) -> String;

    /// Arms a watch: subsequent changes at `path` or below queue one event
    /// carrying `path`. Arming is silent; no event is queued for the current
    /// value.
    fn watch(&self, path: &str) -> Result<()>;

    /// Disarms a watch and drops its queued events.
    fn unwatch(&self, path: &str) -> Result<()>;

    /// Blocks up to `timeout` for the next queued watch event. Returns the
    /// watched path it matched, or `None` on timeout or cancellation.
    fn wait_event(&self, timeout: Duration) -> Result<Option<String>>;

    /// Wakes a concurrently blocked `wait_event`. Idempotent.
    fn cancel_wait(&self);
}

impl<T: RawStore + ?Sized> RawStore for Box<T> {
    fn read(&self, path: &str) -> Result<Option<String>> {
        (**self).read(path)
    }

    fn write(&self, path: &str, value: &str) -> Result<()> {
        (**self).write(path, value)
    }

    fn remove(&self, path: &str) -> Result<()> {
        (**self).remove(path)
    }

    fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path)
    }

    fn list(&self, path: &str) -> Result<Vec<String>> {
        (**self).list(path)
    }

    fn domain_path(&self, domid: u32) -> String {
        (**self).domain_path(domid)
    }

    fn watch(&self, path: &str) -> Result<()> {
        (**self).watch(path)
    }

    fn unwatch(&self, path: &str) -> Result<()> {
        (**self).unwatch(path)
    }

    fn wait_event(&self, timeout: Duration) -> Result<Option<String>> {
        (**self).wait_event(timeout)
    }

    fn cancel_wait(&self) {
        (**self).cancel_wait()
    }
}
