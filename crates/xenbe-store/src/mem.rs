//! In-process control store.
//!
//! One [`MemStore`] plays the role of the store daemon; every
//! [`MemStore::session`] is an independent client with its own watch set and
//! event queue, so a whole backend (and the frontend side of a test harness)
//! can talk through one shared tree.

use crate::error::{Result, StoreError};
use crate::raw::RawStore;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

/// Shared in-memory store tree.
///
/// Cloning is cheap and refers to the same tree.
#[derive(Clone, Default)]
pub struct MemStore {
    tree: Arc<Tree>,
}

#[derive(Default)]
struct Tree {
    state: Mutex<TreeState>,
}

#[derive(Default)]
struct TreeState {
    /// Full path -> value. Interior nodes exist implicitly.
    nodes: BTreeMap<String, String>,
    sessions: Vec<Weak<SessionShared>>,
}

#[derive(Default)]
struct SessionShared {
    state: Mutex<SessionState>,
    cond: Condvar,
}

#[derive(Default)]
struct SessionState {
    watches: BTreeSet<String>,
    pending: VecDeque<String>,
    cancelled: bool,
    fail_next_wait: Option<String>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new session on the shared tree.
    pub fn session(&self) -> MemSession {
        let shared = Arc::new(SessionShared::default());
        self.tree.lock().sessions.push(Arc::downgrade(&shared));
        MemSession {
            tree: self.tree.clone(),
            shared,
        }
    }
}

impl Tree {
    fn lock(&self) -> MutexGuard<'_, TreeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl TreeState {
    /// Queues an event on every session watch matched by `matches` and wakes
    /// the sessions' waiters. Dead sessions are pruned on the way.
    fn fire(&mut self, matches: impl Fn(&str) -> bool) {
        self.sessions.retain(|weak| {
            let Some(session) = weak.upgrade() else {
                return false;
            };
            let mut guard = session.lock();
            let st = &mut *guard;
            let mut queued = false;
            for watch in &st.watches {
                if matches(watch) && !st.pending.contains(watch) {
                    st.pending.push_back(watch.clone());
                    queued = true;
                }
            }
            if queued {
                session.cond.notify_all();
            }
            true
        });
    }
}

impl SessionShared {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// One client session of a [`MemStore`].
///
/// Clones share the session (same watch set and event queue); tests use a
/// clone to keep a fault-injection handle after moving the session into a
/// `Store`.
#[derive(Clone)]
pub struct MemSession {
    tree: Arc<Tree>,
    shared: Arc<SessionShared>,
}

impl MemSession {
    /// Makes the next `wait_event` on this session fail with a backend error.
    /// Wakes a blocked waiter so the failure is delivered immediately.
    pub fn inject_wait_error(&self, reason: &str) {
        let mut st = self.shared.lock();
        st.fail_next_wait = Some(reason.to_string());
        self.shared.cond.notify_all();
    }
}

/// Whether a change at `path` is visible to a watch on `watch`: the watched
/// node itself or anything below it.
fn covers(watch: &str, path: &str) -> bool {
    path == watch || (path.len() > watch.len() && path.starts_with(watch) && path.as_bytes()[watch.len()] == b'/')
}

impl RawStore for MemSession {
    fn read(&self, path: &str) -> Result<Option<String>> {
        Ok(self.tree.lock().nodes.get(path).cloned())
    }

    fn write(&self, path: &str, value: &str) -> Result<()> {
        let mut tree = self.tree.lock();
        tree.nodes.insert(path.to_string(), value.to_string());
        tree.fire(|watch| covers(watch, path));
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<()> {
        let mut tree = self.tree.lock();
        // Keys below `path` form one contiguous range under the `path/`
        // prefix; the node itself is handled separately.
        let prefix = format!("{path}/");
        let mut doomed: Vec<String> = tree
            .nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| key.clone())
            .collect();
        if tree.nodes.contains_key(path) {
            doomed.push(path.to_string());
        }
        if doomed.is_empty() {
            return Ok(());
        }
        for key in &doomed {
            tree.nodes.remove(key);
        }
        // A removal is visible both to watches at or above the removed root
        // and to watches on the nodes that vanished below it.
        tree.fire(|watch| covers(watch, path) || covers(path, watch));
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        let tree = self.tree.lock();
        if tree.nodes.contains_key(path) {
            return Ok(true);
        }
        let prefix = format!("{path}/");
        let found = tree
            .nodes
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(&prefix));
        Ok(found)
    }

    fn list(&self, path: &str) -> Result<Vec<String>> {
        let tree = self.tree.lock();
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut children: Vec<String> = Vec::new();
        for (key, _) in tree.nodes.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            let child = match key[prefix.len()..].split('/').next() {
                Some(segment) if !segment.is_empty() => segment,
                _ => continue,
            };
            if children.last().map(String::as_str) != Some(child) {
                children.push(child.to_string());
            }
        }
        Ok(children)
    }

    fn domain_path(&self, domid: u32) -> String {
        format!("/local/domain/{domid}")
    }

    fn watch(&self, path: &str) -> Result<()> {
        self.shared.lock().watches.insert(path.to_string());
        Ok(())
    }

    fn unwatch(&self, path: &str) -> Result<()> {
        let mut st = self.shared.lock();
        st.watches.remove(path);
        st.pending.retain(|pending| pending != path);
        Ok(())
    }

    fn wait_event(&self, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        let mut st = self.shared.lock();
        loop {
            if let Some(reason) = st.fail_next_wait.take() {
                return Err(StoreError::Backend { reason });
            }
            if st.cancelled {
                st.cancelled = false;
                return Ok(None);
            }
            if let Some(path) = st.pending.pop_front() {
                return Ok(Some(path));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            st = match self.shared.cond.wait_timeout(st, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn cancel_wait(&self) {
        let mut st = self.shared.lock();
        st.cancelled = true;
        self.shared.cond.notify_all();
    }
}
