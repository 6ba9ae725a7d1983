//! Watch dispatch engine.
//!
//! One background thread per [`crate::Store`] turns queued path events into
//! ordered callback invocations:
//!
//! - registrations live under the registry lock, which is never held while a
//!   callback runs, so registering from any thread (including from inside a
//!   callback) does not block behind dispatch;
//! - the in-flight marker lives under a second lock; `clear_watch` waits on
//!   it, which gives the unregistration contract: once `clear_watch` returns,
//!   the cleared callback is not running and will not run again;
//! - pending initial notifications are claimed ahead of real events, one per
//!   iteration, so they drain before the engine blocks;
//! - blocking waits are bounded by [`WATCH_POLL_INTERVAL`] and shutdown wakes
//!   them through [`crate::RawStore::cancel_wait`] rather than waiting the
//!   interval out.
//!
//! Lock order is registry, then dispatch. Neither lock is ever held across a
//! callback or a store call that can block.

use crate::error::{Result, StoreError};
use crate::raw::RawStore;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;

/// Bound on one blocking wait for store events. Responsiveness plumbing only;
/// correctness never depends on the interval elapsing.
pub const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub(crate) type WatchCallback = Arc<dyn Fn() + Send + Sync>;
pub(crate) type ErrorCallback = Box<dyn Fn(&StoreError) + Send>;

#[derive(Default)]
pub(crate) struct WatchEngine {
    registry: Mutex<Registry>,
    dispatch: Mutex<DispatchState>,
    /// Signalled whenever an invocation finishes.
    idle: Condvar,
}

#[derive(Default)]
struct Registry {
    watches: HashMap<String, WatchCallback>,
    /// Paths registered with `init_notify` that have not fired yet, in
    /// registration order.
    init_pending: VecDeque<String>,
}

#[derive(Default)]
struct DispatchState {
    /// Path whose callback is currently running on the dispatch thread.
    in_flight: Option<String>,
    stopping: bool,
    dispatcher: Option<ThreadId>,
}

impl WatchEngine {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        match self.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn dispatch(&self) -> MutexGuard<'_, DispatchState> {
        match self.dispatch.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Registers `callback` for `path`, replacing any previous registration.
    /// With `init_notify` the callback fires once even if the path never
    /// changes; re-registering while that notification is still queued does
    /// not queue a second one.
    pub(crate) fn set_watch(
        &self,
        raw: &dyn RawStore,
        path: &str,
        init_notify: bool,
        callback: WatchCallback,
    ) -> Result<()> {
        let mut reg = self.registry();
        if self.dispatch().stopping {
            return Err(StoreError::Closed);
        }
        if !reg.watches.contains_key(path) {
            raw.watch(path).map_err(|err| StoreError::WatchSetup {
                path: path.to_string(),
                reason: err.to_string(),
            })?;
        }
        reg.watches.insert(path.to_string(), callback);
        if init_notify && !reg.init_pending.iter().any(|pending| pending == path) {
            reg.init_pending.push_back(path.to_string());
        }
        Ok(())
    }

    /// Removes the registration for `path`. On return the callback is not
    /// running and will not run again. Calling this from inside the watch's
    /// own callback returns immediately instead of deadlocking; the contract
    /// still holds once that invocation returns.
    pub(crate) fn clear_watch(&self, raw: &dyn RawStore, path: &str) -> Result<()> {
        let removed = {
            let mut reg = self.registry();
            reg.init_pending.retain(|pending| pending != path);
            reg.watches.remove(path)
        };
        if removed.is_none() {
            return Ok(());
        }
        raw.unwatch(path)?;

        let mut d = self.dispatch();
        if d.dispatcher == Some(thread::current().id()) {
            return Ok(());
        }
        while d.in_flight.as_deref() == Some(path) {
            d = match self.idle.wait(d) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        Ok(())
    }

    /// Signals the dispatcher to exit and wakes it out of a blocked wait.
    pub(crate) fn stop(&self, raw: &dyn RawStore) {
        self.dispatch().stopping = true;
        raw.cancel_wait();
    }

    /// Drops every registration and returns the paths that were armed, so the
    /// owner can disarm them on the session. Only valid once the dispatcher
    /// has been joined.
    pub(crate) fn drain_registrations(&self) -> Vec<String> {
        let mut reg = self.registry();
        reg.init_pending.clear();
        reg.watches.drain().map(|(path, _)| path).collect()
    }

    /// Dispatch thread body. Runs until stopped or until the session reports
    /// an unrecoverable error, which is handed to `on_error` exactly once.
    pub(crate) fn run(&self, raw: &dyn RawStore, on_error: &ErrorCallback) {
        self.dispatch().dispatcher = Some(thread::current().id());
        loop {
            let (path, callback) = match self.claim_next(raw) {
                Ok(Some(claimed)) => claimed,
                Ok(None) => break,
                Err(err) => {
                    tracing::error!("store watch dispatch failed: {err}");
                    self.dispatch().stopping = true;
                    on_error(&err);
                    break;
                }
            };
            tracing::debug!(path = path.as_str(), "dispatching watch callback");
            callback();
            self.dispatch().in_flight = None;
            self.idle.notify_all();
        }
        self.dispatch().in_flight = None;
        self.idle.notify_all();
    }

    /// Claims the next invocation: a queued initial notification if there is
    /// one, otherwise the next real event whose registration still exists.
    /// Marks it in-flight before releasing the registry lock, so a concurrent
    /// `clear_watch` either removes the registration first (and the claim is
    /// dropped) or waits for the invocation to finish.
    fn claim_next(&self, raw: &dyn RawStore) -> Result<Option<(String, WatchCallback)>> {
        loop {
            {
                let mut reg = self.registry();
                let mut d = self.dispatch();
                if d.stopping {
                    return Ok(None);
                }
                if let Some(path) = reg.init_pending.pop_front() {
                    if let Some(callback) = reg.watches.get(&path).cloned() {
                        d.in_flight = Some(path.clone());
                        return Ok(Some((path, callback)));
                    }
                    // Cleared while queued; drop the notification.
                    continue;
                }
            }

            match raw.wait_event(WATCH_POLL_INTERVAL)? {
                Some(path) => {
                    let reg = self.registry();
                    let mut d = self.dispatch();
                    if d.stopping {
                        return Ok(None);
                    }
                    if let Some(callback) = reg.watches.get(&path).cloned() {
                        d.in_flight = Some(path.clone());
                        return Ok(Some((path, callback)));
                    }
                    // Cleared between the event queuing and now.
                }
                None => {}
            }
        }
    }
}
