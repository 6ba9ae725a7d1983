//! Per-frontend connection state machine.
//!
//! A [`FrontendConnection`] owns one store session (and with it the session's
//! dispatch thread), the xenbus negotiation logic, and the ring channels the
//! device layer opens once the frontend is ready. It registers exactly one
//! watch, on the frontend's `state` key, with an initial notification; every
//! invocation re-reads the state value and dispatches to the device hooks
//! only when the value actually changed.
//!
//! Single-writer rules: the recorded frontend state is written only by the
//! watch callback; the backend state only through `set_backend_state`, which
//! also publishes it to the store. Both sit under one short-held lock that is
//! never held across a hook; the channel set has its own lock with the same
//! rule.

use crate::error::ConnectionError;
use crate::hooks::DeviceHooks;
use crate::paths;
use crate::state::XenbusState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use xenbe_ring::RingChannel;
use xenbe_store::{RawStore, Store, StoreError};

struct ConnState {
    /// Last state observed from the frontend. Watch callback only.
    frontend_state: XenbusState,
    /// State this backend has published. `set_backend_state` only.
    backend_state: XenbusState,
    /// `on_bind` has fired.
    bound: bool,
    /// The connection can no longer make progress.
    terminated: bool,
}

struct ConnInner {
    store: Store,
    domid: u32,
    devid: u32,
    frontend_path: String,
    backend_path: String,
    frontend_state_key: String,
    backend_state_key: String,
    state: Mutex<ConnState>,
    channels: Mutex<Vec<RingChannel>>,
    hooks: Mutex<Box<dyn DeviceHooks>>,
    /// The store session reported an unrecoverable error.
    store_failed: Arc<AtomicBool>,
}

impl ConnInner {
    fn lock_state(&self) -> MutexGuard<'_, ConnState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_channels(&self) -> MutexGuard<'_, Vec<RingChannel>> {
        match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Watch-callback entry point. Hook faults stop here: they are logged and
    /// converted into the terminated condition, never propagated into the
    /// store's dispatch thread.
    fn frontend_state_changed(self: &Arc<Self>) {
        if let Err(err) = self.dispatch_frontend_state() {
            tracing::error!(
                domid = self.domid,
                devid = self.devid,
                "frontend state handling failed: {err}"
            );
            self.fail();
        }
    }

    fn dispatch_frontend_state(self: &Arc<Self>) -> Result<(), ConnectionError> {
        // A frontend that has not written its state yet (or whose subtree
        // vanished) reads as Unknown rather than as a fault.
        let observed = match self.store.read_int(&self.frontend_state_key) {
            Ok(value) => XenbusState::from_raw(value)?,
            Err(StoreError::NotFound { .. }) => XenbusState::Unknown,
            Err(err) => return Err(err.into()),
        };
        {
            let mut st = self.lock_state();
            if st.terminated || st.frontend_state == observed {
                return Ok(());
            }
            st.frontend_state = observed;
        }
        tracing::debug!(
            domid = self.domid,
            devid = self.devid,
            state = %observed,
            "frontend state changed"
        );

        let conn = Connection {
            inner: self.clone(),
        };
        let mut hooks = match self.hooks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match observed {
            XenbusState::Unknown => Ok(()),
            XenbusState::Initialising => hooks.on_state_initialising(&conn),
            XenbusState::InitWait => hooks.on_state_init_wait(&conn),
            XenbusState::Initialised => {
                let first = {
                    let mut st = self.lock_state();
                    !std::mem::replace(&mut st.bound, true)
                };
                if first {
                    hooks.on_bind(&conn)?;
                }
                hooks.on_state_initialised(&conn)
            }
            XenbusState::Connected => hooks.on_state_connected(&conn),
            XenbusState::Closing => hooks.on_state_closing(&conn),
            XenbusState::Closed => hooks.on_state_closed(&conn),
            XenbusState::Reconfiguring => hooks.on_state_reconfiguring(&conn),
            XenbusState::Reconfigured => hooks.on_state_reconfigured(&conn),
        }
    }

    fn set_backend_state(&self, state: XenbusState) -> Result<(), ConnectionError> {
        {
            let mut st = self.lock_state();
            if st.backend_state == state {
                return Ok(());
            }
            st.backend_state = state;
        }
        tracing::debug!(
            domid = self.domid,
            devid = self.devid,
            state = %state,
            "publishing backend state"
        );
        self.store.write_uint(&self.backend_state_key, state.raw() as u64)?;
        Ok(())
    }

    /// Enters the terminated condition: backend goes Closing (best effort)
    /// and stays unrecoverable. Idempotent; returns whether this call did the
    /// transition.
    fn fail(&self) -> bool {
        {
            let mut st = self.lock_state();
            if st.terminated {
                return false;
            }
            st.terminated = true;
        }
        let _ = self.set_backend_state(XenbusState::Closing);
        true
    }
}

/// Hook-side view of a [`FrontendConnection`].
///
/// Handed to every [`DeviceHooks`] invocation; also obtainable from the
/// owning side via [`FrontendConnection::connection`].
pub struct Connection {
    inner: Arc<ConnInner>,
}

impl Connection {
    /// The connection's own store session. Valid concurrently with dispatch,
    /// including from inside hooks.
    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn dom_id(&self) -> u32 {
        self.inner.domid
    }

    pub fn dev_id(&self) -> u32 {
        self.inner.devid
    }

    /// Frontend device directory, where the device reads ring configuration
    /// keys (ports, grant references) published by the frontend.
    pub fn frontend_path(&self) -> &str {
        &self.inner.frontend_path
    }

    /// Backend device directory, where device-specific backend keys live.
    pub fn backend_path(&self) -> &str {
        &self.inner.backend_path
    }

    /// Last state observed from the frontend.
    pub fn frontend_state(&self) -> XenbusState {
        self.inner.lock_state().frontend_state
    }

    /// State this backend last published.
    pub fn backend_state(&self) -> XenbusState {
        self.inner.lock_state().backend_state
    }

    /// Publishes a new backend state to the store. Publishing the current
    /// state again is a no-op. When the rings are up, the device typically
    /// publishes [`XenbusState::Connected`] from its `on_bind`.
    pub fn set_backend_state(&self, state: XenbusState) -> Result<(), ConnectionError> {
        self.inner.set_backend_state(state)
    }

    /// Hands a running ring channel to the connection, which owns it from
    /// here on and shuts it down at teardown.
    pub fn add_ring_channel(&self, channel: RingChannel) {
        tracing::debug!(
            domid = self.inner.domid,
            devid = self.inner.devid,
            port = channel.port(),
            "ring channel registered"
        );
        self.inner.lock_channels().push(channel);
    }

    /// Shuts the connection down: ring channels are closed and joined, the
    /// backend state runs through Closing to Closed, and the connection
    /// reports terminated from here on.
    pub fn close(&self) -> Result<(), ConnectionError> {
        let channels: Vec<RingChannel> = {
            let mut guard = self.inner.lock_channels();
            guard.drain(..).collect()
        };
        drop(channels);
        self.inner.set_backend_state(XenbusState::Closing)?;
        self.inner.set_backend_state(XenbusState::Closed)?;
        self.inner.lock_state().terminated = true;
        Ok(())
    }
}

/// One backend-side connection to one frontend instance.
///
/// Owns the store session, the state watch, and every ring channel the
/// device layer registers. Dropping it clears the watch (waiting out an
/// in-flight callback), joins the ring threads, publishes `Closed` best
/// effort, and releases the session.
pub struct FrontendConnection {
    inner: Arc<ConnInner>,
}

impl FrontendConnection {
    /// Opens the connection for device class `name`, frontend `domid`/`devid`,
    /// over its own store `session`. Publishes backend state Initialising and
    /// arms the frontend state watch; the initial notification drives the
    /// first dispatch even if the frontend never changes anything again.
    pub fn new(
        name: &str,
        backend_domid: u32,
        domid: u32,
        devid: u32,
        session: impl RawStore,
        hooks: impl DeviceHooks + 'static,
    ) -> Result<FrontendConnection, ConnectionError> {
        let store_failed = Arc::new(AtomicBool::new(false));
        let store = Store::with_error_callback(session, {
            let store_failed = store_failed.clone();
            move |err| {
                tracing::error!(domid, devid, "control store session failed: {err}");
                store_failed.store(true, Ordering::Release);
            }
        });

        let frontend_path = paths::frontend_device_path(&store.domain_path(domid), name, devid);
        let backend_path =
            paths::backend_device_path(&store.domain_path(backend_domid), name, domid, devid);
        let frontend_state_key = paths::state_key(&frontend_path);
        let backend_state_key = paths::state_key(&backend_path);

        let inner = Arc::new(ConnInner {
            store,
            domid,
            devid,
            frontend_path,
            backend_path,
            frontend_state_key,
            backend_state_key,
            state: Mutex::new(ConnState {
                frontend_state: XenbusState::Unknown,
                backend_state: XenbusState::Unknown,
                bound: false,
                terminated: false,
            }),
            channels: Mutex::new(Vec::new()),
            hooks: Mutex::new(Box::new(hooks)),
            store_failed,
        });

        inner.set_backend_state(XenbusState::Initialising)?;

        // The callback holds a weak reference: the store lives inside the
        // connection, so a strong one would cycle.
        let weak = Arc::downgrade(&inner);
        inner
            .store
            .set_watch(&inner.frontend_state_key, true, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.frontend_state_changed();
                }
            })?;

        tracing::debug!(domid, devid, name, "frontend connection opened");
        Ok(FrontendConnection { inner })
    }

    pub fn dom_id(&self) -> u32 {
        self.inner.domid
    }

    pub fn dev_id(&self) -> u32 {
        self.inner.devid
    }

    /// The hook-side facade, for owner code that wants the same surface the
    /// hooks see.
    pub fn connection(&self) -> Connection {
        Connection {
            inner: self.inner.clone(),
        }
    }

    /// Counter snapshots of the owned ring channels, in registration order.
    pub fn ring_stats(&self) -> Vec<xenbe_ring::RingStats> {
        self.inner
            .lock_channels()
            .iter()
            .map(RingChannel::stats)
            .collect()
    }

    /// Whether the connection can no longer make progress: the backend
    /// reached Closed, a hook or the store session failed, or an owned ring
    /// channel's processing thread died. The ring sweep happens here, so the
    /// supervisor polling this is what promotes a dead ring into a terminated
    /// connection.
    pub fn is_terminated(&self) -> bool {
        if self.inner.store_failed.load(Ordering::Acquire) {
            self.inner.fail();
        }
        let ring_dead = {
            let channels = self.inner.lock_channels();
            channels.iter().any(RingChannel::is_terminated)
        };
        if ring_dead && self.inner.fail() {
            tracing::error!(
                domid = self.inner.domid,
                devid = self.inner.devid,
                "ring channel died, terminating connection"
            );
        }
        let st = self.inner.lock_state();
        st.terminated || st.backend_state == XenbusState::Closed
    }
}

impl Drop for FrontendConnection {
    fn drop(&mut self) {
        // Clear the watch first: after this no hook can run, so the teardown
        // below cannot race a dispatch.
        let _ = self.inner.store.clear_watch(&self.inner.frontend_state_key);
        let channels: Vec<RingChannel> = {
            let mut guard = self.inner.lock_channels();
            guard.drain(..).collect()
        };
        drop(channels);
        let _ = self.inner.set_backend_state(XenbusState::Closed);
        tracing::debug!(
            domid = self.inner.domid,
            devid = self.inner.devid,
            "frontend connection closed"
        );
    }
}
