//! Backend supervisor: discovers frontend instances and owns their
//! connections.
//!
//! The toolstack materializes one directory per frontend under
//! `<backend home>/backend/<name>/<domid>/<devid>`. [`Backend::poll_once`]
//! sweeps that tree, opens a [`FrontendConnection`] for every unseen pair
//! (with hooks from the [`FrontendFactory`] and a fresh store session), and
//! reaps connections that report terminated. The supervisor owns no thread;
//! the caller decides when to sweep.

use crate::error::ConnectionError;
use crate::frontend::FrontendConnection;
use crate::hooks::DeviceHooks;
use crate::paths;
use std::collections::HashMap;
use xenbe_store::{RawStore, Store};

/// Identity of one backend process.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Device-class name as it appears in store paths, e.g. `vsnd`.
    pub name: String,
    /// Domain the backend runs in.
    pub backend_domid: u32,
}

/// Builds the device layer for one discovered frontend.
pub trait FrontendFactory: Send {
    fn create(&mut self, domid: u32, devid: u32) -> Result<Box<dyn DeviceHooks>, ConnectionError>;
}

impl<F> FrontendFactory for F
where
    F: FnMut(u32, u32) -> Result<Box<dyn DeviceHooks>, ConnectionError> + Send,
{
    fn create(&mut self, domid: u32, devid: u32) -> Result<Box<dyn DeviceHooks>, ConnectionError> {
        self(domid, devid)
    }
}

/// Supervisor for every frontend of one device class.
pub struct Backend {
    config: BackendConfig,
    store: Store,
    sessions: Box<dyn FnMut() -> Box<dyn RawStore> + Send>,
    factory: Box<dyn FrontendFactory>,
    connections: HashMap<(u32, u32), FrontendConnection>,
}

impl Backend {
    /// `sessions` opens a fresh store session on demand: one is taken here
    /// for discovery, and every connection gets its own.
    pub fn new(
        config: BackendConfig,
        mut sessions: impl FnMut() -> Box<dyn RawStore> + Send + 'static,
        factory: impl FrontendFactory + 'static,
    ) -> Backend {
        let store = Store::new(sessions());
        Backend {
            config,
            store,
            sessions: Box::new(sessions),
            factory: Box::new(factory),
            connections: HashMap::new(),
        }
    }

    /// The supervisor's own store session.
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// One reap-then-discover sweep. Returns the number of live connections.
    ///
    /// A frontend whose setup fails is logged and skipped; it does not abort
    /// the sweep or touch the other connections, and it is retried on the
    /// next sweep.
    pub fn poll_once(&mut self) -> Result<usize, ConnectionError> {
        self.connections.retain(|&(domid, devid), conn| {
            if conn.is_terminated() {
                tracing::info!(domid, devid, "reaping terminated frontend connection");
                false
            } else {
                true
            }
        });

        let root = paths::backend_root(
            &self.store.domain_path(self.config.backend_domid),
            &self.config.name,
        );
        for dom_entry in self.store.read_directory(&root)? {
            let Ok(domid) = dom_entry.parse::<u32>() else {
                tracing::warn!(entry = dom_entry.as_str(), "ignoring non-numeric domain entry");
                continue;
            };
            for dev_entry in self.store.read_directory(&format!("{root}/{dom_entry}"))? {
                let Ok(devid) = dev_entry.parse::<u32>() else {
                    tracing::warn!(
                        entry = dev_entry.as_str(),
                        "ignoring non-numeric device entry"
                    );
                    continue;
                };
                if self.connections.contains_key(&(domid, devid)) {
                    continue;
                }
                match self.open_connection(domid, devid) {
                    Ok(conn) => {
                        tracing::info!(domid, devid, "frontend discovered");
                        self.connections.insert((domid, devid), conn);
                    }
                    Err(err) => {
                        tracing::error!(domid, devid, "frontend setup failed: {err}");
                    }
                }
            }
        }
        Ok(self.connections.len())
    }

    fn open_connection(
        &mut self,
        domid: u32,
        devid: u32,
    ) -> Result<FrontendConnection, ConnectionError> {
        let hooks = self.factory.create(domid, devid)?;
        FrontendConnection::new(
            &self.config.name,
            self.config.backend_domid,
            domid,
            devid,
            (self.sessions)(),
            hooks,
        )
    }
}
