//! Shared fixtures for the connection-layer tests: a hook recorder, an echo
//! device that brings a ring up from store configuration, and the frontend
//! side of the handshake.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use xenbe::{Connection, ConnectionError, DeviceHooks, XenbusState};
use xenbe_ring::sim::{EventBus, FrontendRing, GrantSpace};
use xenbe_ring::{RecordFault, RingChannel, RingHandler, RingLayout, ResponseSink};
use xenbe_store::MemSession;
use xenbe_store::RawStore;

pub const SLOT: usize = 32;

/// Spins until `cond` holds, failing the test after two seconds.
pub fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Long enough for any stray dispatch iteration to have landed.
pub fn settle() {
    thread::sleep(Duration::from_millis(150));
}

pub fn frontend_path(name: &str, domid: u32, devid: u32) -> String {
    xenbe::paths::frontend_device_path(&format!("/local/domain/{domid}"), name, devid)
}

pub fn backend_path(name: &str, backend_domid: u32, domid: u32, devid: u32) -> String {
    xenbe::paths::backend_device_path(
        &format!("/local/domain/{backend_domid}"),
        name,
        domid,
        devid,
    )
}

/// Publishes the frontend's state value, as the guest driver would.
pub fn write_frontend_state(session: &MemSession, name: &str, domid: u32, devid: u32, value: i64) {
    let key = xenbe::paths::state_key(&frontend_path(name, domid, devid));
    session.write(&key, &value.to_string()).unwrap();
}

/// Reads the state the backend published, if any.
pub fn read_backend_state(
    session: &MemSession,
    name: &str,
    backend_domid: u32,
    domid: u32,
    devid: u32,
) -> Option<i64> {
    let key = xenbe::paths::state_key(&backend_path(name, backend_domid, domid, devid));
    session
        .read(&key)
        .unwrap()
        .map(|value| value.parse().unwrap())
}

/// Records every hook invocation; optionally fails one hook by name.
pub struct RecordingHooks {
    pub log: Arc<Mutex<Vec<&'static str>>>,
    pub fail_on: Option<&'static str>,
}

impl RecordingHooks {
    pub fn new(log: Arc<Mutex<Vec<&'static str>>>) -> RecordingHooks {
        RecordingHooks { log, fail_on: None }
    }

    fn note(&mut self, name: &'static str) -> Result<(), ConnectionError> {
        self.log.lock().unwrap().push(name);
        if self.fail_on == Some(name) {
            return Err(ConnectionError::device(format!("injected {name} failure")));
        }
        Ok(())
    }
}

impl DeviceHooks for RecordingHooks {
    fn on_bind(&mut self, _conn: &Connection) -> Result<(), ConnectionError> {
        self.note("bind")
    }

    fn on_state_initialising(&mut self, _conn: &Connection) -> Result<(), ConnectionError> {
        self.note("initialising")
    }

    fn on_state_init_wait(&mut self, _conn: &Connection) -> Result<(), ConnectionError> {
        self.note("init_wait")
    }

    fn on_state_initialised(&mut self, _conn: &Connection) -> Result<(), ConnectionError> {
        self.note("initialised")
    }

    fn on_state_connected(&mut self, _conn: &Connection) -> Result<(), ConnectionError> {
        self.note("connected")
    }

    fn on_state_closing(&mut self, _conn: &Connection) -> Result<(), ConnectionError> {
        self.note("closing")
    }

    fn on_state_closed(&mut self, _conn: &Connection) -> Result<(), ConnectionError> {
        self.note("closed")
    }

    fn on_state_reconfiguring(&mut self, _conn: &Connection) -> Result<(), ConnectionError> {
        self.note("reconfiguring")
    }

    fn on_state_reconfigured(&mut self, _conn: &Connection) -> Result<(), ConnectionError> {
        self.note("reconfigured")
    }
}

/// Echoes every request slot back as one response.
pub struct Echo;

impl RingHandler for Echo {
    fn on_request(
        &mut self,
        payload: &[u8],
        sink: &mut ResponseSink<'_>,
    ) -> Result<(), RecordFault> {
        sink.push(payload)
            .map_err(|err| RecordFault::new(format!("echo push failed: {err}")))
    }
}

/// Minimal device: on bind, read `event-channel` and `ring-ref` from the
/// frontend directory, map the grants, bind the port, start an echo ring,
/// publish Connected.
pub struct EchoDevice {
    pub grants: GrantSpace,
    pub bus: EventBus,
    pub layout: RingLayout,
}

impl DeviceHooks for EchoDevice {
    fn on_bind(&mut self, conn: &Connection) -> Result<(), ConnectionError> {
        let front = conn.frontend_path().to_string();
        let port = conn.store().read_uint(&format!("{front}/event-channel"))? as u32;
        let refs_value = conn.store().read_string(&format!("{front}/ring-ref"))?;
        let mut refs = Vec::new();
        for item in refs_value.split_whitespace() {
            refs.push(
                item.parse::<u32>()
                    .map_err(|_| ConnectionError::device(format!("bad ring-ref {item:?}")))?,
            );
        }
        let region = self
            .grants
            .map(&refs)
            .map_err(|err| ConnectionError::Ring(err.into()))?;
        let channel = self
            .bus
            .bind(port)
            .map_err(|err| ConnectionError::Ring(err.into()))?;
        conn.add_ring_channel(RingChannel::new(region, channel, self.layout, Echo)?);
        conn.set_backend_state(XenbusState::Connected)?;
        Ok(())
    }
}

/// Frontend-side fixture: grants a page, allocates a port, publishes the
/// ring configuration and maps its own end of everything.
pub struct SimFrontend {
    pub session: MemSession,
    pub ring: FrontendRing,
    pub refs: Vec<u32>,
    name: String,
    domid: u32,
    devid: u32,
}

impl SimFrontend {
    pub fn provision(
        session: MemSession,
        name: &str,
        domid: u32,
        devid: u32,
        grants: &GrantSpace,
        bus: &EventBus,
        layout: RingLayout,
    ) -> SimFrontend {
        let refs = grants.grant_pages(1);
        let port = bus.allocate_port();
        let front = frontend_path(name, domid, devid);
        let refs_value = refs
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        session
            .write(&format!("{front}/ring-ref"), &refs_value)
            .unwrap();
        session
            .write(&format!("{front}/event-channel"), &port.to_string())
            .unwrap();
        let ring = FrontendRing::new(grants.map(&refs).unwrap(), bus.bind(port).unwrap(), layout)
            .unwrap();
        SimFrontend {
            session,
            ring,
            refs,
            name: name.to_string(),
            domid,
            devid,
        }
    }

    /// Publishes a frontend state value.
    pub fn set_state(&self, state: XenbusState) {
        write_frontend_state(
            &self.session,
            &self.name,
            self.domid,
            self.devid,
            state.raw() as i64,
        );
    }

    /// One request/response round trip through the ring.
    pub fn round_trip(&mut self, payload: &[u8]) -> Vec<u8> {
        self.ring.push_request(payload).unwrap();
        self.ring.kick().unwrap();
        self.ring
            .wait_response(Duration::from_secs(2))
            .unwrap()
            .expect("no response within the deadline")
    }
}
