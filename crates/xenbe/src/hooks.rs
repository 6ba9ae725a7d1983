use crate::error::ConnectionError;
use crate::frontend::Connection;

/// Device-layer capability interface of a [`crate::FrontendConnection`].
///
/// The connection dispatches one hook per distinct frontend state it
/// observes, on the store's dispatch thread, serially. `on_bind` is the one
/// required method: it fires once, the first time the frontend reaches
/// `Initialised`, and is where the device reads its ring configuration from
/// the store and registers ring channels via
/// [`Connection::add_ring_channel`]. Everything else defaults to a no-op.
///
/// An `Err` out of any hook is caught at the connection boundary: logged, the
/// backend state driven to `Closing`, the connection marked terminated. It
/// never reaches the shared dispatch thread.
pub trait DeviceHooks: Send {
    /// Reads channel configuration and brings the rings up. Typical devices
    /// finish by publishing `Connected` through
    /// [`Connection::set_backend_state`].
    fn on_bind(&mut self, conn: &Connection) -> Result<(), ConnectionError>;

    fn on_state_initialising(&mut self, conn: &Connection) -> Result<(), ConnectionError> {
        let _ = conn;
        Ok(())
    }

    fn on_state_init_wait(&mut self, conn: &Connection) -> Result<(), ConnectionError> {
        let _ = conn;
        Ok(())
    }

    fn on_state_initialised(&mut self, conn: &Connection) -> Result<(), ConnectionError> {
        let _ = conn;
        Ok(())
    }

    fn on_state_connected(&mut self, conn: &Connection) -> Result<(), ConnectionError> {
        let _ = conn;
        Ok(())
    }

    fn on_state_closing(&mut self, conn: &Connection) -> Result<(), ConnectionError> {
        let _ = conn;
        Ok(())
    }

    fn on_state_closed(&mut self, conn: &Connection) -> Result<(), ConnectionError> {
        let _ = conn;
        Ok(())
    }

    fn on_state_reconfiguring(&mut self, conn: &Connection) -> Result<(), ConnectionError> {
        let _ = conn;
        Ok(())
    }

    fn on_state_reconfigured(&mut self, conn: &Connection) -> Result<(), ConnectionError> {
        let _ = conn;
        Ok(())
    }
}

impl DeviceHooks for Box<dyn DeviceHooks> {
    fn on_bind(&mut self, conn: &Connection) -> Result<(), ConnectionError> {
        (**self).on_bind(conn)
    }

    fn on_state_initialising(&mut self, conn: &Connection) -> Result<(), ConnectionError> {
        (**self).on_state_initialising(conn)
    }

    fn on_state_init_wait(&mut self, conn: &Connection) -> Result<(), ConnectionError> {
        (**self).on_state_init_wait(conn)
    }

    fn on_state_initialised(&mut self, conn: &Connection) -> Result<(), ConnectionError> {
        (**self).on_state_initialised(conn)
    }

    fn on_state_connected(&mut self, conn: &Connection) -> Result<(), ConnectionError> {
        (**self).on_state_connected(conn)
    }

    fn on_state_closing(&mut self, conn: &Connection) -> Result<(), ConnectionError> {
        (**self).on_state_closing(conn)
    }

    fn on_state_closed(&mut self, conn: &Connection) -> Result<(), ConnectionError> {
        (**self).on_state_closed(conn)
    }

    fn on_state_reconfiguring(&mut self, conn: &Connection) -> Result<(), ConnectionError> {
        (**self).on_state_reconfiguring(conn)
    }

    fn on_state_reconfigured(&mut self, conn: &Connection) -> Result<(), ConnectionError> {
        (**self).on_state_reconfigured(conn)
    }
}
