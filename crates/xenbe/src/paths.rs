//! Control-store path scheme shared by both halves of a split device.
//!
//! A frontend for device class `name`, instance `devid`, in domain `domid`
//! lives under `<domain home>/device/<name>/<devid>`; the backend's mirror
//! lives under `<backend domain home>/backend/<name>/<domid>/<devid>`. The
//! domain home comes from the store session (`/local/domain/<d>` on a real
//! store). Each half publishes its connection state under its own `state`
//! key.

/// Frontend device directory inside the frontend domain's home.
pub fn frontend_device_path(domain_home: &str, name: &str, devid: u32) -> String {
    format!("{domain_home}/device/{name}/{devid}")
}

/// Backend device directory inside the backend domain's home.
pub fn backend_device_path(backend_home: &str, name: &str, domid: u32, devid: u32) -> String {
    format!("{backend_home}/backend/{name}/{domid}/{devid}")
}

/// Root the supervisor enumerates: one child directory per frontend domain,
/// each holding one child per device instance.
pub fn backend_root(backend_home: &str, name: &str) -> String {
    format!("{backend_home}/backend/{name}")
}

/// The connection-state key under a device directory.
pub fn state_key(device_path: &str) -> String {
    format!("{device_path}/state")
}
