//! Mock collaborators for testing
//!
//! Recording fakes for the configuration source, the kernel route
//! platform, and the raw device handle. Together they let the full device
//! lifecycle — open, activate, reload, packet I/O — run in tests without
//! a real interface, without touching the system route table, and without
//! elevated privileges.
//!
//! # Example
//!
//! ```ignore
//! use bramble_tun::mock::{MockConfig, MockRoutePlatform, MockTunHandle};
//! use bramble_tun::TunDevice;
//! use std::sync::Arc;
//!
//! let config = MockConfig::new("tun0");
//! let platform = Arc::new(MockRoutePlatform::new());
//! let handle = Arc::new(MockTunHandle::new());
//!
//! let device = TunDevice::from_handle(
//!     &config,
//!     platform.clone(),
//!     vec!["10.0.0.1/24".parse().unwrap()],
//!     Box::new(handle.clone()),
//! )?;
//!
//! device.activate()?;
//! assert!(!platform.calls().is_empty());
//! ```

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ipnet::IpNet;

use crate::config::{ConfigSource, ReloadCallback, RouteUpdate};
use crate::error::{Error, Result};
use crate::platform::{RoutePlatform, TunHandle};
use crate::route::Route;

/// In-memory configuration source with settable values and a manual
/// reload trigger.
pub struct MockConfig {
    strings: Mutex<HashMap<String, String>>,
    ints: Mutex<HashMap<String, i64>>,
    routes: Mutex<Vec<Route>>,
    changed: AtomicBool,
    route_error: Mutex<Option<String>>,
    callbacks: Mutex<Vec<ReloadCallback>>,
    /// `initial` flag of every route query, in order.
    queries: Mutex<Vec<bool>>,
}

impl MockConfig {
    /// Create a config with `tun.dev` preset to `device`.
    pub fn new(device: &str) -> Self {
        let config = Self {
            strings: Mutex::new(HashMap::new()),
            ints: Mutex::new(HashMap::new()),
            routes: Mutex::new(Vec::new()),
            changed: AtomicBool::new(false),
            route_error: Mutex::new(None),
            callbacks: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
        };
        if !device.is_empty() {
            config.set_string("tun.dev", device);
        }
        config
    }

    pub fn set_string(&self, key: &str, value: &str) {
        self.strings
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn set_int(&self, key: &str, value: i64) {
        self.ints.lock().unwrap().insert(key.to_string(), value);
    }

    /// Replace the route set the next query returns, and whether it is
    /// reported as changed.
    pub fn set_routes(&self, routes: Vec<Route>, changed: bool) {
        *self.routes.lock().unwrap() = routes;
        self.changed.store(changed, Ordering::SeqCst);
    }

    /// Set only the change flag for the next query.
    pub fn set_changed(&self, changed: bool) {
        self.changed.store(changed, Ordering::SeqCst);
    }

    /// Make every subsequent route query fail with `message`.
    pub fn fail_routes(&self, message: &str) {
        *self.route_error.lock().unwrap() = Some(message.to_string());
    }

    /// Run every registered reload callback against this config, the way
    /// the daemon does after a configuration file change.
    pub fn fire_reload(&self) {
        let callbacks = self.callbacks.lock().unwrap();
        for callback in callbacks.iter() {
            callback(self);
        }
    }

    /// Number of registered reload callbacks.
    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().unwrap().len()
    }

    /// The `initial` flag of every route query so far.
    pub fn queries(&self) -> Vec<bool> {
        self.queries.lock().unwrap().clone()
    }
}

impl ConfigSource for MockConfig {
    fn get_string(&self, key: &str, default: &str) -> String {
        self.strings
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    fn get_int(&self, key: &str, default: i64) -> i64 {
        self.ints.lock().unwrap().get(key).copied().unwrap_or(default)
    }

    fn unsafe_routes(&self, _vpn_networks: &[IpNet], initial: bool) -> Result<RouteUpdate> {
        self.queries.lock().unwrap().push(initial);

        if let Some(message) = self.route_error.lock().unwrap().clone() {
            return Err(Error::Config(message));
        }

        Ok(RouteUpdate {
            changed: self.changed.load(Ordering::SeqCst),
            routes: self.routes.lock().unwrap().clone(),
        })
    }

    fn register_reload_callback(&self, callback: ReloadCallback) {
        self.callbacks.lock().unwrap().push(callback);
    }
}

/// A recorded kernel call, in invocation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    AddAddress { device: String, prefix: IpNet },
    SetMtu { device: String, mtu: u16 },
    AddRoute { dest: IpNet, local: IpAddr },
    RemoveRoute { dest: IpNet, local: IpAddr },
}

/// Recording fake for the kernel route platform.
///
/// Every call is recorded even when failure injection makes it return an
/// error, so tests can assert both what was attempted and where a pass
/// stopped.
#[derive(Default)]
pub struct MockRoutePlatform {
    calls: Mutex<Vec<PlatformCall>>,
    fail_addresses: AtomicBool,
    fail_add_routes: AtomicBool,
    fail_remove_routes: AtomicBool,
}

impl MockRoutePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_addresses(&self, fail: bool) {
        self.fail_addresses.store(fail, Ordering::SeqCst);
    }

    pub fn fail_add_routes(&self, fail: bool) {
        self.fail_add_routes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_remove_routes(&self, fail: bool) {
        self.fail_remove_routes.store(fail, Ordering::SeqCst);
    }

    /// All recorded calls, in order.
    pub fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Destinations of every recorded route add, in order.
    pub fn added_routes(&self) -> Vec<IpNet> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PlatformCall::AddRoute { dest, .. } => Some(dest),
                _ => None,
            })
            .collect()
    }

    /// Destinations of every recorded route delete, in order.
    pub fn removed_routes(&self) -> Vec<IpNet> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PlatformCall::RemoveRoute { dest, .. } => Some(dest),
                _ => None,
            })
            .collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: PlatformCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl RoutePlatform for MockRoutePlatform {
    fn add_address(&self, device: &str, prefix: &IpNet) -> Result<()> {
        self.record(PlatformCall::AddAddress {
            device: device.to_string(),
            prefix: *prefix,
        });
        if self.fail_addresses.load(Ordering::SeqCst) {
            return Err(Error::Route("injected address failure".into()));
        }
        Ok(())
    }

    fn set_mtu(&self, device: &str, mtu: u16) -> Result<()> {
        self.record(PlatformCall::SetMtu {
            device: device.to_string(),
            mtu,
        });
        Ok(())
    }

    fn add_route(&self, dest: &IpNet, local: IpAddr) -> Result<()> {
        self.record(PlatformCall::AddRoute { dest: *dest, local });
        if self.fail_add_routes.load(Ordering::SeqCst) {
            return Err(Error::Route("injected add failure".into()));
        }
        Ok(())
    }

    fn remove_route(&self, dest: &IpNet, local: IpAddr) -> Result<()> {
        self.record(PlatformCall::RemoveRoute { dest: *dest, local });
        if self.fail_remove_routes.load(Ordering::SeqCst) {
            return Err(Error::Route("injected remove failure".into()));
        }
        Ok(())
    }
}

/// In-memory device handle with frame injection and capture.
///
/// Frames written through the handle are recorded verbatim (header
/// included); frames queued with [`inject`](MockTunHandle::inject) are
/// returned by subsequent reads. An empty queue reads as `WouldBlock`
/// rather than blocking the test.
#[derive(Default)]
pub struct MockTunHandle {
    recv_queue: Mutex<VecDeque<Vec<u8>>>,
    written: Mutex<Vec<Vec<u8>>>,
    peer: Mutex<Option<Arc<MockTunHandle>>>,
    write_error: Mutex<Option<io::ErrorKind>>,
}

impl MockTunHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create two handles wired together: frames written to one are
    /// queued for reading on the other.
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let a = Arc::new(Self::new());
        let b = Arc::new(Self::new());
        *a.peer.lock().unwrap() = Some(Arc::clone(&b));
        *b.peer.lock().unwrap() = Some(Arc::clone(&a));
        (a, b)
    }

    /// Queue a raw frame for the next read.
    pub fn inject(&self, frame: Vec<u8>) {
        self.recv_queue.lock().unwrap().push_back(frame);
    }

    /// Every frame written so far, header included.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().unwrap().clone()
    }

    /// Whether any frames are queued for reading.
    pub fn has_pending(&self) -> bool {
        !self.recv_queue.lock().unwrap().is_empty()
    }

    /// Make every subsequent write fail with `kind`.
    pub fn fail_writes(&self, kind: io::ErrorKind) {
        *self.write_error.lock().unwrap() = Some(kind);
    }
}

impl TunHandle for MockTunHandle {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let frame = self
            .recv_queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::WouldBlock, "no frames queued"))?;

        let n = frame.len().min(buf.len());
        buf[..n].copy_from_slice(&frame[..n]);
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        if let Some(kind) = *self.write_error.lock().unwrap() {
            return Err(io::Error::new(kind, "injected write failure"));
        }

        self.written.lock().unwrap().push(buf.to_vec());

        if let Some(peer) = self.peer.lock().unwrap().as_ref() {
            peer.inject(buf.to_vec());
        }

        Ok(buf.len())
    }
}

impl TunHandle for Arc<MockTunHandle> {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.as_ref().read(buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.as_ref().write(buf)
    }
}
