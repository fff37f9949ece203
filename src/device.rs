//! TUN device lifecycle and packet framing
//!
//! The device owns the OS handle and the published route state. Every
//! frame on the wire carries a 4-byte address-family header: bytes 0-2
//! are zero and byte 3 holds `AF_INET` or `AF_INET6` for the payload's IP
//! version. The header is prepended on write and stripped on read.
//!
//! Route state is reconciled against the kernel on startup
//! ([`TunDevice::activate`]) and on every accepted configuration reload,
//! while the forwarding path keeps resolving destinations through
//! [`TunDevice::lookup`] without ever blocking on a reconfiguration.

use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use ipnet::IpNet;
use regex::Regex;

use crate::config::ConfigSource;
use crate::error::{Error, Result};
use crate::platform::{RoutePlatform, TunHandle};
use crate::reconcile;
use crate::route::{Gateways, Route, RouteIndex};
use crate::store::RouteStore;
use crate::{AF_HEADER_LEN, DEFAULT_MTU};

/// Smallest MTU the device will accept, per RFC 791.
const MIN_MTU: u16 = 68;

fn device_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("^tun[0-9]+$").unwrap())
}

/// State shared between the device, its registered reload callback, and
/// the forwarding path.
struct DeviceState {
    name: String,
    vpn_networks: Vec<IpNet>,
    mtu: u16,
    store: RouteStore,
    platform: Arc<dyn RoutePlatform>,
}

impl DeviceState {
    /// Local endpoint used for every kernel route mutation.
    ///
    /// `vpn_networks` is validated non-empty at construction.
    // TODO: derive the endpoint from the prefix each route belongs to
    // instead of pinning the first vpn network (single-homed assumption
    // inherited from the daemon's route installer)
    fn route_endpoint(&self) -> IpAddr {
        self.vpn_networks[0].addr()
    }

    fn reload(&self, config: &dyn ConfigSource, initial: bool) -> Result<()> {
        let update = config.unsafe_routes(&self.vpn_networks, initial)?;
        if !initial && !update.changed {
            return Ok(());
        }

        let routes = update.routes;
        let index = RouteIndex::build(&routes);

        // Publish before touching the kernel so lookups already resolve
        // the new routes while the table converges.
        let old = self.store.publish(routes.clone(), index);

        if !initial {
            // Remove first; if the kernel drops a still-wanted route the
            // add pass below re-establishes it.
            let removed = reconcile::removed_routes(&routes, &old.routes);
            reconcile::remove_routes(self.platform.as_ref(), &removed, self.route_endpoint());

            if let Err(e) = reconcile::add_routes(
                self.platform.as_ref(),
                &routes,
                self.route_endpoint(),
                true,
            ) {
                log::error!("failed to add routes: {}", e);
            }
        }

        Ok(())
    }
}

/// The daemon's tun interface.
///
/// Reads and writes block on the OS handle and may run on separate
/// threads; lookups are lock-free and safe from any thread. Writes are
/// single-writer: the frame scratch is reused across calls and belongs to
/// one writer thread.
pub struct TunDevice {
    state: Arc<DeviceState>,
    handle: Option<Box<dyn TunHandle>>,
    /// Scratch frame reused across writes; grows, never shrinks.
    out: Mutex<Vec<u8>>,
}

impl TunDevice {
    /// Open `/dev/<tun.dev>` and bring the route state up.
    ///
    /// Fails when `tun.dev` is missing or not of the form `tunN`, when
    /// the device node cannot be opened, or when the initial route
    /// configuration cannot be applied. A half-configured device is never
    /// returned.
    pub fn open(
        config: &dyn ConfigSource,
        platform: Arc<dyn RoutePlatform>,
        vpn_networks: Vec<IpNet>,
    ) -> Result<TunDevice> {
        let name = config.get_string("tun.dev", "");
        validate_name(&name)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(format!("/dev/{}", name))
            .map_err(|source| Error::DeviceOpen {
                device: name,
                source,
            })?;

        Self::from_handle(config, platform, vpn_networks, Box::new(file))
    }

    /// Wrap an already-open handle.
    ///
    /// Used by tests and by embeddings where the handle is donated by the
    /// host environment; the lifecycle is otherwise identical to
    /// [`open`](TunDevice::open).
    pub fn from_handle(
        config: &dyn ConfigSource,
        platform: Arc<dyn RoutePlatform>,
        vpn_networks: Vec<IpNet>,
        handle: Box<dyn TunHandle>,
    ) -> Result<TunDevice> {
        let name = config.get_string("tun.dev", "");
        validate_name(&name)?;

        if vpn_networks.is_empty() {
            return Err(Error::Config(
                "at least one vpn network must be configured".into(),
            ));
        }

        let mtu = config.get_int("tun.mtu", i64::from(DEFAULT_MTU));
        let mtu = u16::try_from(mtu)
            .ok()
            .filter(|mtu| *mtu >= MIN_MTU)
            .ok_or_else(|| Error::Config(format!("invalid tun.mtu: {}", mtu)))?;

        let state = Arc::new(DeviceState {
            name,
            vpn_networks,
            mtu,
            store: RouteStore::new(),
            platform,
        });

        state.reload(config, true)?;

        let reload_state = Arc::clone(&state);
        config.register_reload_callback(Box::new(move |config: &dyn ConfigSource| {
            if let Err(e) = reload_state.reload(config, false) {
                log::error!("failed to reload tun device: {}", e);
            }
        }));

        Ok(TunDevice {
            state,
            handle: Some(handle),
            out: Mutex::new(Vec::new()),
        })
    }

    /// Assign the configured addresses and MTU and install the current
    /// routes.
    ///
    /// Runs the strict reconciliation mode: the first kernel failure
    /// aborts the pass and is returned to the caller.
    pub fn activate(&self) -> Result<()> {
        let state = &self.state;

        for network in &state.vpn_networks {
            state.platform.add_address(&state.name, network)?;
            state.platform.set_mtu(&state.name, state.mtu)?;
            // The connected route for the network itself.
            state.platform.add_route(network, network.addr())?;
        }

        reconcile::add_routes(
            state.platform.as_ref(),
            &state.store.snapshot(),
            state.route_endpoint(),
            false,
        )
    }

    /// Read one packet, stripping the address-family header.
    ///
    /// The header bytes are protocol-family metadata and are ignored.
    /// Returns the OS byte count minus the header length; handle errors
    /// surface unmodified.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let handle = self.handle()?;

        let mut frame = vec![0u8; buf.len() + AF_HEADER_LEN];
        let n = handle.read(&mut frame)?;

        let payload = n.saturating_sub(AF_HEADER_LEN);
        let copied = payload.min(buf.len());
        buf[..copied].copy_from_slice(&frame[AF_HEADER_LEN..AF_HEADER_LEN + copied]);
        Ok(payload)
    }

    /// Write one packet, prepending the address-family header.
    ///
    /// Single-writer: only one thread may call `write` at a time; the
    /// reused scratch frame belongs to that thread. The payload's top
    /// nibble selects the family; an empty payload is an I/O error and an
    /// unrecognized version a framing error, neither of which touches the
    /// handle or closes the device.
    pub fn write(&self, payload: &[u8]) -> Result<usize> {
        let handle = self.handle()?;

        if payload.is_empty() {
            return Err(Error::Io(io::Error::from_raw_os_error(libc::EIO)));
        }

        let family = match payload[0] >> 4 {
            4 => libc::AF_INET,
            6 => libc::AF_INET6,
            _ => {
                return Err(Error::Framing(
                    "unable to determine IP version from packet".into(),
                ))
            }
        };

        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let frame_len = payload.len() + AF_HEADER_LEN;
        if out.len() < frame_len {
            out.resize(frame_len, 0);
        }

        let frame = &mut out[..frame_len];
        frame[..AF_HEADER_LEN].fill(0);
        frame[AF_HEADER_LEN - 1] = family as u8;
        frame[AF_HEADER_LEN..].copy_from_slice(payload);

        let n = handle.write(frame)?;
        Ok(n.saturating_sub(AF_HEADER_LEN))
    }

    /// Gateways for `addr` in the current routing generation, or empty
    /// when no unsafe route covers it. Lock-free.
    pub fn lookup(&self, addr: IpAddr) -> Gateways {
        self.state.store.lookup(addr)
    }

    /// The overlay networks assigned to this interface.
    pub fn networks(&self) -> &[IpNet] {
        &self.state.vpn_networks
    }

    /// The interface name.
    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// The configured MTU.
    pub fn mtu(&self) -> u16 {
        self.state.mtu
    }

    /// A clone of the currently configured route set.
    pub fn routes(&self) -> Vec<Route> {
        self.state.store.snapshot()
    }

    /// Release the OS handle. Closing an already-closed device is a
    /// no-op.
    pub fn close(&mut self) {
        self.handle = None;
    }

    fn handle(&self) -> Result<&dyn TunHandle> {
        self.handle.as_deref().ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "tun device is closed",
            ))
        })
    }
}

impl fmt::Debug for TunDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunDevice")
            .field("name", &self.state.name)
            .field("mtu", &self.state.mtu)
            .field("vpn_networks", &self.state.vpn_networks)
            .field("open", &self.handle.is_some())
            .finish()
    }
}

fn validate_name(name: &str) -> Result<()> {
    if !device_name_pattern().is_match(name) {
        return Err(Error::Config(
            "a device name in the format of tunN must be specified".into(),
        ));
    }
    Ok(())
}
