//! TUN interface and unsafe-route management for the Bramble overlay
//! daemon
//!
//! This crate owns the daemon's virtual network interface: it opens the
//! device node, frames raw IP packets with the platform's 4-byte
//! address-family header, maintains the configured set of unsafe routes
//! (networks reachable only through overlay gateways), and keeps the
//! kernel routing table synchronized with that configuration across
//! reloads.
//!
//! # Architecture
//!
//! - [`route`]: the route model and the immutable longest-prefix-match
//!   index built from each configuration generation
//! - [`store`]: the atomically swapped snapshot/index pair serving
//!   lock-free lookups to the forwarding path
//! - [`reconcile`]: the remove-before-add diff applied to the kernel
//!   table on every accepted reload
//! - [`platform`]: the narrow seams to the OS — route commands and the
//!   raw device byte stream
//! - [`device`]: the lifecycle controller and per-packet framing adapter
//! - [`mock`]: recording fakes for all collaborators, used by this
//!   crate's own tests and available to embedders
//!
//! # Concurrency
//!
//! Packet reads and writes block on the OS handle and are expected to run
//! on dedicated worker threads; route lookups are wait-free from any
//! thread; reconciliation runs on whichever thread delivers the
//! configuration reload and blocks on one external command per route.
//! Writes are single-writer: the frame scratch is reused across calls and
//! belongs to exactly one writer thread.
//!
//! # Example
//!
//! ```ignore
//! use bramble_tun::{CommandRoutes, TunDevice};
//! use std::sync::Arc;
//!
//! let device = TunDevice::open(&config, Arc::new(CommandRoutes::new()), networks)?;
//! device.activate()?;
//!
//! let mut buf = vec![0u8; device.mtu() as usize];
//! let n = device.read(&mut buf)?;
//! let gateways = device.lookup(destination_of(&buf[..n]));
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod mock;
pub mod platform;
pub mod reconcile;
pub mod route;
pub mod store;

pub use config::{ConfigSource, ReloadCallback, RouteUpdate};
pub use device::TunDevice;
pub use error::{Error, Result};
pub use platform::{CommandRoutes, RoutePlatform, TunHandle};
pub use route::{Gateway, Gateways, Route, RouteIndex};
pub use store::{RouteGeneration, RouteStore};

/// Default MTU assigned to the interface when `tun.mtu` is not set.
pub const DEFAULT_MTU: u16 = 1300;

/// Length of the address-family header on every frame crossing the
/// device node.
pub const AF_HEADER_LEN: usize = 4;
