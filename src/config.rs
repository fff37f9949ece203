//! Configuration collaborator surface
//!
//! The daemon owns configuration loading, parsing, and file watching;
//! this crate consumes that machinery through [`ConfigSource`]. The
//! device registers exactly one reload callback at construction, closing
//! over its own shared state rather than any process-wide global.

use ipnet::IpNet;

use crate::error::Result;
use crate::route::Route;

/// Callback invoked with the live configuration after each accepted
/// reload.
pub type ReloadCallback = Box<dyn Fn(&dyn ConfigSource) + Send + Sync>;

/// Answer to a route query: the full current set plus whether it differs
/// from the previous answer.
#[derive(Debug, Clone)]
pub struct RouteUpdate {
    /// True when the set differs from the last non-initial query
    pub changed: bool,
    /// The complete configured route set
    pub routes: Vec<Route>,
}

/// The slice of daemon configuration this crate consumes.
pub trait ConfigSource: Send + Sync {
    /// String value for `key`, or `default` when unset.
    fn get_string(&self, key: &str, default: &str) -> String;

    /// Integer value for `key`, or `default` when unset.
    fn get_int(&self, key: &str, default: i64) -> i64;

    /// The full unsafe-route set for a device bound to `vpn_networks`.
    ///
    /// Change detection lives behind this trait: a `changed` of false on
    /// a non-initial query makes the device skip the reload outright, no
    /// index rebuild and no kernel calls.
    fn unsafe_routes(&self, vpn_networks: &[IpNet], initial: bool) -> Result<RouteUpdate>;

    /// Register `callback` to run after each accepted configuration
    /// reload.
    fn register_reload_callback(&self, callback: ReloadCallback);
}
