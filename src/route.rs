//! Route model and longest-prefix-match index
//!
//! An unsafe route describes a destination network that is only reachable
//! through one or more overlay gateways, as opposed to the networks the
//! interface owns directly. The configured route set is compiled into a
//! [`RouteIndex`] once per configuration generation; the index is
//! immutable after construction and is replaced wholesale on reload.

use std::fmt;
use std::net::IpAddr;

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use prefix_trie::PrefixMap;

/// A single next-hop candidate for an unsafe route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gateway {
    /// Overlay address of the gateway host
    pub addr: IpAddr,
    /// Relative weight among this route's gateways
    pub weight: u32,
}

impl Gateway {
    /// Create a gateway with the default weight.
    pub fn new(addr: IpAddr) -> Self {
        Self { addr, weight: 1 }
    }

    /// Create a gateway with an explicit weight.
    pub fn with_weight(addr: IpAddr, weight: u32) -> Self {
        Self { addr, weight }
    }
}

impl fmt::Display for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.weight == 1 {
            write!(f, "{}", self.addr)
        } else {
            write!(f, "{} ({})", self.addr, self.weight)
        }
    }
}

/// The resolved next-hop candidates for a destination address.
///
/// Empty when no configured route covers the address. Weighted selection
/// among the candidates is the forwarding path's concern; this crate only
/// stores and returns them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Gateways(Vec<Gateway>);

impl Gateways {
    /// The empty candidate set.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Gateway> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Gateway] {
        &self.0
    }
}

impl From<Vec<Gateway>> for Gateways {
    fn from(gateways: Vec<Gateway>) -> Self {
        Self(gateways)
    }
}

impl fmt::Display for Gateways {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, gw) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", gw)?;
        }
        Ok(())
    }
}

/// One routable destination block from the daemon configuration.
///
/// Route identity for reload diffing is the whole value: two routes are
/// the same route only if destination, gateways, MTU override, and
/// install flag all match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Destination network
    pub cidr: IpNet,
    /// Next-hop candidates; empty means the route is lookup-only
    pub via: Vec<Gateway>,
    /// Per-route MTU override; overriding routes are never installed
    pub mtu: Option<u16>,
    /// Whether the route should be materialized in the kernel table
    pub install: bool,
}

impl Route {
    pub fn new(cidr: IpNet, via: Vec<Gateway>, install: bool) -> Self {
        Self {
            cidr,
            via,
            mtu: None,
            install,
        }
    }

    /// Attach a per-route MTU override.
    pub fn with_mtu(mut self, mtu: u16) -> Self {
        self.mtu = Some(mtu);
        self
    }

    /// Whether this route is eligible for kernel installation.
    ///
    /// Routes without a gateway and routes carrying an MTU override exist
    /// only for internal lookup resolution and must never reach the
    /// kernel table.
    pub fn installable(&self) -> bool {
        self.install && !self.via.is_empty() && self.mtu.is_none()
    }

    /// The gateway set this route resolves to.
    pub fn gateways(&self) -> Gateways {
        Gateways(self.via.clone())
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cidr)?;
        if !self.via.is_empty() {
            write!(f, " via {}", Gateways(self.via.clone()))?;
        }
        if let Some(mtu) = self.mtu {
            write!(f, " mtu {}", mtu)?;
        }
        if !self.install {
            write!(f, " (lookup only)")?;
        }
        Ok(())
    }
}

/// Immutable longest-prefix-match index over one route generation.
///
/// Built once from a full snapshot, never mutated afterwards. Lookups
/// walk one prefix trie per address family; overlapping prefixes are
/// resolved by specificity, never by insertion order. Prefixes with equal
/// bits and length are the same route, so ties cannot occur.
pub struct RouteIndex {
    v4: PrefixMap<Ipv4Net, Gateways>,
    v6: PrefixMap<Ipv6Net, Gateways>,
}

impl RouteIndex {
    /// Build an index from a route snapshot.
    ///
    /// Pure: reads only the snapshot and cannot fail for a well-formed
    /// one.
    pub fn build(routes: &[Route]) -> Self {
        let mut v4 = PrefixMap::new();
        let mut v6 = PrefixMap::new();

        for route in routes {
            match route.cidr {
                IpNet::V4(net) => {
                    v4.insert(net, route.gateways());
                }
                IpNet::V6(net) => {
                    v6.insert(net, route.gateways());
                }
            }
        }

        Self { v4, v6 }
    }

    /// Gateways of the most specific route covering `addr`, or empty when
    /// no route covers it.
    pub fn lookup(&self, addr: IpAddr) -> Gateways {
        match addr {
            IpAddr::V4(addr) => self
                .v4
                .get_lpm(&Ipv4Net::from(addr))
                .map(|(_, gateways)| gateways.clone()),
            IpAddr::V6(addr) => self
                .v6
                .get_lpm(&Ipv6Net::from(addr))
                .map(|(_, gateways)| gateways.clone()),
        }
        .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn gw(addr: &str) -> Gateway {
        Gateway::new(addr.parse().unwrap())
    }

    fn route(cidr: &str, via: &[&str]) -> Route {
        Route::new(
            cidr.parse().unwrap(),
            via.iter().map(|a| gw(a)).collect(),
            true,
        )
    }

    #[test]
    fn test_lookup_longest_prefix_wins() {
        let routes = vec![
            route("10.0.0.0/8", &["192.168.0.1"]),
            route("10.1.0.0/16", &["192.168.0.2"]),
        ];

        let index = RouteIndex::build(&routes);

        let hit = index.lookup("10.1.2.3".parse().unwrap());
        assert_eq!(hit.as_slice(), &[gw("192.168.0.2")]);

        let hit = index.lookup("10.2.0.1".parse().unwrap());
        assert_eq!(hit.as_slice(), &[gw("192.168.0.1")]);
    }

    #[test]
    fn test_lookup_independent_of_insertion_order() {
        let forward = vec![
            route("10.0.0.0/8", &["192.168.0.1"]),
            route("10.1.0.0/16", &["192.168.0.2"]),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        let addr: IpAddr = "10.1.2.3".parse().unwrap();
        assert_eq!(
            RouteIndex::build(&forward).lookup(addr),
            RouteIndex::build(&reversed).lookup(addr),
        );
    }

    #[test]
    fn test_lookup_miss_is_empty() {
        let routes = vec![route("10.0.0.0/8", &["192.168.0.1"])];
        let index = RouteIndex::build(&routes);

        let miss = index.lookup("172.16.0.1".parse().unwrap());
        assert!(miss.is_empty());
    }

    #[test]
    fn test_lookup_ipv6() {
        let routes = vec![
            route("fd00::/8", &["fd00::1"]),
            route("fd00:1::/32", &["fd00::2"]),
        ];
        let index = RouteIndex::build(&routes);

        let hit = index.lookup("fd00:1::5".parse().unwrap());
        assert_eq!(hit.as_slice(), &[gw("fd00::2")]);

        let miss = index.lookup("fe80::1".parse().unwrap());
        assert!(miss.is_empty());
    }

    #[test]
    fn test_lookup_covers_default_route() {
        let routes = vec![route("0.0.0.0/0", &["192.168.0.1"])];
        let index = RouteIndex::build(&routes);

        let hit = index.lookup(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)));
        assert_eq!(hit.as_slice(), &[gw("192.168.0.1")]);
    }

    #[test]
    fn test_lookup_only_routes_still_resolve() {
        let mut r = route("10.9.0.0/16", &["192.168.0.9"]);
        r.install = false;

        let index = RouteIndex::build(&[r]);
        let hit = index.lookup("10.9.1.1".parse().unwrap());
        assert_eq!(hit.as_slice(), &[gw("192.168.0.9")]);
    }

    #[test]
    fn test_installable() {
        assert!(route("10.0.0.0/8", &["192.168.0.1"]).installable());

        // No gateway: lookup-only regardless of the install flag.
        assert!(!route("10.0.0.0/8", &[]).installable());

        // MTU overrides are never installed.
        assert!(!route("10.0.0.0/8", &["192.168.0.1"])
            .with_mtu(1200)
            .installable());

        let mut not_installed = route("10.0.0.0/8", &["192.168.0.1"]);
        not_installed.install = false;
        assert!(!not_installed.installable());
    }

    #[test]
    fn test_route_display() {
        let display = route("10.0.0.0/8", &["192.168.0.1"]).to_string();
        assert!(display.contains("10.0.0.0/8"));
        assert!(display.contains("via 192.168.0.1"));

        let mut lookup_only = route("10.0.0.0/8", &[]);
        lookup_only.install = false;
        assert!(lookup_only.to_string().contains("lookup only"));
    }
}
