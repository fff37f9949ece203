//! Kernel route-table reconciliation
//!
//! On reload the kernel table converges in two passes: routes that fell
//! out of the configuration are removed first, then every configured
//! route is re-added. Re-adding an existing route is a harmless no-op (or
//! a loggable, non-fatal error) at the OS layer, and a route the kernel
//! refused to remove is re-established by the add pass, so one stale
//! route never blocks convergence of the rest.

use std::net::IpAddr;

use crate::error::{Error, Result};
use crate::platform::RoutePlatform;
use crate::route::Route;

/// Routes present in `old` but no longer in `new`, by full route
/// identity.
pub fn removed_routes(new: &[Route], old: &[Route]) -> Vec<Route> {
    old.iter()
        .filter(|route| !new.contains(route))
        .cloned()
        .collect()
}

/// Install every installable route in `routes`, using `local` as the
/// kernel-table endpoint.
///
/// With `log_errors` set, a per-route failure is logged and the pass
/// continues (asynchronous reload); otherwise the first failure aborts
/// the pass and is returned (activation). Routes without a gateway or
/// otherwise excluded from installation are skipped silently.
pub fn add_routes(
    platform: &dyn RoutePlatform,
    routes: &[Route],
    local: IpAddr,
    log_errors: bool,
) -> Result<()> {
    for route in routes {
        if !route.installable() {
            continue;
        }

        if let Err(e) = platform.add_route(&route.cidr, local) {
            let err = Error::Route(format!("failed to add unsafe route {}: {}", route, e));
            if log_errors {
                log::error!("{}", err);
            } else {
                return Err(err);
            }
        }
    }

    Ok(())
}

/// Remove every installable route in `routes` from the kernel table.
///
/// Failures are logged per route and never propagated; the next add pass
/// or reload is the implicit retry.
pub fn remove_routes(platform: &dyn RoutePlatform, routes: &[Route], local: IpAddr) {
    for route in routes {
        if !route.installable() {
            continue;
        }

        match platform.remove_route(&route.cidr, local) {
            Ok(()) => log::info!("removed route {}", route),
            Err(e) => log::error!("failed to remove route {}: {}", route, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockRoutePlatform, PlatformCall};
    use crate::route::Gateway;
    use ipnet::IpNet;

    fn route(cidr: &str, via: &[&str]) -> Route {
        Route::new(
            cidr.parse().unwrap(),
            via.iter().map(|a| Gateway::new(a.parse().unwrap())).collect(),
            true,
        )
    }

    fn local() -> IpAddr {
        "10.0.0.1".parse().unwrap()
    }

    #[test]
    fn test_removed_routes_by_identity() {
        let a = route("10.1.0.0/16", &["192.168.0.1"]);
        let b = route("10.2.0.0/16", &["192.168.0.1"]);
        let c = route("10.3.0.0/16", &["192.168.0.1"]);

        let removed = removed_routes(&[b.clone(), c.clone()], &[a.clone(), b.clone()]);
        assert_eq!(removed, vec![a]);
    }

    #[test]
    fn test_changed_via_counts_as_different_route() {
        let old = route("10.1.0.0/16", &["192.168.0.1"]);
        let new = route("10.1.0.0/16", &["192.168.0.2"]);

        let removed = removed_routes(&[new], &[old.clone()]);
        assert_eq!(removed, vec![old]);
    }

    #[test]
    fn test_add_routes_skips_non_installable() {
        let platform = MockRoutePlatform::new();
        let routes = vec![
            route("10.1.0.0/16", &[]),
            route("10.2.0.0/16", &["192.168.0.1"]).with_mtu(1200),
        ];

        add_routes(&platform, &routes, local(), false).unwrap();
        assert!(platform.calls().is_empty());
    }

    #[test]
    fn test_add_routes_tolerant_mode_continues() {
        let platform = MockRoutePlatform::new();
        platform.fail_add_routes(true);
        let routes = vec![
            route("10.1.0.0/16", &["192.168.0.1"]),
            route("10.2.0.0/16", &["192.168.0.1"]),
        ];

        add_routes(&platform, &routes, local(), true).unwrap();
        assert_eq!(platform.calls().len(), 2);
    }

    #[test]
    fn test_add_routes_strict_mode_aborts() {
        let platform = MockRoutePlatform::new();
        platform.fail_add_routes(true);
        let routes = vec![
            route("10.1.0.0/16", &["192.168.0.1"]),
            route("10.2.0.0/16", &["192.168.0.1"]),
        ];

        let err = add_routes(&platform, &routes, local(), false).unwrap_err();
        assert!(err.to_string().contains("10.1.0.0/16"));
        assert_eq!(platform.calls().len(), 1);
    }

    #[test]
    fn test_remove_routes_never_propagates() {
        let platform = MockRoutePlatform::new();
        platform.fail_remove_routes(true);
        let routes = vec![
            route("10.1.0.0/16", &["192.168.0.1"]),
            route("10.2.0.0/16", &["192.168.0.1"]),
        ];

        remove_routes(&platform, &routes, local());
        assert_eq!(platform.calls().len(), 2);
    }

    #[test]
    fn test_endpoint_passed_through() {
        let platform = MockRoutePlatform::new();
        let routes = vec![route("10.1.0.0/16", &["192.168.0.1"])];

        add_routes(&platform, &routes, local(), false).unwrap();

        let dest: IpNet = "10.1.0.0/16".parse().unwrap();
        assert_eq!(
            platform.calls(),
            vec![PlatformCall::AddRoute {
                dest,
                local: local()
            }]
        );
    }
}
