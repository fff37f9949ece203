//! OS collaborators: kernel route-table mutation and the raw device
//! byte stream
//!
//! Both seams are deliberately narrow so reconciliation and the device
//! lifecycle can be exercised with the recording fakes in [`crate::mock`]
//! instead of a real interface.

use std::fs::File;
use std::io::{self, Read, Write};
use std::net::IpAddr;
use std::process::Command;

use ipnet::IpNet;

use crate::error::{Error, Result};

/// Kernel-facing side effects, one external invocation per call.
///
/// Implementations report success or failure only; command output is
/// never parsed.
pub trait RoutePlatform: Send + Sync {
    /// Assign `prefix` as an interface address on `device`.
    fn add_address(&self, device: &str, prefix: &IpNet) -> Result<()>;

    /// Set the interface MTU on `device`.
    fn set_mtu(&self, device: &str, mtu: u16) -> Result<()>;

    /// Install a kernel route for `dest` with `local` as the endpoint.
    fn add_route(&self, dest: &IpNet, local: IpAddr) -> Result<()>;

    /// Delete the kernel route for `dest` with `local` as the endpoint.
    fn remove_route(&self, dest: &IpNet, local: IpAddr) -> Result<()>;
}

/// Route-table mutation through the BSD command-line tools.
///
/// The argument shapes are load-bearing for compatibility and must not
/// drift:
///
/// ```text
/// /sbin/ifconfig <dev> <cidr> <cidr-addr>
/// /sbin/ifconfig <dev> mtu <mtu>
/// /sbin/route -n add -inet <cidr> <local-addr>
/// /sbin/route -n delete -inet <cidr> <local-addr>
/// ```
#[derive(Debug, Default)]
pub struct CommandRoutes;

impl CommandRoutes {
    pub fn new() -> Self {
        Self
    }

    fn run(&self, label: &str, program: &str, args: &[String]) -> Result<()> {
        log::debug!("command: {} {}", program, args.join(" "));

        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|e| Error::Route(format!("failed to run '{}': {}", label, e)))?;

        if !status.success() {
            return Err(Error::Route(format!(
                "failed to run '{}': {}",
                label, status
            )));
        }

        Ok(())
    }
}

impl RoutePlatform for CommandRoutes {
    fn add_address(&self, device: &str, prefix: &IpNet) -> Result<()> {
        self.run(
            "ifconfig",
            "/sbin/ifconfig",
            &[
                device.to_string(),
                prefix.to_string(),
                prefix.addr().to_string(),
            ],
        )
    }

    fn set_mtu(&self, device: &str, mtu: u16) -> Result<()> {
        self.run(
            "ifconfig",
            "/sbin/ifconfig",
            &[device.to_string(), "mtu".to_string(), mtu.to_string()],
        )
    }

    fn add_route(&self, dest: &IpNet, local: IpAddr) -> Result<()> {
        // TODO: pass -inet6 for IPv6 destinations once v6 unsafe routes
        // are exercised end to end
        self.run(
            "route add",
            "/sbin/route",
            &[
                "-n".to_string(),
                "add".to_string(),
                "-inet".to_string(),
                dest.to_string(),
                local.to_string(),
            ],
        )
    }

    fn remove_route(&self, dest: &IpNet, local: IpAddr) -> Result<()> {
        self.run(
            "route delete",
            "/sbin/route",
            &[
                "-n".to_string(),
                "delete".to_string(),
                "-inet".to_string(),
                dest.to_string(),
                local.to_string(),
            ],
        )
    }
}

/// Raw byte stream of the tun device node.
///
/// Read and write take `&self` so one reader thread and one writer thread
/// can share the handle without locking, matching the kernel's per-call
/// semantics for character devices.
pub trait TunHandle: Send + Sync {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&self, buf: &[u8]) -> io::Result<usize>;
}

impl TunHandle for File {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut file: &File = self;
        Read::read(&mut file, buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut file: &File = self;
        Write::write(&mut file, buf)
    }
}
