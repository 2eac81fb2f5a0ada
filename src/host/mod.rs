//! Facts about the machine the runner executes on

use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::path::PathBuf;

/// Address simulators use to reach the host.
pub const SIMULATOR_HOST: &str = "127.0.0.1";

/// Terminal device attached to stderr, if any.
pub fn stderr_terminal() -> Option<PathBuf> {
    use std::io::IsTerminal;

    let stderr = std::io::stderr();
    if !stderr.is_terminal() {
        return None;
    }
    #[cfg(unix)]
    {
        use std::os::fd::AsFd;

        nix::unistd::ttyname(stderr.as_fd()).ok()
    }
    #[cfg(not(unix))]
    {
        None
    }
}

/// This machine's host name.
pub fn host_name() -> Option<String> {
    #[cfg(unix)]
    {
        let name = nix::unistd::gethostname().ok()?;
        let name = name.to_string_lossy().into_owned();
        (!name.is_empty()).then_some(name)
    }
    #[cfg(not(unix))]
    {
        std::env::var("COMPUTERNAME").ok()
    }
}

/// Non-loopback addresses the host name resolves to, IPv4 first.
pub fn host_addresses() -> Vec<IpAddr> {
    let Some(name) = host_name() else {
        return Vec::new();
    };
    let resolved = match (name.as_str(), 0u16).to_socket_addrs() {
        Ok(addrs) => addrs.map(|a| a.ip()).collect::<Vec<_>>(),
        Err(e) => {
            tracing::debug!(host = %name, error = %e, "could not resolve host name");
            Vec::new()
        }
    };
    order_addresses(resolved)
}

fn order_addresses(addresses: Vec<IpAddr>) -> Vec<IpAddr> {
    let mut ordered: Vec<IpAddr> = Vec::new();
    for addr in addresses.into_iter().filter(|a| !a.is_loopback()) {
        if !ordered.contains(&addr) {
            ordered.push(addr);
        }
    }
    ordered.sort_by_key(|a| a.is_ipv6());
    ordered
}

/// Value for the host the app should report results to.
///
/// Simulators share the host's network stack and always use loopback.
/// Devices get the configured override, else every host address joined by
/// commas so the app can try each in turn.
pub fn listener_hosts(is_simulator: bool, configured: Option<&str>) -> String {
    if is_simulator {
        return SIMULATOR_HOST.to_string();
    }
    if let Some(host) = configured.filter(|h| !h.trim().is_empty()) {
        return host.trim().to_string();
    }
    join_addresses(&host_addresses())
}

fn join_addresses(addresses: &[IpAddr]) -> String {
    if addresses.is_empty() {
        return IpAddr::V4(Ipv4Addr::LOCALHOST).to_string();
    }
    addresses
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
