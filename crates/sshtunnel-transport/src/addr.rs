//! Address helpers shared by the engine and the transports

use crate::error::{TransportError, TransportResult};

/// Expand a bare `:port` to `0.0.0.0:port`; anything else is returned as is.
pub fn normalize_bind_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    }
}

/// Split `host:port` (or `[v6]:port`) into its parts.
pub fn split_host_port(addr: &str) -> TransportResult<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| TransportError::InvalidAddress(format!("missing port in '{}'", addr)))?;

    let port: u16 = port
        .parse()
        .map_err(|_| TransportError::InvalidAddress(format!("invalid port in '{}'", addr)))?;

    let host = host.trim_start_matches('[').trim_end_matches(']');
    let host = if host.is_empty() { "0.0.0.0" } else { host };

    Ok((host.to_string(), port))
}

/// Whether `host` already carries a port suffix. An unbracketed host with
/// more than one `:` is a bare IPv6 address.
pub(crate) fn has_port(host: &str) -> bool {
    if host.starts_with('[') {
        return host.contains("]:");
    }
    match host.split_once(':') {
        Some((_, port)) => !port.contains(':'),
        None => false,
    }
}

/// `host:port`, bracketing a bare IPv6 host.
pub(crate) fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
