//! Display names for connections.
//!
//! Every endpoint carries a human-readable name. Names only need to be unique
//! within one server's set of active connections; [`disambiguate`] bumps a
//! numeric suffix until the name is free.

use std::{
    fmt,
    net::{IpAddr, SocketAddr},
};

/// Separator between a base name and its disambiguating number.
pub const SUFFIX_SEPARATOR: char = '_';

/// Produces default display names for endpoints.
///
/// The default [`AddressNaming`] uses the peer's IP literal. Deployments that
/// want reverse-DNS names plug in their own strategy through the endpoint
/// configuration.
pub trait NamingStrategy: Send + Sync + fmt::Debug {
    /// Name for a connection whose peer is `peer`.
    fn peer_name(&self, peer: SocketAddr) -> String;

    /// Name for an endpoint that has no peer yet.
    fn local_name(&self) -> String;
}

/// Names connections after the peer address and the local host name.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressNaming;

impl NamingStrategy for AddressNaming {
    fn peer_name(&self, peer: SocketAddr) -> String {
        peer.ip().to_string()
    }

    fn local_name(&self) -> String {
        let host = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .ok()
            .filter(|host| !host.trim().is_empty());

        match host {
            Some(host) => short_host_name(host.trim()),
            None => {
                tracing::trace!("no host name in environment, using localhost");
                "localhost".to_string()
            },
        }
    }
}

/// Strip the domain (or workgroup) suffix from a host name.
///
/// IP literals are returned unchanged. A name whose first segment is a
/// number is also assumed to be an address and left alone.
pub fn short_host_name(host: &str) -> String {
    if host.parse::<IpAddr>().is_ok() {
        return host.to_string();
    }

    match host.split_once('.') {
        Some((first, _)) if !first.is_empty() && first.parse::<u64>().is_err() => first.to_string(),
        _ => host.to_string(),
    }
}

/// Next candidate name: `host` becomes `host_2`, `host_2` becomes `host_3`.
pub fn increment_name(name: &str) -> String {
    if let Some((base, suffix)) = name.rsplit_once(SUFFIX_SEPARATOR) {
        if !base.is_empty() {
            if let Some(next) = suffix.parse::<u64>().ok().and_then(|n| n.checked_add(1)) {
                return format!("{base}{SUFFIX_SEPARATOR}{next}");
            }
        }
    }

    format!("{name}{SUFFIX_SEPARATOR}2")
}

/// First name in the increment sequence of `name` that is not taken.
///
/// Returns `name` unchanged when it is free.
pub fn disambiguate(name: &str, is_taken: impl Fn(&str) -> bool) -> String {
    let mut candidate = name.to_string();
    while is_taken(&candidate) {
        candidate = increment_name(&candidate);
    }
    if candidate != name {
        tracing::debug!(%name, renamed = %candidate, "name already in use");
    }
    candidate
}
