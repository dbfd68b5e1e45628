//! Endpoint addressing
//!
//! An [`Address`] names where an RPC goes: a single replica process
//! ([`Endpoint`]), a replica group whose current leader receives the call, or
//! a URI alias. Group and URI payloads live in a [`GroupTable`](super::group::GroupTable)
//! and are referenced through generation-checked handles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::str::FromStr;

use crate::common::group::{GroupId, UriId};
use crate::common::Result;

/// IPv4 host and port of one replica process
///
/// Serialized as its `a.b.c.d:port` text form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Endpoint {
    ip: u32,
    port: u16,
}

impl Endpoint {
    pub fn new(ip: u32, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn from_ipv4(ip: Ipv4Addr, port: u16) -> Self {
        Self {
            ip: u32::from(ip),
            port,
        }
    }

    pub fn ip(&self) -> u32 {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn ipv4(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ip)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ipv4(), self.port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ipv4(), self.port)
    }
}

/// Parses the numeric `a.b.c.d:port` form only; host names go through
/// [`Address::build`].
impl FromStr for Endpoint {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        let addr: SocketAddrV4 = s
            .parse()
            .map_err(|_| crate::Error::MalformedRequest(format!("invalid endpoint: {}", s)))?;
        Ok(Endpoint::from_ipv4(*addr.ip(), addr.port()))
    }
}

impl From<Endpoint> for String {
    fn from(ep: Endpoint) -> Self {
        ep.to_string()
    }
}

impl TryFrom<String> for Endpoint {
    type Error = crate::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<SocketAddrV4> for Endpoint {
    fn from(addr: SocketAddrV4) -> Self {
        Endpoint::from_ipv4(*addr.ip(), addr.port())
    }
}

/// RPC destination
///
/// `Invalid` is the default and compares unequal to every address, itself
/// included, so an uninitialized address can never match a leader or member.
#[derive(Debug, Clone, Copy, Default)]
pub enum Address {
    #[default]
    Invalid,
    NetworkEndpoint(Endpoint),
    NamedGroup(GroupId),
    UriAlias(UriId),
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Address::NetworkEndpoint(a), Address::NetworkEndpoint(b)) => a == b,
            (Address::NamedGroup(a), Address::NamedGroup(b)) => a == b,
            (Address::UriAlias(a), Address::UriAlias(b)) => a == b,
            _ => false,
        }
    }
}

impl Address {
    /// Build an endpoint address from a host name or dotted IPv4 literal.
    ///
    /// Numeric hosts are parsed directly; anything else goes through the
    /// system resolver and the first IPv4 result wins.
    pub fn build(host: &str, port: u16) -> Result<Address> {
        let ip = resolve_ipv4(host)?;
        Ok(Address::NetworkEndpoint(Endpoint::from_ipv4(ip, port)))
    }

    /// Build an endpoint address from a raw IPv4 value, no resolution.
    pub fn from_ipv4(ip: u32, port: u16) -> Address {
        Address::NetworkEndpoint(Endpoint::new(ip, port))
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, Address::Invalid)
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        match self {
            Address::NetworkEndpoint(ep) => Some(*ep),
            _ => None,
        }
    }

    pub fn group(&self) -> Option<GroupId> {
        match self {
            Address::NamedGroup(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<Endpoint> for Address {
    fn from(ep: Endpoint) -> Self {
        Address::NetworkEndpoint(ep)
    }
}

impl From<Option<Endpoint>> for Address {
    fn from(ep: Option<Endpoint>) -> Self {
        ep.map(Address::NetworkEndpoint).unwrap_or_default()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Invalid => write!(f, "invalid address"),
            Address::NetworkEndpoint(ep) => write!(f, "{}", ep),
            Address::NamedGroup(id) => write!(f, "group#{}", id),
            Address::UriAlias(id) => write!(f, "uri#{}", id),
        }
    }
}

/// Resolve a host to an IPv4 address.
pub fn resolve_ipv4(host: &str) -> Result<Ipv4Addr> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(ip);
    }

    let addrs = (host, 0u16)
        .to_socket_addrs()
        .map_err(|e| crate::Error::Resolution(format!("{}: {}", host, e)))?;

    addrs
        .filter_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(*v4.ip()),
            SocketAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| crate::Error::Resolution(format!("{}: no IPv4 address", host)))
}
