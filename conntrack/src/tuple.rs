// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Connection tuples as observed by the socket layer, and their post-NAT translations.

use serde::Serialize;
use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};

/// Identifier of a network namespace: the inode number of its `ns/net` handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct NamespaceId(u32);

impl NamespaceId {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for NamespaceId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl Display for NamespaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport protocol of a tracked connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// Tag used in the kernel table (the IP protocol number).
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
        }
    }

    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            6 => Some(Protocol::Tcp),
            17 => Some(Protocol::Udp),
            _ => None,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Address family of a tracked connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// Families in the order the conntrack tables are dumped.
    pub const ALL: [AddressFamily; 2] = [AddressFamily::Ipv4, AddressFamily::Ipv6];

    /// Tag used in the kernel table (`AF_INET` / `AF_INET6`).
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            AddressFamily::Ipv4 => 2,
            AddressFamily::Ipv6 => 10,
        }
    }

    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            2 => Some(AddressFamily::Ipv4),
            10 => Some(AddressFamily::Ipv6),
            _ => None,
        }
    }

    #[must_use]
    pub const fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            AddressFamily::Ipv4 => "v4",
            AddressFamily::Ipv6 => "v6",
        }
    }
}

impl Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One direction of one connection, as seen locally before any address translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionTuple {
    pub protocol: Protocol,
    pub family: AddressFamily,
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub netns: NamespaceId,
}

impl ConnectionTuple {
    /// Build a tuple from its two endpoints. The family follows the source address.
    #[must_use]
    pub fn new(protocol: Protocol, src: SocketAddr, dst: SocketAddr, netns: NamespaceId) -> Self {
        Self {
            protocol,
            family: AddressFamily::of(&src.ip()),
            src_addr: src.ip(),
            dst_addr: dst.ip(),
            src_port: src.port(),
            dst_port: dst.port(),
            netns,
        }
    }

    #[must_use]
    pub fn src(&self) -> SocketAddr {
        SocketAddr::new(self.src_addr, self.src_port)
    }

    #[must_use]
    pub fn dst(&self) -> SocketAddr {
        SocketAddr::new(self.dst_addr, self.dst_port)
    }

    /// The same tuple, seen from another network namespace.
    #[must_use]
    pub fn in_netns(mut self, netns: NamespaceId) -> Self {
        self.netns = netns;
        self
    }
}

impl Display for ConnectionTuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{} {}] {} -> {} (netns {})",
            self.protocol,
            self.family,
            self.src(),
            self.dst(),
            self.netns
        )
    }
}

/// The post-NAT view of a connection, as the kernel sees it on the reply path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpTranslation {
    pub repl_src_ip: IpAddr,
    pub repl_dst_ip: IpAddr,
    pub repl_src_port: u16,
    pub repl_dst_port: u16,
}

impl IpTranslation {
    #[must_use]
    pub fn repl_src(&self) -> SocketAddr {
        SocketAddr::new(self.repl_src_ip, self.repl_src_port)
    }

    #[must_use]
    pub fn repl_dst(&self) -> SocketAddr {
        SocketAddr::new(self.repl_dst_ip, self.repl_dst_port)
    }
}

impl Display for IpTranslation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "reply {} -> {}", self.repl_src(), self.repl_dst())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_match_kernel_constants() {
        assert_eq!(Protocol::Tcp.tag(), 6);
        assert_eq!(Protocol::Udp.tag(), 17);
        assert_eq!(AddressFamily::Ipv4.tag(), 2);
        assert_eq!(AddressFamily::Ipv6.tag(), 10);
        assert_eq!(Protocol::from_tag(17), Some(Protocol::Udp));
        assert_eq!(Protocol::from_tag(1), None);
        assert_eq!(AddressFamily::from_tag(10), Some(AddressFamily::Ipv6));
        assert_eq!(AddressFamily::from_tag(0), None);
    }

    #[test]
    fn test_tuple_family_follows_source() {
        let conn = ConnectionTuple::new(
            Protocol::Udp,
            "[2001:db8::1]:53".parse().unwrap(),
            "[2001:db8::2]:3333".parse().unwrap(),
            NamespaceId::new(7),
        );
        assert_eq!(conn.family, AddressFamily::Ipv6);
        assert_eq!(conn.src_port, 53);
        assert_eq!(conn.dst(), "[2001:db8::2]:3333".parse().unwrap());
        assert_eq!(
            conn.to_string(),
            "[UDP v6] [2001:db8::1]:53 -> [2001:db8::2]:3333 (netns 7)"
        );
    }
}
