// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Fixed-layout conntrack records shared with the kernel probe.
//!
//! The probe stores one [`ConntrackTuple`] per direction of a NAT-ed connection: the key is the
//! original tuple and the value the reply tuple, plus the mirrored (reply -> original) record.
//! Addresses are kept as two 64-bit halves in kernel memory order so that IPv4 and IPv6 share a
//! single layout.

use crate::tuple::{AddressFamily, ConnectionTuple, IpTranslation, NamespaceId, Protocol};
use serde::Serialize;
use static_assertions::const_assert_eq;
use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Key and value of the kernel conntrack table.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ConntrackTuple {
    pub protocol: u8,
    pub family: u8,
    pub _pad: [u8; 6],
    pub saddr_l: u64,
    pub saddr_h: u64,
    pub daddr_l: u64,
    pub daddr_h: u64,
    pub sport: u16,
    pub dport: u16,
    pub netns: u32,
}

const_assert_eq!(std::mem::size_of::<ConntrackTuple>(), 48);

// SAFETY: `repr(C)`, only integer fields, padding is explicit: every bit pattern is valid.
unsafe impl aya::Pod for ConntrackTuple {}

/// Split an address into its (low, high) halves as laid out in kernel memory.
#[must_use]
pub fn to_low_high(addr: &IpAddr) -> (u64, u64) {
    match addr {
        IpAddr::V4(v4) => (u64::from(u32::from_ne_bytes(v4.octets())), 0),
        IpAddr::V6(v6) => {
            let octets = v6.octets();
            let mut high = [0u8; 8];
            let mut low = [0u8; 8];
            high.copy_from_slice(&octets[..8]);
            low.copy_from_slice(&octets[8..]);
            (u64::from_ne_bytes(low), u64::from_ne_bytes(high))
        }
    }
}

/// Rebuild an address from its (low, high) halves.
///
/// Records with an unknown family tag are decoded as IPv4 when the high half is empty.
#[must_use]
pub fn from_low_high(family: Option<AddressFamily>, low: u64, high: u64) -> IpAddr {
    let family = family.unwrap_or(if high == 0 {
        AddressFamily::Ipv4
    } else {
        AddressFamily::Ipv6
    });
    match family {
        AddressFamily::Ipv4 => {
            #[allow(clippy::cast_possible_truncation)]
            let raw = low as u32;
            IpAddr::V4(Ipv4Addr::from(raw.to_ne_bytes()))
        }
        AddressFamily::Ipv6 => {
            let mut octets = [0u8; 16];
            octets[..8].copy_from_slice(&high.to_ne_bytes());
            octets[8..].copy_from_slice(&low.to_ne_bytes());
            IpAddr::V6(Ipv6Addr::from(octets))
        }
    }
}

impl ConntrackTuple {
    /// Overwrite every field of this record from `conn`.
    pub fn encode(&mut self, conn: &ConnectionTuple) {
        let (saddr_l, saddr_h) = to_low_high(&conn.src_addr);
        let (daddr_l, daddr_h) = to_low_high(&conn.dst_addr);
        *self = Self {
            protocol: conn.protocol.tag(),
            family: conn.family.tag(),
            _pad: [0; 6],
            saddr_l,
            saddr_h,
            daddr_l,
            daddr_h,
            sport: conn.src_port,
            dport: conn.dst_port,
            netns: conn.netns.as_u32(),
        };
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[must_use]
    pub fn protocol(&self) -> Option<Protocol> {
        Protocol::from_tag(self.protocol)
    }

    #[must_use]
    pub fn family(&self) -> Option<AddressFamily> {
        AddressFamily::from_tag(self.family)
    }

    #[must_use]
    pub fn src_addr(&self) -> IpAddr {
        from_low_high(self.family(), self.saddr_l, self.saddr_h)
    }

    #[must_use]
    pub fn dst_addr(&self) -> IpAddr {
        from_low_high(self.family(), self.daddr_l, self.daddr_h)
    }

    #[must_use]
    pub fn netns(&self) -> NamespaceId {
        NamespaceId::new(self.netns)
    }

    /// Interpret this record as the reply side of a connection.
    #[must_use]
    pub fn translation(&self) -> IpTranslation {
        IpTranslation {
            repl_src_ip: self.src_addr(),
            repl_dst_ip: self.dst_addr(),
            repl_src_port: self.sport,
            repl_dst_port: self.dport,
        }
    }

    /// Decode back into a caller-facing tuple, if both tags are known.
    #[must_use]
    pub fn to_connection(&self) -> Option<ConnectionTuple> {
        Some(ConnectionTuple {
            protocol: self.protocol()?,
            family: self.family()?,
            src_addr: self.src_addr(),
            dst_addr: self.dst_addr(),
            src_port: self.sport,
            dst_port: self.dport,
            netns: self.netns(),
        })
    }
}

impl From<&ConnectionTuple> for ConntrackTuple {
    fn from(conn: &ConnectionTuple) -> Self {
        let mut tuple = Self::default();
        tuple.encode(conn);
        tuple
    }
}

fn protocol_label(tag: u8) -> &'static str {
    Protocol::from_tag(tag).map_or("unknown", Protocol::label)
}

fn family_label(tag: u8) -> &'static str {
    AddressFamily::from_tag(tag).map_or("unknown", AddressFamily::label)
}

impl Display for ConntrackTuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{} {}] src={} sport={} dst={} dport={} netns={}",
            protocol_label(self.protocol),
            family_label(self.family),
            self.src_addr(),
            self.sport,
            self.dst_addr(),
            self.dport,
            self.netns
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugConntrackAddress {
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugConntrackTuple {
    pub src: DebugConntrackAddress,
    pub dst: DebugConntrackAddress,
}

impl From<&ConntrackTuple> for DebugConntrackTuple {
    fn from(tuple: &ConntrackTuple) -> Self {
        Self {
            src: DebugConntrackAddress {
                ip: tuple.src_addr().to_string(),
                port: tuple.sport,
            },
            dst: DebugConntrackAddress {
                ip: tuple.dst_addr().to_string(),
                port: tuple.dport,
            },
        }
    }
}

/// Human-readable form of one cached conntrack entry, for debug dumps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugConntrackEntry {
    pub family: String,
    pub proto: String,
    pub origin: DebugConntrackTuple,
    pub reply: DebugConntrackTuple,
}

impl DebugConntrackEntry {
    #[must_use]
    pub fn new(origin: &ConntrackTuple, reply: &ConntrackTuple) -> Self {
        Self {
            family: family_label(origin.family).to_string(),
            proto: protocol_label(origin.protocol).to_string(),
            origin: origin.into(),
            reply: reply.into(),
        }
    }
}

impl Display for DebugConntrackEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{} {}] {}:{} -> {}:{} | reply {}:{} -> {}:{}",
            self.proto,
            self.family,
            self.origin.src.ip,
            self.origin.src.port,
            self.origin.dst.ip,
            self.origin.dst.port,
            self.reply.src.ip,
            self.reply.src.port,
            self.reply.dst.ip,
            self.reply.dst.port,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp4(src: &str, dst: &str, netns: u32) -> ConnectionTuple {
        ConnectionTuple::new(
            Protocol::Tcp,
            src.parse().unwrap(),
            dst.parse().unwrap(),
            NamespaceId::new(netns),
        )
    }

    #[test]
    fn test_ipv4_halves() {
        let addr: IpAddr = "10.0.0.5".parse().unwrap();
        let (low, high) = to_low_high(&addr);
        assert_eq!(high, 0);
        assert_eq!(u64::from(u32::from_ne_bytes([10, 0, 0, 5])), low);
        assert_eq!(from_low_high(Some(AddressFamily::Ipv4), low, high), addr);
    }

    #[test]
    fn test_ipv6_halves() {
        let addr: IpAddr = "2001:db8::aa:bb".parse().unwrap();
        let (low, high) = to_low_high(&addr);
        assert_eq!(high, u64::from_ne_bytes([0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0]));
        assert_eq!(low, u64::from_ne_bytes([0, 0, 0, 0, 0, 0xaa, 0, 0xbb]));
        assert_eq!(from_low_high(Some(AddressFamily::Ipv6), low, high), addr);
    }

    #[test]
    fn test_encode_overwrites_everything() {
        let mut tuple = ConntrackTuple {
            _pad: [0xff; 6],
            saddr_h: 0xdead,
            netns: 99,
            ..Default::default()
        };
        let conn = tcp4("10.0.0.5:443", "10.0.0.1:51000", 3);
        tuple.encode(&conn);
        assert_eq!(tuple._pad, [0; 6]);
        assert_eq!(tuple.saddr_h, 0);
        assert_eq!(tuple.netns, 3);
        assert_eq!(tuple.protocol, 6);
        assert_eq!(tuple.family, 2);
        assert_eq!(tuple.sport, 443);
        assert_eq!(tuple.dport, 51000);
        assert_eq!(tuple.to_connection(), Some(conn));
    }

    #[test]
    fn test_translation_reads_reply_side() {
        let reply = ConntrackTuple::from(&tcp4("203.0.113.9:443", "203.0.113.1:51000", 0));
        let translation = reply.translation();
        assert_eq!(translation.repl_src(), "203.0.113.9:443".parse().unwrap());
        assert_eq!(translation.repl_dst(), "203.0.113.1:51000".parse().unwrap());
    }

    #[test]
    fn test_unknown_tags_still_decode() {
        let mut tuple = ConntrackTuple::from(&tcp4("192.168.1.1:1", "192.168.1.2:2", 0));
        tuple.protocol = 1;
        tuple.family = 0;
        assert_eq!(tuple.to_connection(), None);
        assert_eq!(tuple.src_addr(), "192.168.1.1".parse::<IpAddr>().unwrap());
        let entry = DebugConntrackEntry::new(&tuple, &tuple);
        assert_eq!(entry.proto, "unknown");
        assert_eq!(entry.family, "unknown");
    }

    #[test]
    fn test_debug_entry() {
        let origin = ConntrackTuple::from(&tcp4("10.0.0.5:443", "10.0.0.1:51000", 0));
        let reply = ConntrackTuple::from(&tcp4("203.0.113.9:443", "203.0.113.1:51000", 0));
        let entry = DebugConntrackEntry::new(&origin, &reply);
        assert_eq!(entry.family, "v4");
        assert_eq!(entry.proto, "TCP");
        assert_eq!(entry.reply.src.ip, "203.0.113.9");
        assert_eq!(entry.reply.src.port, 443);
        assert_eq!(
            entry.to_string(),
            "[TCP v4] 10.0.0.5:443 -> 10.0.0.1:51000 | reply 203.0.113.9:443 -> 203.0.113.1:51000"
        );
    }
}
