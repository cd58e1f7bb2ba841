//! Outer IP header reader.
//!
//! Extracts only what the dispatcher needs: header length, protocol and the
//! endpoints projected to 32 bits. Nothing is validated beyond the version
//! nibble and the declared length, since the frame may be a mirror copy with
//! a stale checksum.

use std::net::Ipv4Addr;

use pnet::packet::ip::IpNextHeaderProtocol;

use crate::bytes::{read_u32_be, read_u8};
use crate::consts::{ipv4, ipv6, IPV4_HEADER_SIZE, IPV6_HEADER_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    /// Reads the version nibble of the first byte.
    pub fn of(l3: &[u8]) -> Option<Self> {
        match read_u8(l3, 0)? >> 4 {
            4 => Some(IpVersion::V4),
            6 => Some(IpVersion::V6),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OuterHeader {
    pub version: IpVersion,
    pub header_len: usize,
    pub protocol: IpNextHeaderProtocol,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl OuterHeader {
    pub fn is_ipv6(&self) -> bool {
        self.version == IpVersion::V6
    }
}

/// Returns the IPv4 header length in bytes (`4 * IHL`), or `None` when the
/// version is not 4, the IHL is below 5, or the buffer is shorter than declared.
#[inline(always)]
pub fn ipv4_header_len(l3: &[u8]) -> Option<usize> {
    let version_ihl = read_u8(l3, ipv4::VERSION_IHL_OFFSET)?;
    if version_ihl >> 4 != 4 {
        return None;
    }
    let header_len = usize::from(version_ihl & ipv4::IHL_MASK) << 2;
    if header_len < IPV4_HEADER_SIZE || l3.len() < header_len {
        return None;
    }
    Some(header_len)
}

#[inline(always)]
pub fn read_ipv4(l3: &[u8]) -> Option<OuterHeader> {
    let header_len = ipv4_header_len(l3)?;
    Some(OuterHeader {
        version: IpVersion::V4,
        header_len,
        protocol: IpNextHeaderProtocol(read_u8(l3, ipv4::PROTO_OFFSET)?),
        src: Ipv4Addr::from(read_u32_be(l3, ipv4::SRC_OFFSET)?),
        dst: Ipv4Addr::from(read_u32_be(l3, ipv4::DST_OFFSET)?),
    })
}

/// Reads a fixed 40-byte IPv6 header. Extension headers are not walked.
#[inline(always)]
pub fn read_ipv6(l3: &[u8]) -> Option<OuterHeader> {
    if l3.len() < IPV6_HEADER_SIZE || read_u8(l3, 0)? >> 4 != 6 {
        return None;
    }
    Some(OuterHeader {
        version: IpVersion::V6,
        header_len: IPV6_HEADER_SIZE,
        protocol: IpNextHeaderProtocol(read_u8(l3, ipv6::NEXT_HEADER_OFFSET)?),
        src: Ipv4Addr::from(read_u32_be(l3, ipv6::SRC_LOW32_OFFSET)?),
        dst: Ipv4Addr::from(read_u32_be(l3, ipv6::DST_LOW32_OFFSET)?),
    })
}
