/// Datalink handling for callers of the decapsulation engine
///
/// The engine works on bytes starting at an IP header. This module finds that
/// header in frames coming from live capture or PCAP files:
/// - Ethernet frames, including stacked 802.1Q / 802.1ad tags
/// - Raw IP packets (tunnels, some PCAPs)
/// - NULL datalink packets (BSD loopback captures)
///
/// The inner payload of every supported tunnel family is an Ethernet frame, so
/// chained decapsulation goes through [`locate_l3_as`] with
/// [`DatalinkFormat::Ethernet`].
use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet::packet::vlan::VlanPacket;
use tracing::trace;

use crate::consts::{ETH_HEADER_SIZE, IPV4_HEADER_SIZE, IPV6_HEADER_SIZE};
use crate::ip_header::{ipv4_header_len, IpVersion};

const VLAN_TAG_SIZE: usize = 4;
const NULL_HEADER_SIZE: usize = 4;
const MAX_VLAN_TAGS: usize = 2;

/// Datalink format types supported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatalinkFormat {
    /// Ethernet II frame, optionally VLAN tagged
    Ethernet,
    /// Raw IP packet (no datalink header)
    RawIp,
    /// NULL datalink with a 4-byte address family header
    Null,
}

/// Where the outer IP header starts inside a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L3Start {
    pub offset: usize,
    pub version: IpVersion,
    pub format: DatalinkFormat,
}

/// Locates the IP header, trying Ethernet, then raw IP, then NULL datalink.
pub fn locate_l3(frame: &[u8]) -> Option<L3Start> {
    locate_l3_as(frame, DatalinkFormat::Ethernet)
        .or_else(|| locate_l3_as(frame, DatalinkFormat::RawIp))
        .or_else(|| locate_l3_as(frame, DatalinkFormat::Null))
}

/// Locates the IP header assuming a known datalink format.
pub fn locate_l3_as(frame: &[u8], format: DatalinkFormat) -> Option<L3Start> {
    let located = match format {
        DatalinkFormat::Ethernet => try_ethernet(frame),
        DatalinkFormat::RawIp => ip_version_at(frame, 0).map(|version| (0, version)),
        DatalinkFormat::Null => try_null(frame),
    };
    located.map(|(offset, version)| {
        trace!("Located {:?} header at offset {} ({:?})", version, offset, format);
        L3Start { offset, version, format }
    })
}

/// Detect the datalink format of a frame without returning the offset.
pub fn detect_datalink_format(frame: &[u8]) -> Option<DatalinkFormat> {
    locate_l3(frame).map(|start| start.format)
}

fn try_ethernet(frame: &[u8]) -> Option<(usize, IpVersion)> {
    let ethernet = EthernetPacket::new(frame)?;
    let mut ethertype = ethernet.get_ethertype();
    let mut offset = ETH_HEADER_SIZE;

    for _ in 0..MAX_VLAN_TAGS {
        if !is_vlan(ethertype) {
            break;
        }
        let vlan = VlanPacket::new(frame.get(offset..)?)?;
        ethertype = vlan.get_ethertype();
        offset += VLAN_TAG_SIZE;
    }

    let version = match ethertype {
        EtherTypes::Ipv4 => IpVersion::V4,
        EtherTypes::Ipv6 => IpVersion::V6,
        _ => return None,
    };
    // ethertype and version nibble must agree
    (ip_version_at(frame, offset)? == version).then_some((offset, version))
}

fn try_null(frame: &[u8]) -> Option<(usize, IpVersion)> {
    // address family in host byte order, only the little-endian form is seen in practice
    match frame.get(..2)? {
        [0x02, 0x00] | [0x18, 0x00] | [0x1c, 0x00] | [0x1e, 0x00] => {}
        _ => return None,
    }
    ip_version_at(frame, NULL_HEADER_SIZE).map(|version| (NULL_HEADER_SIZE, version))
}

fn is_vlan(ethertype: EtherType) -> bool {
    matches!(ethertype, EtherTypes::Vlan | EtherTypes::PBridge | EtherTypes::QinQ)
}

/// Checks that a plausible IP header starts at `offset`.
fn ip_version_at(frame: &[u8], offset: usize) -> Option<IpVersion> {
    let ip = frame.get(offset..)?;
    match IpVersion::of(ip)? {
        IpVersion::V4 if ip.len() >= IPV4_HEADER_SIZE => {
            ipv4_header_len(ip).map(|_| IpVersion::V4)
        }
        IpVersion::V6 if ip.len() >= IPV6_HEADER_SIZE => Some(IpVersion::V6),
        _ => None,
    }
}
