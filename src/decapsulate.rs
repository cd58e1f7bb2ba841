//! Dispatcher: the two entry points, one per outer IP version.
//!
//! ```text
//! Init ──► OuterParsed ──► ProtocolMatched ──(header validated)──► Done(offset)
//!   │           │                 │
//!   └───────────┴─────────────────┴──────────────► Done(0), record untouched
//! ```
//!
//! The UDP branch reads the protocol byte, the destination port and the VXLAN
//! flags byte, in that order, each at a fixed offset and stops at the first
//! mismatch. The GRE branch reads the outer header length first and hands the
//! rest to [`crate::gre`]. The record is only written once a family parser has
//! validated its header, and nothing can fail after that.
//!
//! The vendor GRE family carries a bare IP packet. The read-only entry points
//! return its offset as is; the `*_in_place` ones rebuild an Ethernet header
//! in front of it so every family hands back an Ethernet frame.

use pnet::packet::ip::IpNextHeaderProtocols;

use crate::bytes::{read_u16_be, read_u8};
use crate::config::DecapConfig;
use crate::consts::{
    ipv4, DEFAULT_VXLAN_PORTS, IPV4_HEADER_SIZE, IPV4_PROTOCOL_OFFSET, IPV6_HEADER_SIZE,
    IPV6_NEXT_HEADER_OFFSET, TUNNEL_TIER_LIMIT, UDP6_DPORT_OFFSET, UDP_DPORT_OFFSET,
};
use crate::error::DecapError;
use crate::family::{Decoded, InnerFrame};
use crate::ip_header::{read_ipv4, read_ipv6, IpVersion, OuterHeader};
use crate::tunnel_info::{TunnelInfo, TunnelType, TunnelTypeBitmap};
use crate::verdict::{DecapState, Reject, Verdict};
use crate::{gre, vxlan};

/// Borrowed view of the settings a single call runs with.
#[derive(Debug, Clone, Copy)]
struct Rules<'a> {
    tunnel_types: TunnelTypeBitmap,
    vxlan_ports: &'a [u16],
    tier_limit: u8,
}

impl Rules<'static> {
    fn defaults(tunnel_types: TunnelTypeBitmap) -> Self {
        Rules { tunnel_types, vxlan_ports: &DEFAULT_VXLAN_PORTS, tier_limit: TUNNEL_TIER_LIMIT }
    }
}

impl TunnelInfo {
    /// Decapsulates a frame whose outer header is IPv4.
    ///
    /// `l3` starts at the outer IP header. Returns the offset of the inner
    /// payload within `l3`, or 0 when no enabled tunnel family matches, in
    /// which case `self` is left exactly as it was.
    ///
    /// Uses the standard VXLAN ports and a tier limit of
    /// [`TUNNEL_TIER_LIMIT`]; see [`Decapsulator`] for other settings.
    #[inline]
    pub fn decapsulate(&mut self, l3: &[u8], tunnel_types: impl Into<TunnelTypeBitmap>) -> usize {
        self.inspect(l3, tunnel_types).unwrap_or(0)
    }

    /// Same as [`TunnelInfo::decapsulate`] for an IPv6 outer header.
    ///
    /// `src`/`dst` receive the low 32 bits of the IPv6 addresses.
    #[inline]
    pub fn decapsulate6(&mut self, l3: &[u8], tunnel_types: impl Into<TunnelTypeBitmap>) -> usize {
        self.inspect6(l3, tunnel_types).unwrap_or(0)
    }

    /// Like [`TunnelInfo::decapsulate`], keeping the rejection reason.
    #[inline]
    pub fn inspect(&mut self, l3: &[u8], tunnel_types: impl Into<TunnelTypeBitmap>) -> Verdict {
        dispatch_v4(self, l3, &Rules::defaults(tunnel_types.into())).map(|decoded| decoded.offset)
    }

    /// Like [`TunnelInfo::decapsulate6`], keeping the rejection reason.
    #[inline]
    pub fn inspect6(&mut self, l3: &[u8], tunnel_types: impl Into<TunnelTypeBitmap>) -> Verdict {
        dispatch_v6(self, l3, &Rules::defaults(tunnel_types.into())).map(|decoded| decoded.offset)
    }

    /// Decapsulates an IPv4-outer frame so that the inner payload is always an
    /// Ethernet frame.
    ///
    /// For the vendor GRE family a pseudo Ethernet header overwrites the tail
    /// of the GRE header and the returned offset points at it. Other families
    /// leave `l3` untouched and return the same offset as
    /// [`TunnelInfo::decapsulate`].
    #[inline]
    pub fn decapsulate_in_place(
        &mut self,
        l3: &mut [u8],
        tunnel_types: impl Into<TunnelTypeBitmap>,
    ) -> usize {
        self.inspect_in_place(l3, tunnel_types).unwrap_or(0)
    }

    /// Same as [`TunnelInfo::decapsulate_in_place`] for an IPv6 outer header.
    #[inline]
    pub fn decapsulate6_in_place(
        &mut self,
        l3: &mut [u8],
        tunnel_types: impl Into<TunnelTypeBitmap>,
    ) -> usize {
        self.inspect6_in_place(l3, tunnel_types).unwrap_or(0)
    }

    #[inline]
    pub fn inspect_in_place(
        &mut self,
        l3: &mut [u8],
        tunnel_types: impl Into<TunnelTypeBitmap>,
    ) -> Verdict {
        let decoded = dispatch_v4(self, l3, &Rules::defaults(tunnel_types.into()))?;
        Ok(frame_as_ethernet(l3, IpVersion::V4, decoded))
    }

    #[inline]
    pub fn inspect6_in_place(
        &mut self,
        l3: &mut [u8],
        tunnel_types: impl Into<TunnelTypeBitmap>,
    ) -> Verdict {
        let decoded = dispatch_v6(self, l3, &Rules::defaults(tunnel_types.into()))?;
        Ok(frame_as_ethernet(l3, IpVersion::V6, decoded))
    }
}

/// Rebuilds an Ethernet header in front of a bare IP payload.
///
/// The vendor GRE header is at least 8 bytes and follows a 20 or 40 byte
/// outer header, so there is always room for the 14-byte pseudo header.
fn frame_as_ethernet(l3: &mut [u8], outer: IpVersion, decoded: Decoded) -> usize {
    match decoded.inner {
        InnerFrame::Ethernet => decoded.offset,
        InnerFrame::Ip(ethertype) => {
            let tag = match outer {
                IpVersion::V4 => read_u16_be(l3, ipv4::ID_OFFSET).unwrap_or(0),
                IpVersion::V6 => 0,
            };
            gre::write_pseudo_ethernet(l3, decoded.offset, ethertype, tag)
                .unwrap_or(decoded.offset)
        }
    }
}

#[inline(always)]
fn precheck(info: &TunnelInfo, rules: &Rules<'_>) -> Result<(), Reject> {
    if info.tier >= rules.tier_limit {
        return Err(Reject::TierLimit);
    }
    if rules.tunnel_types.is_empty() {
        return Err(Reject::Disabled);
    }
    Ok(())
}

#[inline(always)]
fn is_vxlan_port(l3: &[u8], offset: usize, rules: &Rules<'_>) -> Result<(), Reject> {
    let dport =
        read_u16_be(l3, offset).ok_or(Reject::Truncated(DecapState::ProtocolMatched))?;
    if rules.vxlan_ports.contains(&dport) {
        Ok(())
    } else {
        Err(Reject::UnknownPort)
    }
}

#[inline(always)]
fn has_gre_family(tunnel_types: TunnelTypeBitmap) -> bool {
    tunnel_types.has(TunnelType::Erspan) || tunnel_types.has(TunnelType::TencentGre)
}

#[inline(always)]
fn finish(
    info: &mut TunnelInfo,
    outer: &OuterHeader,
    decoded: Decoded,
) -> Result<Decoded, Reject> {
    info.commit(outer, decoded.family.tunnel_type(), decoded.id);
    Ok(decoded)
}

fn dispatch_v4(info: &mut TunnelInfo, l3: &[u8], rules: &Rules<'_>) -> Result<Decoded, Reject> {
    precheck(info, rules)?;
    if l3.len() < IPV4_HEADER_SIZE {
        return Err(Reject::Truncated(DecapState::Init));
    }
    let protocol = read_u8(l3, IPV4_PROTOCOL_OFFSET).ok_or(Reject::Truncated(DecapState::Init))?;

    match protocol {
        p if p == IpNextHeaderProtocols::Udp.0 && rules.tunnel_types.has(TunnelType::Vxlan) => {
            is_vxlan_port(l3, UDP_DPORT_OFFSET, rules)?;
            let decoded = vxlan::parse(l3, &vxlan::OVER_IPV4)?;
            // fixed offsets only hold for an option-less header
            let outer = read_ipv4(l3)
                .filter(|outer| outer.header_len == IPV4_HEADER_SIZE)
                .ok_or(Reject::BadOuterHeader)?;
            finish(info, &outer, decoded)
        }
        p if p == IpNextHeaderProtocols::Gre.0 && has_gre_family(rules.tunnel_types) => {
            let outer = read_ipv4(l3).ok_or(Reject::BadOuterHeader)?;
            let decoded = gre::parse(l3, outer.header_len, rules.tunnel_types)?;
            finish(info, &outer, decoded)
        }
        _ => Err(Reject::UnsupportedProtocol),
    }
}

fn dispatch_v6(info: &mut TunnelInfo, l3: &[u8], rules: &Rules<'_>) -> Result<Decoded, Reject> {
    precheck(info, rules)?;
    if l3.len() < IPV6_HEADER_SIZE {
        return Err(Reject::Truncated(DecapState::Init));
    }
    let next_header =
        read_u8(l3, IPV6_NEXT_HEADER_OFFSET).ok_or(Reject::Truncated(DecapState::Init))?;

    match next_header {
        p if p == IpNextHeaderProtocols::Udp.0 && rules.tunnel_types.has(TunnelType::Vxlan) => {
            is_vxlan_port(l3, UDP6_DPORT_OFFSET, rules)?;
            let decoded = vxlan::parse(l3, &vxlan::OVER_IPV6)?;
            let outer = read_ipv6(l3).ok_or(Reject::BadOuterHeader)?;
            finish(info, &outer, decoded)
        }
        p if p == IpNextHeaderProtocols::Gre.0 && has_gre_family(rules.tunnel_types) => {
            let outer = read_ipv6(l3).ok_or(Reject::BadOuterHeader)?;
            let decoded = gre::parse(l3, outer.header_len, rules.tunnel_types)?;
            finish(info, &outer, decoded)
        }
        _ => Err(Reject::UnsupportedProtocol),
    }
}

/// Decapsulation engine bound to a validated [`DecapConfig`].
///
/// Holds no per-frame state and can be shared across threads by reference.
#[derive(Debug, Clone, Default)]
pub struct Decapsulator {
    config: DecapConfig,
}

impl Decapsulator {
    pub fn new(config: DecapConfig) -> Result<Self, DecapError> {
        config.validate()?;
        tracing::debug!(
            "Decapsulator ready: types [{}], vxlan ports {:?}, tier limit {}",
            config.tunnel_types,
            config.vxlan_ports,
            config.tier_limit
        );
        Ok(Self { config })
    }

    pub fn config(&self) -> &DecapConfig {
        &self.config
    }

    fn rules(&self) -> Rules<'_> {
        Rules {
            tunnel_types: self.config.tunnel_types,
            vxlan_ports: &self.config.vxlan_ports,
            tier_limit: self.config.tier_limit,
        }
    }

    #[inline]
    pub fn inspect(&self, info: &mut TunnelInfo, l3: &[u8]) -> Verdict {
        dispatch_v4(info, l3, &self.rules()).map(|decoded| decoded.offset)
    }

    #[inline]
    pub fn inspect6(&self, info: &mut TunnelInfo, l3: &[u8]) -> Verdict {
        dispatch_v6(info, l3, &self.rules()).map(|decoded| decoded.offset)
    }

    /// In-place counterpart of [`Decapsulator::inspect`], see
    /// [`TunnelInfo::decapsulate_in_place`].
    #[inline]
    pub fn inspect_in_place(&self, info: &mut TunnelInfo, l3: &mut [u8]) -> Verdict {
        let decoded = dispatch_v4(info, l3, &self.rules())?;
        Ok(frame_as_ethernet(l3, IpVersion::V4, decoded))
    }

    #[inline]
    pub fn inspect6_in_place(&self, info: &mut TunnelInfo, l3: &mut [u8]) -> Verdict {
        let decoded = dispatch_v6(info, l3, &self.rules())?;
        Ok(frame_as_ethernet(l3, IpVersion::V6, decoded))
    }

    /// Picks the entry point from the version nibble of `l3`.
    #[inline]
    pub fn inspect_ip(&self, info: &mut TunnelInfo, l3: &[u8]) -> Verdict {
        match IpVersion::of(l3) {
            Some(IpVersion::V4) => self.inspect(info, l3),
            Some(IpVersion::V6) => self.inspect6(info, l3),
            None => Err(Reject::BadOuterHeader),
        }
    }

    #[inline]
    pub fn decapsulate(&self, info: &mut TunnelInfo, l3: &[u8]) -> usize {
        self.inspect(info, l3).unwrap_or(0)
    }

    #[inline]
    pub fn decapsulate6(&self, info: &mut TunnelInfo, l3: &[u8]) -> usize {
        self.inspect6(info, l3).unwrap_or(0)
    }

    #[inline]
    pub fn decapsulate_ip(&self, info: &mut TunnelInfo, l3: &[u8]) -> usize {
        self.inspect_ip(info, l3).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ipv4(protocol: u8, payload: &[u8]) -> Vec<u8> {
        let mut data = vec![
            0x45, 0x00, 0x00, 0x00, //
            0x00, 0x00, 0x40, 0x00, //
            0x40, protocol, 0x00, 0x00, //
            0x0a, 0x00, 0x00, 0x01, // 10.0.0.1
            0x0a, 0x00, 0x00, 0x02, // 10.0.0.2
        ];
        data.extend_from_slice(payload);
        data
    }

    fn udp_vxlan(dport: u16, flags: u8, vni: u32) -> Vec<u8> {
        let mut payload = vec![0x30, 0x39];
        payload.extend_from_slice(&dport.to_be_bytes());
        payload.extend_from_slice(&[0x00, 0x10, 0x00, 0x00]);
        payload.extend_from_slice(&[flags, 0x00, 0x00, 0x00]);
        payload.extend_from_slice(&(vni << 8).to_be_bytes());
        ipv4(17, &payload)
    }

    #[test]
    fn test_tcp_rejected_on_protocol_byte() {
        let mut info = TunnelInfo::default();
        let data = ipv4(6, &[0u8; 20]);
        assert_eq!(info.inspect(&data, TunnelTypeBitmap::all()), Err(Reject::UnsupportedProtocol));
        assert_eq!(info, TunnelInfo::default());
    }

    #[test]
    fn test_unknown_port() {
        let mut info = TunnelInfo::default();
        let data = udp_vxlan(53, 0x08, 1);
        assert_eq!(info.inspect(&data, TunnelType::Vxlan), Err(Reject::UnknownPort));
    }

    #[test]
    fn test_bad_flags() {
        let mut info = TunnelInfo::default();
        let data = udp_vxlan(4789, 0x00, 1);
        assert_eq!(info.inspect(&data, TunnelType::Vxlan), Err(Reject::BadVxlanFlags));
        assert_eq!(info, TunnelInfo::default());
    }

    #[test]
    fn test_vxlan_match() {
        let mut info = TunnelInfo::default();
        let data = udp_vxlan(8472, 0x08, 5000);
        assert_eq!(info.decapsulate(&data, TunnelType::Vxlan), 36);
        assert_eq!(info.tunnel_type, TunnelType::Vxlan);
        assert_eq!(info.id, 5000);
        assert_eq!(info.tier, 1);
        assert_eq!(info.src, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(info.dst, Ipv4Addr::new(10, 0, 0, 2));
        assert!(!info.is_ipv6);
    }

    #[test]
    fn test_family_not_enabled() {
        let mut info = TunnelInfo::default();
        let data = udp_vxlan(4789, 0x08, 1);
        assert_eq!(info.inspect(&data, TunnelType::Erspan), Err(Reject::UnsupportedProtocol));
        assert_eq!(info.inspect(&data, TunnelType::None), Err(Reject::Disabled));
    }

    #[test]
    fn test_vxlan_with_ip_options_rejected() {
        let mut info = TunnelInfo::default();
        let mut data = udp_vxlan(4789, 0x08, 1);
        data[0] = 0x46;
        assert_eq!(info.inspect(&data, TunnelType::Vxlan), Err(Reject::BadOuterHeader));
        assert!(!info.is_valid());
    }

    #[test]
    fn test_gre_honours_ihl() {
        let mut info = TunnelInfo::default();
        let mut data = ipv4(47, &[0x01, 0x01, 0x00, 0x00]); // 4 bytes of options
        data[0] = 0x46;
        data.extend_from_slice(&[0x00, 0x00, 0x88, 0xbe, 0xff, 0xff]);
        assert_eq!(info.inspect(&data, TunnelType::Erspan), Ok(28));
        assert_eq!(info.id, 0);
        assert_eq!(info.tunnel_type, TunnelType::Erspan);
    }

    #[test]
    fn test_tier_limit() {
        let mut info = TunnelInfo { tier: TUNNEL_TIER_LIMIT, ..TunnelInfo::default() };
        let data = udp_vxlan(4789, 0x08, 1);
        assert_eq!(info.inspect(&data, TunnelType::Vxlan), Err(Reject::TierLimit));
        assert_eq!(info.tier, TUNNEL_TIER_LIMIT);
    }

    #[test]
    fn test_second_tier_keeps_outer_fields() {
        let mut info = TunnelInfo::default();
        let outer = udp_vxlan(4789, 0x08, 10);
        let mut inner = udp_vxlan(4789, 0x08, 20);
        inner[12..16].copy_from_slice(&[192, 168, 0, 1]);

        assert_eq!(info.decapsulate(&outer, TunnelType::Vxlan), 36);
        assert_eq!(info.decapsulate(&inner, TunnelType::Vxlan), 36);
        assert_eq!(info.tier, 2);
        assert_eq!(info.id, 10);
        assert_eq!(info.src, Ipv4Addr::new(10, 0, 0, 1));
    }

    #[test]
    fn test_short_buffers() {
        let mut info = TunnelInfo::default();
        assert_eq!(
            info.inspect(&[0x45; 19], TunnelTypeBitmap::all()),
            Err(Reject::Truncated(DecapState::Init))
        );
        assert_eq!(
            info.inspect6(&[0x60; 39], TunnelTypeBitmap::all()),
            Err(Reject::Truncated(DecapState::Init))
        );
        assert_eq!(info.decapsulate(&[], TunnelTypeBitmap::all()), 0);
    }

    #[test]
    fn test_reject_stages_follow_dispatch() {
        let mut info = TunnelInfo::default();
        let short = info.inspect(&[0x45; 10], TunnelTypeBitmap::all());
        let tcp = info.inspect(&ipv4(6, &[0u8; 20]), TunnelTypeBitmap::all());
        let dns = info.inspect(&udp_vxlan(53, 0x08, 1), TunnelTypeBitmap::all());
        let gre = info.inspect(&ipv4(47, &[0x00, 0x00, 0x88]), TunnelTypeBitmap::all());

        assert_eq!(short.map_err(|r| r.stage()), Err(DecapState::Init));
        assert_eq!(tcp.map_err(|r| r.stage()), Err(DecapState::OuterParsed));
        assert_eq!(dns.map_err(|r| r.stage()), Err(DecapState::ProtocolMatched));
        assert_eq!(gre, Err(Reject::Truncated(DecapState::ProtocolMatched)));
        assert!(!info.is_valid());
    }

    fn vendor_gre() -> Vec<u8> {
        let mut data = ipv4(
            47,
            &[
                0x30, 0x00, 0x08, 0x00, // K, S, IPv4
                0x00, 0x01, 0x02, 0x85, // vendor id
                0x00, 0x00, 0x00, 0x01, // sequence
                0x45, 0x00, 0x00, 0x14, // inner IPv4
            ],
        );
        data[4..6].copy_from_slice(&[0x12, 0x34]); // outer identification
        data
    }

    #[test]
    fn test_vendor_gre_read_only_points_at_inner_ip() {
        let data = vendor_gre();
        let mut info = TunnelInfo::default();
        assert_eq!(info.decapsulate(&data, TunnelType::TencentGre), 32);
        assert_eq!(info.id, 0x10285);
        assert_eq!(info.tunnel_type, TunnelType::TencentGre);
        assert_eq!(data, vendor_gre());
    }

    #[test]
    fn test_in_place_rebuilds_ethernet_for_vendor_gre() {
        let mut data = vendor_gre();
        let mut read_only = TunnelInfo::default();
        read_only.decapsulate(&data, TunnelType::TencentGre);

        let mut info = TunnelInfo::default();
        assert_eq!(info.decapsulate_in_place(&mut data, TunnelType::TencentGre), 18);
        assert_eq!(info, read_only);
        assert_eq!(
            &data[18..34],
            &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x12, 0x34, 0x08, 0x00, 0x45, 0x00]
        );
        // outer header untouched
        assert_eq!(&data[..20], &vendor_gre()[..20]);
    }

    #[test]
    fn test_in_place_leaves_other_families_untouched() {
        let mut data = udp_vxlan(4789, 0x08, 3);
        let mut info = TunnelInfo::default();
        assert_eq!(info.decapsulate_in_place(&mut data, TunnelType::Vxlan), 36);
        assert_eq!(data, udp_vxlan(4789, 0x08, 3));

        let mut tcp = ipv4(6, &[0u8; 20]);
        let mut untouched = TunnelInfo::default();
        assert_eq!(
            untouched.inspect_in_place(&mut tcp, TunnelTypeBitmap::all()),
            Err(Reject::UnsupportedProtocol)
        );
        assert_eq!(tcp, ipv4(6, &[0u8; 20]));
    }

    #[test]
    fn test_decapsulator_custom_port() {
        let decapsulator = match Decapsulator::new(DecapConfig::default().with_vxlan_ports(vec![4790])) {
            Ok(d) => d,
            Err(e) => panic!("config rejected: {e}"),
        };
        let mut info = TunnelInfo::default();
        assert_eq!(decapsulator.decapsulate(&mut info, &udp_vxlan(4789, 0x08, 1)), 0);
        assert_eq!(decapsulator.decapsulate(&mut info, &udp_vxlan(4790, 0x08, 1)), 36);
    }

    #[test]
    fn test_decapsulate_ip_picks_version() {
        let decapsulator = Decapsulator::default();
        let mut info = TunnelInfo::default();
        assert_eq!(decapsulator.decapsulate_ip(&mut info, &udp_vxlan(4789, 0x08, 9)), 36);
        assert_eq!(decapsulator.inspect_ip(&mut TunnelInfo::default(), &[0x20; 64]), Err(Reject::BadOuterHeader));
    }
}
