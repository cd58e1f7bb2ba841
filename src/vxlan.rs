//! VXLAN body parser shared by the IPv4 and IPv6 outer entry points.
//!
//! The UDP destination port has already been matched by the dispatcher. Both
//! layouts read at fixed offsets, so only the position of the VXLAN header
//! differs between them.

use crate::bytes::{read_u32_be, read_u8};
use crate::consts::{
    vxlan, VXLAN6_FLAGS_OFFSET, VXLAN6_PACKET_SIZE, VXLAN6_VNI_OFFSET, VXLAN_FLAGS_OFFSET,
    VXLAN_PACKET_SIZE, VXLAN_VNI_OFFSET,
};
use crate::family::{Decoded, InnerFrame, TunnelFamily};
use crate::verdict::{DecapState, Reject};

#[derive(Debug, Clone, Copy)]
pub(crate) struct VxlanLayout {
    family: TunnelFamily,
    flags_offset: usize,
    vni_offset: usize,
    packet_size: usize,
}

pub(crate) const OVER_IPV4: VxlanLayout = VxlanLayout {
    family: TunnelFamily::Vxlan,
    flags_offset: VXLAN_FLAGS_OFFSET,
    vni_offset: VXLAN_VNI_OFFSET,
    packet_size: VXLAN_PACKET_SIZE,
};

pub(crate) const OVER_IPV6: VxlanLayout = VxlanLayout {
    family: TunnelFamily::Vxlan6,
    flags_offset: VXLAN6_FLAGS_OFFSET,
    vni_offset: VXLAN6_VNI_OFFSET,
    packet_size: VXLAN6_PACKET_SIZE,
};

/// Checks the flags byte first and only then the rest of the header.
#[inline(always)]
pub(crate) fn parse(l3: &[u8], layout: &VxlanLayout) -> Result<Decoded, Reject> {
    let flags = read_u8(l3, layout.flags_offset)
        .ok_or(Reject::Truncated(DecapState::ProtocolMatched))?;
    if flags & vxlan::FLAG_VALID_VNI == 0 {
        return Err(Reject::BadVxlanFlags);
    }
    if l3.len() < layout.packet_size {
        return Err(Reject::Truncated(DecapState::ProtocolMatched));
    }
    let vni = read_u32_be(l3, layout.vni_offset)
        .ok_or(Reject::Truncated(DecapState::ProtocolMatched))?
        >> vxlan::VNI_SHIFT;
    Ok(Decoded {
        family: layout.family,
        offset: layout.packet_size,
        id: vni,
        inner: InnerFrame::Ethernet,
    })
}
