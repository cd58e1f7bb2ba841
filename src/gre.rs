//! GRE-based families: ERSPAN type I/II/III and the vendor GRE variant.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |C|R|K|S|s|Recur|  Flags  | Ver |         Protocol Type         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      Checksum (optional)      |       Offset (optional)       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Key (optional)                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                  Sequence Number (optional)                   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Family selection by protocol type and flags:
//!
//! - `0x88BE`, version 0, S clear: ERSPAN type I, the mirrored frame follows
//!   the GRE header directly.
//! - `0x88BE`, version 0, S set: ERSPAN type II, 8-byte session header.
//! - `0x22EB`, version 0: ERSPAN type III, 12-byte header plus an optional
//!   8-byte platform sub-header.
//! - `0x0800` or `0x86DD`, version 0 or 1, K set: vendor GRE. The key holds
//!   the vendor id and a bare IP packet follows the GRE header. The in-place
//!   entry points rebuild an Ethernet header in the 14 bytes before it with
//!   [`write_pseudo_ethernet`].

use pnet::datalink::MacAddr;
use pnet::packet::ethernet::{EtherType, EtherTypes, MutableEthernetPacket};

use crate::bytes::{read_u16_be, read_u32_be, read_u8};
use crate::consts::{
    erspan, gre, ERSPAN_III_HEADER_SIZE, ERSPAN_III_PROTOCOL_TYPE, ERSPAN_III_SUBHEADER_SIZE,
    ERSPAN_II_HEADER_SIZE, ERSPAN_II_PROTOCOL_TYPE, ETH_HEADER_SIZE, GRE_HEADER_SIZE,
};
use crate::family::{Decoded, InnerFrame, TunnelFamily};
use crate::tunnel_info::{TunnelType, TunnelTypeBitmap};
use crate::verdict::{DecapState, Reject};

const TRUNCATED: Reject = Reject::Truncated(DecapState::ProtocolMatched);

/// Length of the optional checksum, key and sequence fields announced by `flags`.
#[inline(always)]
pub fn option_len(flags: u16) -> usize {
    let mut size = 0;
    if flags & gre::FLAG_CHECKSUM != 0 {
        size += gre::CHECKSUM_LEN;
    }
    if flags & gre::FLAG_KEY != 0 {
        size += gre::KEY_LEN;
    }
    if flags & gre::FLAG_SEQUENCE != 0 {
        size += gre::SEQUENCE_LEN;
    }
    size
}

/// Parses the GRE header starting at `ip_header_len` and the family header behind it.
#[inline]
pub(crate) fn parse(
    l3: &[u8],
    ip_header_len: usize,
    tunnel_types: TunnelTypeBitmap,
) -> Result<Decoded, Reject> {
    let flags = read_u16_be(l3, ip_header_len + gre::FLAGS_OFFSET).ok_or(TRUNCATED)?;
    let protocol_type =
        EtherType(read_u16_be(l3, ip_header_len + gre::PROTOCOL_OFFSET).ok_or(TRUNCATED)?);

    // source routing entries are variable length and long deprecated
    if flags & gre::FLAG_ROUTING != 0 {
        return Err(Reject::UnknownGreSignature);
    }

    let version = flags & gre::VERSION_MASK;
    let payload_start = ip_header_len + GRE_HEADER_SIZE + option_len(flags);

    match protocol_type {
        ERSPAN_II_PROTOCOL_TYPE if version == 0 && tunnel_types.has(TunnelType::Erspan) => {
            if flags & gre::FLAG_SEQUENCE == 0 {
                erspan_i(l3, payload_start)
            } else {
                erspan_ii(l3, payload_start)
            }
        }
        ERSPAN_III_PROTOCOL_TYPE if version == 0 && tunnel_types.has(TunnelType::Erspan) => {
            erspan_iii(l3, payload_start)
        }
        EtherTypes::Ipv4 | EtherTypes::Ipv6
            if version <= gre::VERSION_ENHANCED
                && flags & gre::FLAG_KEY != 0
                && tunnel_types.has(TunnelType::TencentGre) =>
        {
            tencent_gre(l3, ip_header_len, flags, protocol_type, payload_start)
        }
        _ => Err(Reject::UnknownGreSignature),
    }
}

fn erspan_i(l3: &[u8], payload_start: usize) -> Result<Decoded, Reject> {
    if l3.len() < payload_start {
        return Err(TRUNCATED);
    }
    Ok(Decoded {
        family: TunnelFamily::ErspanI,
        offset: payload_start,
        id: 0,
        inner: InnerFrame::Ethernet,
    })
}

fn erspan_ii(l3: &[u8], payload_start: usize) -> Result<Decoded, Reject> {
    let offset = payload_start + ERSPAN_II_HEADER_SIZE;
    if l3.len() < offset {
        return Err(TRUNCATED);
    }
    let word = read_u32_be(l3, payload_start + erspan::SESSION_WORD_OFFSET).ok_or(TRUNCATED)?;
    if word >> erspan::VERSION_SHIFT != erspan::TYPE_II_VERSION {
        return Err(Reject::BadErspanHeader);
    }
    Ok(Decoded {
        family: TunnelFamily::ErspanII,
        offset,
        id: word & erspan::SESSION_ID_MASK,
        inner: InnerFrame::Ethernet,
    })
}

fn erspan_iii(l3: &[u8], payload_start: usize) -> Result<Decoded, Reject> {
    let mut offset = payload_start + ERSPAN_III_HEADER_SIZE;
    if l3.len() < offset {
        return Err(TRUNCATED);
    }
    let word = read_u32_be(l3, payload_start + erspan::SESSION_WORD_OFFSET).ok_or(TRUNCATED)?;
    if word >> erspan::VERSION_SHIFT != erspan::TYPE_III_VERSION {
        return Err(Reject::BadErspanHeader);
    }
    let flags = read_u8(l3, payload_start + erspan::TYPE_III_FLAGS_OFFSET).ok_or(TRUNCATED)?;
    if flags & erspan::TYPE_III_OPTIONAL_SUBHEADER != 0 {
        offset += ERSPAN_III_SUBHEADER_SIZE;
        if l3.len() < offset {
            return Err(TRUNCATED);
        }
    }
    Ok(Decoded {
        family: TunnelFamily::ErspanIII,
        offset,
        id: word & erspan::SESSION_ID_MASK,
        inner: InnerFrame::Ethernet,
    })
}

fn tencent_gre(
    l3: &[u8],
    ip_header_len: usize,
    flags: u16,
    protocol_type: EtherType,
    payload_start: usize,
) -> Result<Decoded, Reject> {
    if l3.len() < payload_start {
        return Err(TRUNCATED);
    }
    let mut key_offset = ip_header_len + gre::KEY_OFFSET;
    if flags & gre::FLAG_CHECKSUM != 0 {
        key_offset += gre::CHECKSUM_LEN;
    }
    let vendor_id = read_u32_be(l3, key_offset).ok_or(TRUNCATED)?;
    Ok(Decoded {
        family: TunnelFamily::TencentGre,
        offset: payload_start,
        id: vendor_id,
        inner: InnerFrame::Ip(protocol_type),
    })
}

/// Writes an Ethernet header into the 14 bytes before the bare IP packet at
/// `ip_offset` and returns the offset of that header.
///
/// The destination MAC is zero and the source MAC is `00:00:00:00` followed
/// by `tag`, the outer IPv4 identification, so downstream can tell the
/// addresses are synthetic. Returns `None` when there is no room before
/// `ip_offset`, leaving `l3` untouched.
pub fn write_pseudo_ethernet(
    l3: &mut [u8],
    ip_offset: usize,
    ethertype: EtherType,
    tag: u16,
) -> Option<usize> {
    let start = ip_offset.checked_sub(ETH_HEADER_SIZE)?;
    let mut header = MutableEthernetPacket::new(l3.get_mut(start..ip_offset)?)?;
    let [hi, lo] = tag.to_be_bytes();
    header.set_destination(MacAddr::new(0, 0, 0, 0, 0, 0));
    header.set_source(MacAddr::new(0, 0, 0, 0, hi, lo));
    header.set_ethertype(ethertype);
    Some(start)
}
