//! Header sizes, field offsets and protocol signatures used by the decapsulation engine.
//!
//! Every `*_OFFSET` constant at the top level of this module is relative to the
//! first byte of the outer IP header (L2 already stripped). The fast-reject path
//! reads exactly [`IPV4_PROTOCOL_OFFSET`], [`UDP_DPORT_OFFSET`] and
//! [`VXLAN_FLAGS_OFFSET`] (or their IPv6 counterparts) and nothing else before
//! deciding a frame is not tunneled.

use pnet::packet::ethernet::EtherType;

pub const ETH_HEADER_SIZE: usize = 14;
pub const IPV4_HEADER_SIZE: usize = 20;
pub const IPV6_HEADER_SIZE: usize = 40;
pub const UDP_HEADER_SIZE: usize = 8;
pub const VXLAN_HEADER_SIZE: usize = 8;
pub const GRE_HEADER_SIZE: usize = 4;
pub const ERSPAN_II_HEADER_SIZE: usize = 8;
pub const ERSPAN_III_HEADER_SIZE: usize = 12;
pub const ERSPAN_III_SUBHEADER_SIZE: usize = 8;

pub mod ipv4 {
    pub const VERSION_IHL_OFFSET: usize = 0;
    pub const ID_OFFSET: usize = 4;
    pub const PROTO_OFFSET: usize = 9;
    pub const SRC_OFFSET: usize = 12;
    pub const DST_OFFSET: usize = 16;
    pub const IHL_MASK: u8 = 0x0f;
}

pub mod ipv6 {
    pub const NEXT_HEADER_OFFSET: usize = 6;
    pub const SRC_OFFSET: usize = 8;
    pub const DST_OFFSET: usize = 24;
    // only the trailing 4 bytes of each address are kept
    pub const SRC_LOW32_OFFSET: usize = SRC_OFFSET + 12;
    pub const DST_LOW32_OFFSET: usize = DST_OFFSET + 12;
}

pub mod udp {
    pub const DST_OFFSET: usize = 2;
}

pub mod gre {
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    // |C|R|K|S|s|Recur|  Flags  | Ver |         Protocol Type         |
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    pub const FLAGS_OFFSET: usize = 0;
    pub const PROTOCOL_OFFSET: usize = 2;
    // the key follows the checksum word when C is set
    pub const KEY_OFFSET: usize = 4;

    pub const FLAG_CHECKSUM: u16 = 0x8000;
    pub const FLAG_ROUTING: u16 = 0x4000;
    pub const FLAG_KEY: u16 = 0x2000;
    pub const FLAG_SEQUENCE: u16 = 0x1000;
    pub const VERSION_MASK: u16 = 0x0007;

    pub const CHECKSUM_LEN: usize = 4;
    pub const KEY_LEN: usize = 4;
    pub const SEQUENCE_LEN: usize = 4;

    // RFC 2637 enhanced GRE, still used by the vendor overlay
    pub const VERSION_ENHANCED: u16 = 1;
}

pub mod erspan {
    // ERSPAN Type II header (8 octets)
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    // |  Ver  |          VLAN         | COS | En|T|    Session ID     |
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    // |      Reserved         |                  Index                |
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    //
    // ERSPAN Type III header (12 octets)
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    // |  Ver  |          VLAN         | COS |BSO|T|     Session ID    |
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    // |                          Timestamp                            |
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    // |             SGT               |P|    FT   |   Hw ID   |D|Gra|O|
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    pub const SESSION_WORD_OFFSET: usize = 0;
    pub const SESSION_ID_MASK: u32 = 0x3ff;
    pub const VERSION_SHIFT: u32 = 28;
    pub const TYPE_II_VERSION: u32 = 1;
    pub const TYPE_III_VERSION: u32 = 2;
    pub const TYPE_III_FLAGS_OFFSET: usize = 11;
    pub const TYPE_III_OPTIONAL_SUBHEADER: u8 = 0x01;
}

pub mod vxlan {
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    // |R|R|R|R|I|R|R|R|            Reserved                           |
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    // |                VXLAN Network Identifier (VNI) |   Reserved    |
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    pub const FLAGS_OFFSET: usize = 0;
    pub const VNI_OFFSET: usize = 4;
    pub const FLAG_VALID_VNI: u8 = 0x08;
    pub const VNI_SHIFT: u32 = 8;
}

pub const IPV4_PROTOCOL_OFFSET: usize = ipv4::PROTO_OFFSET; // 9
pub const IPV4_IHL_OFFSET: usize = ipv4::VERSION_IHL_OFFSET; // 0
pub const UDP_DPORT_OFFSET: usize = IPV4_HEADER_SIZE + udp::DST_OFFSET; // 22
pub const VXLAN_FLAGS_OFFSET: usize = IPV4_HEADER_SIZE + UDP_HEADER_SIZE + vxlan::FLAGS_OFFSET; // 28
pub const VXLAN_VNI_OFFSET: usize = IPV4_HEADER_SIZE + UDP_HEADER_SIZE + vxlan::VNI_OFFSET; // 32

pub const IPV6_NEXT_HEADER_OFFSET: usize = ipv6::NEXT_HEADER_OFFSET; // 6
pub const UDP6_DPORT_OFFSET: usize = IPV6_HEADER_SIZE + udp::DST_OFFSET; // 42
pub const VXLAN6_FLAGS_OFFSET: usize =
    IPV6_HEADER_SIZE + UDP_HEADER_SIZE + vxlan::FLAGS_OFFSET; // 48
pub const VXLAN6_VNI_OFFSET: usize = IPV6_HEADER_SIZE + UDP_HEADER_SIZE + vxlan::VNI_OFFSET; // 52

// min L3 lengths for a full match
pub const VXLAN_PACKET_SIZE: usize = IPV4_HEADER_SIZE + UDP_HEADER_SIZE + VXLAN_HEADER_SIZE; // 36
pub const VXLAN6_PACKET_SIZE: usize = IPV6_HEADER_SIZE + UDP_HEADER_SIZE + VXLAN_HEADER_SIZE; // 56

pub const VXLAN_PORT: u16 = 4789;
pub const VXLAN_PORT_LINUX: u16 = 8472;
pub const VXLAN_PORT_VENDOR: u16 = 50968;
pub const DEFAULT_VXLAN_PORTS: [u16; 3] = [VXLAN_PORT, VXLAN_PORT_LINUX, VXLAN_PORT_VENDOR];

pub const ERSPAN_II_PROTOCOL_TYPE: EtherType = EtherType(0x88be);
pub const ERSPAN_III_PROTOCOL_TYPE: EtherType = EtherType(0x22eb);

pub const TUNNEL_TIER_LIMIT: u8 = 2;
