use pnet::packet::ethernet::EtherType;

use crate::tunnel_info::TunnelType;

/// Concrete header layout recognised by one of the family parsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TunnelFamily {
    ErspanI,
    ErspanII,
    ErspanIII,
    Vxlan,
    Vxlan6,
    TencentGre,
}

impl TunnelFamily {
    pub fn tunnel_type(&self) -> TunnelType {
        match self {
            TunnelFamily::ErspanI | TunnelFamily::ErspanII | TunnelFamily::ErspanIII => {
                TunnelType::Erspan
            }
            TunnelFamily::Vxlan | TunnelFamily::Vxlan6 => TunnelType::Vxlan,
            TunnelFamily::TencentGre => TunnelType::TencentGre,
        }
    }
}

/// Framing of the payload found at [`Decoded::offset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InnerFrame {
    Ethernet,
    /// A bare IP packet of the given EtherType, no L2 header on the wire.
    Ip(EtherType),
}

/// What a family parser hands back to the dispatcher on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub family: TunnelFamily,
    /// Offset from the start of the outer IP header to the inner payload.
    pub offset: usize,
    pub id: u32,
    pub inner: InnerFrame,
}
