use std::fmt;
use std::fmt::Formatter;

use crate::tunnel_info::TunnelInfo;

/// A decapsulated frame handed to downstream collaborators.
///
/// Only frames carrying at least one recognised tunnel are emitted. The inner
/// payload is `frame[inner_offset..]` and starts with an Ethernet header.
#[derive(Debug, Clone)]
pub struct DecapResult {
    /// The captured frame, datalink header included.
    pub frame: Vec<u8>,
    /// Offset of the outer IP header in `frame`.
    pub l3_offset: usize,
    /// Offset of the innermost decapsulated payload in `frame`.
    pub inner_offset: usize,
    pub tunnel: TunnelInfo,
}

impl DecapResult {
    pub fn inner(&self) -> &[u8] {
        self.frame.get(self.inner_offset..).unwrap_or_default()
    }

    /// Total number of tunnel header bytes removed, outer IP header included.
    pub fn overhead(&self) -> usize {
        self.inner_offset.saturating_sub(self.l3_offset)
    }
}

impl fmt::Display for DecapResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            ".-[ {} -> {} ({}) ]-\n\
            |\n\
            | type     = {}\n\
            | id       = {}\n\
            | tier     = {}\n\
            | l3       = {}\n\
            | inner    = {} ({} bytes)\n\
            `----\n",
            self.tunnel.src,
            self.tunnel.dst,
            if self.tunnel.is_ipv6 { "ipv6 low32" } else { "ipv4" },
            self.tunnel.tunnel_type,
            self.tunnel.id,
            self.tunnel.tier,
            self.l3_offset,
            self.inner_offset,
            self.inner().len(),
        )
    }
}
