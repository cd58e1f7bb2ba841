use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::DecapError;
use crate::ip_header::OuterHeader;

/// Overlay family recorded on a [`TunnelInfo`].
///
/// ERSPAN types I, II and III all record as [`TunnelType::Erspan`]; they only
/// differ in header layout and therefore in the returned offset.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TunnelType {
    #[default]
    None = 0,
    Vxlan = 1,
    Erspan = 2,
    TencentGre = 3,
}

impl TunnelType {
    pub const ALL: [TunnelType; 3] = [TunnelType::Vxlan, TunnelType::Erspan, TunnelType::TencentGre];
}

impl fmt::Display for TunnelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelType::None => write!(f, "none"),
            TunnelType::Vxlan => write!(f, "VXLAN"),
            TunnelType::Erspan => write!(f, "ERSPAN"),
            TunnelType::TencentGre => write!(f, "TENCENT-GRE"),
        }
    }
}

impl FromStr for TunnelType {
    type Err = DecapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(TunnelType::None),
            "vxlan" => Ok(TunnelType::Vxlan),
            "erspan" => Ok(TunnelType::Erspan),
            "tencent-gre" | "tencent_gre" | "gre" => Ok(TunnelType::TencentGre),
            other => Err(DecapError::UnsupportedTunnelType(other.to_string())),
        }
    }
}

/// Set of tunnel families a caller expects on a traffic source.
///
/// Families outside the set are never attempted by the dispatcher.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TunnelTypeBitmap(u8);

impl TunnelTypeBitmap {
    pub const fn empty() -> Self {
        TunnelTypeBitmap(0)
    }

    pub fn all() -> Self {
        Self::new(&TunnelType::ALL)
    }

    pub fn new(tunnel_types: &[TunnelType]) -> Self {
        let mut bitmap = Self::empty();
        for tunnel_type in tunnel_types {
            bitmap.add(*tunnel_type);
        }
        bitmap
    }

    /// Builds a bitmap from configured family names, failing on the first unknown name.
    pub fn from_strings<S: AsRef<str>>(names: &[S]) -> Result<Self, DecapError> {
        let mut bitmap = Self::empty();
        for name in names {
            bitmap.add(name.as_ref().parse()?);
        }
        Ok(bitmap)
    }

    pub fn add(&mut self, tunnel_type: TunnelType) {
        if tunnel_type != TunnelType::None {
            self.0 |= 1 << tunnel_type as u8;
        }
    }

    #[inline(always)]
    pub fn has(&self, tunnel_type: TunnelType) -> bool {
        self.0 & (1 << tunnel_type as u8) != 0
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl From<TunnelType> for TunnelTypeBitmap {
    fn from(tunnel_type: TunnelType) -> Self {
        let mut bitmap = Self::empty();
        bitmap.add(tunnel_type);
        bitmap
    }
}

impl fmt::Display for TunnelTypeBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "{}", TunnelType::None);
        }
        let mut separator = "";
        for tunnel_type in TunnelType::ALL {
            if self.has(tunnel_type) {
                write!(f, "{separator}{tunnel_type}")?;
                separator = " ";
            }
        }
        Ok(())
    }
}

/// Uniform tunnel metadata filled in by a successful decapsulation.
///
/// Callers own the record and pass it in by `&mut`; a call that does not
/// match leaves it untouched. Only the outermost tunnel's endpoints, id and
/// family are kept: chained calls on the inner bytes only bump `tier`.
///
/// For an IPv6 outer header `src`/`dst` hold the low 32 bits of the 128-bit
/// addresses and `is_ipv6` is set. They are endpoint hints, not addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TunnelInfo {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub id: u32,
    pub tunnel_type: TunnelType,
    pub tier: u8,
    pub is_ipv6: bool,
}

impl Default for TunnelInfo {
    fn default() -> Self {
        TunnelInfo {
            src: Ipv4Addr::UNSPECIFIED,
            dst: Ipv4Addr::UNSPECIFIED,
            id: 0,
            tunnel_type: TunnelType::None,
            tier: 0,
            is_ipv6: false,
        }
    }
}

impl TunnelInfo {
    pub fn is_valid(&self) -> bool {
        self.tunnel_type != TunnelType::None
    }

    /// Resets the record for reuse on the next frame.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[inline(always)]
    pub(crate) fn commit(&mut self, outer: &OuterHeader, tunnel_type: TunnelType, id: u32) {
        if self.tier == 0 {
            self.src = outer.src;
            self.dst = outer.dst;
            self.is_ipv6 = outer.is_ipv6();
            self.tunnel_type = tunnel_type;
            self.id = id;
        }
        self.tier = self.tier.saturating_add(1);
    }
}

impl fmt::Display for TunnelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type: {}, src: {}, dst: {}, id: {}, tier: {}{}",
            self.tunnel_type,
            self.src,
            self.dst,
            self.id,
            self.tier,
            if self.is_ipv6 { " (ipv6 low32)" } else { "" }
        )
    }
}
