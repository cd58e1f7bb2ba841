use tracing::debug;

use crate::consts::{DEFAULT_VXLAN_PORTS, TUNNEL_TIER_LIMIT};
use crate::error::DecapError;
use crate::tunnel_info::TunnelTypeBitmap;

/// Settings for a [`crate::Decapsulator`], usually one per traffic source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecapConfig {
    /// Families to attempt. Anything outside the set is never parsed.
    pub tunnel_types: TunnelTypeBitmap,
    /// UDP destination ports carrying VXLAN.
    pub vxlan_ports: Vec<u16>,
    /// Maximum number of stacked tunnels recorded on one record.
    pub tier_limit: u8,
}

impl Default for DecapConfig {
    fn default() -> Self {
        Self {
            tunnel_types: TunnelTypeBitmap::all(),
            vxlan_ports: DEFAULT_VXLAN_PORTS.to_vec(),
            tier_limit: TUNNEL_TIER_LIMIT,
        }
    }
}

impl DecapConfig {
    pub fn with_tunnel_types(mut self, tunnel_types: impl Into<TunnelTypeBitmap>) -> Self {
        self.tunnel_types = tunnel_types.into();
        self
    }

    pub fn with_vxlan_ports(mut self, vxlan_ports: Vec<u16>) -> Self {
        self.vxlan_ports = vxlan_ports;
        self
    }

    pub fn with_tier_limit(mut self, tier_limit: u8) -> Self {
        self.tier_limit = tier_limit;
        self
    }

    /// Builds a configuration from family names such as `"vxlan"` or `"erspan"`.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, DecapError> {
        let tunnel_types = TunnelTypeBitmap::from_strings(names)?;
        Ok(Self::default().with_tunnel_types(tunnel_types))
    }

    pub fn validate(&self) -> Result<(), DecapError> {
        if self.tier_limit == 0 {
            return Err(DecapError::Misconfiguration(
                "tier limit must be at least 1".to_string(),
            ));
        }
        if self.vxlan_ports.is_empty() {
            return Err(DecapError::Misconfiguration(
                "at least one VXLAN port is required".to_string(),
            ));
        }
        if self.vxlan_ports.contains(&0) {
            return Err(DecapError::Misconfiguration("VXLAN port 0 is not valid".to_string()));
        }
        if self.tunnel_types.is_empty() {
            debug!("No tunnel type enabled, every frame will pass through undecapsulated");
        }
        Ok(())
    }
}
