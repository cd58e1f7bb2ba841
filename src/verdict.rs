//! Outcome of a single decapsulation attempt.
//!
//! The public entry points collapse every [`Reject`] into a zero offset. The
//! reason is still returned by the `inspect*` variants so callers can count
//! unmatched frames by cause without the engine logging anything itself.

use std::fmt;

/// Dispatcher progress. A call moves strictly forward and stops at the first
/// failed check. Validating the family header is the final step: it either
/// rejects at `ProtocolMatched` or writes the record and returns an offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DecapState {
    Init,
    OuterParsed,
    ProtocolMatched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reject {
    /// No tunnel family enabled for this call.
    Disabled,
    /// The record already carries the configured maximum number of tiers.
    TierLimit,
    /// The buffer ends before the header being read. Carries `Init` when the
    /// outer header itself is cut short, `ProtocolMatched` when a UDP or GRE
    /// family header is.
    Truncated(DecapState),
    /// Outer protocol is neither UDP nor GRE, or its family is not enabled.
    UnsupportedProtocol,
    /// UDP destination port is not a configured VXLAN port.
    UnknownPort,
    /// VXLAN header without the valid-VNI flag.
    BadVxlanFlags,
    /// Outer IP version or header length is inconsistent.
    BadOuterHeader,
    /// GRE header matches none of the enabled families.
    UnknownGreSignature,
    /// ERSPAN header version does not fit the GRE protocol type.
    BadErspanHeader,
}

impl Reject {
    /// Last dispatcher state reached before rejecting.
    pub fn stage(&self) -> DecapState {
        match self {
            Reject::Disabled | Reject::TierLimit => DecapState::Init,
            Reject::Truncated(stage) => *stage,
            Reject::UnsupportedProtocol => DecapState::OuterParsed,
            Reject::UnknownPort
            | Reject::BadVxlanFlags
            | Reject::BadOuterHeader
            | Reject::UnknownGreSignature
            | Reject::BadErspanHeader => DecapState::ProtocolMatched,
        }
    }

    /// Number of header bytes examined before a fast rejection.
    ///
    /// Only defined for the fast-reject reasons, whose cost is part of the
    /// engine's contract: protocol byte, then destination port, then flags.
    pub fn bytes_read(&self) -> Option<usize> {
        match self {
            Reject::Disabled | Reject::TierLimit => Some(0),
            Reject::UnsupportedProtocol => Some(1),
            Reject::UnknownPort => Some(1 + 2),
            Reject::BadVxlanFlags => Some(1 + 2 + 1),
            _ => None,
        }
    }
}

impl fmt::Display for Reject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reject::Disabled => write!(f, "no tunnel type enabled"),
            Reject::TierLimit => write!(f, "tunnel tier limit reached"),
            Reject::Truncated(stage) => write!(f, "truncated at {stage:?}"),
            Reject::UnsupportedProtocol => write!(f, "unsupported outer protocol"),
            Reject::UnknownPort => write!(f, "not a tunnel port"),
            Reject::BadVxlanFlags => write!(f, "vxlan flags without valid vni"),
            Reject::BadOuterHeader => write!(f, "malformed outer ip header"),
            Reject::UnknownGreSignature => write!(f, "unknown gre signature"),
            Reject::BadErspanHeader => write!(f, "malformed erspan header"),
        }
    }
}

/// `Ok(offset)` from the start of the outer IP header to the inner payload.
pub type Verdict = Result<usize, Reject>;
