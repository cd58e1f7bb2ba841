//! Overlay tunnel decapsulation for packet telemetry.
//!
//! Given the bytes of a captured frame starting at the outer IP header, the
//! engine decides whether the frame is wrapped in ERSPAN (types I, II and
//! III over GRE), VXLAN (over IPv4 or IPv6) or the vendor GRE variant, fills
//! in a caller-owned [`TunnelInfo`] and returns the offset of the inner
//! payload. A zero offset means "not tunneled"; the record is then untouched.
//!
//! ```
//! use tunnel_decap::{TunnelInfo, TunnelType};
//!
//! let frame = [0x45u8, 0, 0, 40, 0, 0, 0, 0, 64, 6, 0, 0, 10, 0, 0, 1, 10, 0, 0, 2];
//! let mut info = TunnelInfo::default();
//! assert_eq!(info.decapsulate(&frame, TunnelType::Vxlan), 0);
//! assert!(!info.is_valid());
//! ```
//!
//! The engine neither allocates nor logs. [`TunnelDecap`] and
//! [`parallel::WorkerPool`] drive it over PCAP files and live interfaces.

#![forbid(unsafe_code)]

pub mod bytes;
pub mod consts;
pub mod family;
pub mod gre;
pub mod ip_header;
pub mod tunnel_info;
pub mod verdict;
mod vxlan;

pub mod config;
pub mod decapsulate;
pub mod error;
pub mod output;
pub mod packet_parser;
pub mod parallel;
pub mod process;

// Re-exports
pub use config::DecapConfig;
pub use decapsulate::Decapsulator;
pub use error::DecapError;
pub use output::DecapResult;
pub use process::{decapsulate_frame, DecapStats, TunnelDecap, Unmatched};
pub use tunnel_info::{TunnelInfo, TunnelType, TunnelTypeBitmap};
pub use verdict::{DecapState, Reject, Verdict};
