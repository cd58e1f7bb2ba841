use std::fmt;
use std::fs::File;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use pcap_file::pcap::PcapReader;
use pcap_file::DataLink;
use pnet::datalink::{self, Channel, Config};
use tracing::{debug, error, info, trace};

use crate::config::DecapConfig;
use crate::decapsulate::Decapsulator;
use crate::error::DecapError;
use crate::ip_header::IpVersion;
use crate::output::DecapResult;
use crate::packet_parser::{locate_l3, locate_l3_as, DatalinkFormat};
use crate::tunnel_info::TunnelInfo;
use crate::verdict::Reject;

/// Why a captured frame produced no [`DecapResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unmatched {
    /// No IP header could be located behind the datalink header.
    NotIp,
    /// The outer IP packet carries no recognised tunnel.
    Rejected(Reject),
}

impl fmt::Display for Unmatched {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unmatched::NotIp => write!(f, "no ip header found"),
            Unmatched::Rejected(reject) => write!(f, "{reject}"),
        }
    }
}

/// Decapsulates every stacked tunnel of a captured frame.
///
/// The in-place entry points are used, so the inner payload is an Ethernet
/// frame for every family; vendor GRE gets a pseudo Ethernet header written
/// into `frame`. After each match that payload is stripped of its L2 header
/// and fed back into the same record until nothing matches or the tier limit
/// is reached. `format` pins the datalink type of the outer frame; `None`
/// autodetects it.
pub fn decapsulate_frame(
    decapsulator: &Decapsulator,
    mut frame: Vec<u8>,
    format: Option<DatalinkFormat>,
) -> Result<DecapResult, Unmatched> {
    let start = match format {
        Some(format) => locate_l3_as(&frame, format),
        None => locate_l3(&frame),
    }
    .ok_or(Unmatched::NotIp)?;

    let mut tunnel = TunnelInfo::default();
    let mut cursor = start.offset;
    let mut version = start.version;
    let mut inner_offset = 0;

    loop {
        let l3 = frame.get_mut(cursor..).unwrap_or_default();
        let verdict = match version {
            IpVersion::V4 => decapsulator.inspect_in_place(&mut tunnel, l3),
            IpVersion::V6 => decapsulator.inspect6_in_place(&mut tunnel, l3),
        };
        match verdict {
            Ok(offset) => {
                inner_offset = cursor + offset;
                let inner = frame.get(inner_offset..).unwrap_or_default();
                match locate_l3_as(inner, DatalinkFormat::Ethernet) {
                    Some(next) => {
                        cursor = inner_offset + next.offset;
                        version = next.version;
                    }
                    None => break,
                }
            }
            Err(reject) if tunnel.tier == 0 => return Err(Unmatched::Rejected(reject)),
            Err(reject) => {
                trace!("Stopped at tier {}: {}", tunnel.tier, reject);
                break;
            }
        }
    }

    Ok(DecapResult { frame, l3_offset: start.offset, inner_offset, tunnel })
}

/// Counters kept by [`TunnelDecap`] while processing a capture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecapStats {
    pub frames: u64,
    pub decapsulated: u64,
    pub unmatched: u64,
    pub not_ip: u64,
    pub read_errors: u64,
}

impl fmt::Display for DecapStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frames: {}, decapsulated: {}, unmatched: {}, not ip: {}, read errors: {}",
            self.frames, self.decapsulated, self.unmatched, self.not_ip, self.read_errors
        )
    }
}

/// Drives the decapsulation engine over a PCAP file or a live interface.
///
/// Unmatched frames are counted in [`DecapStats`] and never sent.
pub struct TunnelDecap {
    decapsulator: Decapsulator,
    stats: DecapStats,
}

impl TunnelDecap {
    /// Creates a new driver from a configuration, validating it first.
    pub fn new(config: DecapConfig) -> Result<Self, DecapError> {
        Ok(Self { decapsulator: Decapsulator::new(config)?, stats: DecapStats::default() })
    }

    pub fn decapsulator(&self) -> &Decapsulator {
        &self.decapsulator
    }

    pub fn stats(&self) -> &DecapStats {
        &self.stats
    }

    /// Processes one captured frame and updates the counters.
    pub fn process_frame(
        &mut self,
        frame: Vec<u8>,
        format: Option<DatalinkFormat>,
    ) -> Option<DecapResult> {
        self.stats.frames += 1;
        match decapsulate_frame(&self.decapsulator, frame, format) {
            Ok(result) => {
                self.stats.decapsulated += 1;
                Some(result)
            }
            Err(Unmatched::NotIp) => {
                self.stats.not_ip += 1;
                None
            }
            Err(Unmatched::Rejected(reject)) => {
                trace!("Frame not decapsulated: {}", reject);
                self.stats.unmatched += 1;
                None
            }
        }
    }

    fn process_with<F>(
        &mut self,
        mut packet_fn: F,
        format: Option<DatalinkFormat>,
        sender: Sender<DecapResult>,
        cancel_signal: Option<Arc<AtomicBool>>,
    ) -> Result<(), DecapError>
    where
        F: FnMut() -> Option<Result<Vec<u8>, DecapError>>,
    {
        while let Some(packet_result) = packet_fn() {
            if let Some(ref cancel) = cancel_signal {
                if cancel.load(Ordering::Relaxed) {
                    debug!("Cancellation signal received, stopping packet processing");
                    break;
                }
            }

            match packet_result {
                Ok(packet) => {
                    if let Some(result) = self.process_frame(packet, format) {
                        if sender.send(result).is_err() {
                            error!("Receiver dropped, stopping packet processing");
                            break;
                        }
                    }
                }
                Err(e) => {
                    self.stats.read_errors += 1;
                    error!("Failed to read packet: {}", e);
                }
            }
        }
        info!("Capture finished: {}", self.stats);
        Ok(())
    }

    /// Decapsulates frames captured from a live network interface.
    pub fn analyze_network(
        &mut self,
        interface_name: &str,
        sender: Sender<DecapResult>,
        cancel_signal: Option<Arc<AtomicBool>>,
    ) -> Result<(), DecapError> {
        let interfaces = datalink::interfaces();
        let interface = interfaces
            .into_iter()
            .find(|iface| iface.name == interface_name)
            .ok_or_else(|| {
                DecapError::Capture(format!("Could not find network interface: {interface_name}"))
            })?;

        debug!("Using network interface: {}", interface.name);

        let config = Config { promiscuous: true, ..Config::default() };

        let (_tx, mut rx) = match datalink::channel(&interface, config) {
            Ok(Channel::Ethernet(tx, rx)) => (tx, rx),
            Ok(_) => return Err(DecapError::Capture("Unhandled channel type".to_string())),
            Err(e) => return Err(DecapError::Capture(format!("Unable to create channel: {e}"))),
        };

        self.process_with(
            move || match rx.next() {
                Ok(packet) => Some(Ok(packet.to_vec())),
                Err(e) => Some(Err(DecapError::Capture(format!("Error receiving packet: {e}")))),
            },
            Some(DatalinkFormat::Ethernet),
            sender,
            cancel_signal,
        )
    }

    /// Decapsulates frames read from a PCAP file.
    pub fn analyze_pcap(
        &mut self,
        pcap_path: &str,
        sender: Sender<DecapResult>,
        cancel_signal: Option<Arc<AtomicBool>>,
    ) -> Result<(), DecapError> {
        let file = File::open(pcap_path)?;
        self.analyze_pcap_reader(file, sender, cancel_signal)
    }

    /// Same as [`TunnelDecap::analyze_pcap`] for any PCAP byte source.
    pub fn analyze_pcap_reader<R: Read>(
        &mut self,
        reader: R,
        sender: Sender<DecapResult>,
        cancel_signal: Option<Arc<AtomicBool>>,
    ) -> Result<(), DecapError> {
        let mut pcap_reader = PcapReader::new(reader)
            .map_err(|e| DecapError::Capture(format!("Failed to create PCAP reader: {e}")))?;
        let format = datalink_format(pcap_reader.header().datalink);
        debug!("PCAP datalink {:?}, using {:?}", pcap_reader.header().datalink, format);

        self.process_with(
            move || match pcap_reader.next_packet() {
                Some(Ok(packet)) => Some(Ok(packet.data.to_vec())),
                Some(Err(e)) => {
                    Some(Err(DecapError::Capture(format!("Error reading PCAP packet: {e}"))))
                }
                None => None,
            },
            format,
            sender,
            cancel_signal,
        )
    }
}

/// Maps a PCAP link type to a datalink format, `None` meaning autodetect.
pub fn datalink_format(datalink: DataLink) -> Option<DatalinkFormat> {
    match datalink {
        DataLink::ETHERNET => Some(DatalinkFormat::Ethernet),
        DataLink::RAW | DataLink::IPV4 | DataLink::IPV6 => Some(DatalinkFormat::RawIp),
        DataLink::NULL | DataLink::LOOP => Some(DatalinkFormat::Null),
        _ => None,
    }
}
