use clap::{Parser, Subcommand};
use pcap_file::pcap::PcapReader;
use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;
use tunnel_decap::parallel::{DispatchResult, WorkerPool};
use tunnel_decap::process::datalink_format;
use tunnel_decap::{DecapConfig, DecapResult, TunnelDecap, TunnelTypeBitmap};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Tunnel types to decapsulate (vxlan, erspan, tencent-gre). All when omitted
    #[arg(short = 't', long = "tunnel-type")]
    tunnel_types: Vec<String>,

    /// UDP destination ports carrying VXLAN. Standard ports when omitted
    #[arg(short = 'p', long = "vxlan-port")]
    vxlan_ports: Vec<u16>,

    /// Maximum number of stacked tunnels to remove
    #[arg(long = "tier-limit", default_value_t = tunnel_decap::consts::TUNNEL_TIER_LIMIT)]
    tier_limit: u8,

    /// Stop after this many decapsulated frames
    #[arg(short = 'n', long = "limit")]
    limit: Option<usize>,

    /// Log file path
    #[arg(short = 'l', long = "log-file")]
    log_file: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Live {
        /// Network interface name
        #[arg(short = 'i', long)]
        interface: String,
    },
    Pcap {
        /// Path to PCAP file
        #[arg(short = 'f', long)]
        file: String,

        /// Decapsulate on this many worker threads instead of the calling one
        #[arg(short = 'w', long, default_value_t = 0)]
        workers: usize,
    },
}

fn initialize_logging(log_file: Option<String>) {
    let console_writer = std::io::stdout.with_max_level(tracing::Level::INFO);

    let file_appender = if let Some(log_file) = log_file {
        RollingFileAppender::new(Rotation::NEVER, ".", log_file)
            .with_max_level(tracing::Level::INFO)
    } else {
        RollingFileAppender::new(Rotation::NEVER, ".", "decap.log")
            .with_max_level(tracing::Level::INFO)
    };

    let writer = console_writer.and(file_appender);

    let subscriber = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(writer)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set subscriber: {e}");
        std::process::exit(1);
    }
}

fn build_config(args: &Args) -> Result<DecapConfig, tunnel_decap::DecapError> {
    let mut config = DecapConfig::default().with_tier_limit(args.tier_limit);
    if !args.tunnel_types.is_empty() {
        config = config.with_tunnel_types(TunnelTypeBitmap::from_strings(&args.tunnel_types)?);
    }
    if !args.vxlan_ports.is_empty() {
        config = config.with_vxlan_ports(args.vxlan_ports.clone());
    }
    config.validate()?;
    Ok(config)
}

fn run_pool(file: &str, workers: usize, config: DecapConfig, sender: Sender<DecapResult>) {
    let mut reader = match File::open(file).map(PcapReader::new) {
        Ok(Ok(reader)) => reader,
        Ok(Err(e)) => {
            error!("Failed to create PCAP reader: {e}");
            return;
        }
        Err(e) => {
            error!("Failed to open PCAP file: {e}");
            return;
        }
    };
    let format = datalink_format(reader.header().datalink);

    let pool = match WorkerPool::new(workers, 1024, sender, config, format) {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to create worker pool: {e}");
            return;
        }
    };

    while let Some(packet) = reader.next_packet() {
        match packet {
            Ok(packet) => {
                if pool.dispatch(packet.data.to_vec()) == DispatchResult::Dropped {
                    debug!("Worker queue full, frame dropped");
                }
            }
            Err(e) => error!("Error reading PCAP packet: {e}"),
        }
    }

    pool.join();
    info!("{}", pool.stats());
}

fn main() {
    let args = Args::parse();
    initialize_logging(args.log_file.clone());

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            return;
        }
    };
    info!("Decapsulating tunnel types: {}", config.tunnel_types);

    let (sender, receiver): (Sender<DecapResult>, Receiver<DecapResult>) = mpsc::channel();

    let limit = args.limit;
    let cancel_signal = Arc::new(AtomicBool::new(false));
    let cancel_clone = cancel_signal.clone();

    thread::spawn(move || {
        if let Commands::Pcap { file, workers } = &args.command {
            if *workers > 0 {
                info!("Analyzing PCAP file {} on {} workers", file, workers);
                run_pool(file, *workers, config, sender);
                return;
            }
        }

        let mut driver = match TunnelDecap::new(config) {
            Ok(driver) => driver,
            Err(e) => {
                error!("Failed to create decapsulation driver: {}", e);
                return;
            }
        };

        let result = match args.command {
            Commands::Live { interface } => {
                info!("Starting live capture on interface: {}", interface);
                driver.analyze_network(&interface, sender, Some(cancel_clone))
            }
            Commands::Pcap { file, .. } => {
                info!("Analyzing PCAP file: {}", file);
                driver.analyze_pcap(&file, sender, Some(cancel_clone))
            }
        };

        if let Err(e) = result {
            error!("Decapsulation failed: {e}");
        }
    });

    let mut received = 0usize;
    for output in receiver {
        info!("{}", output);
        received += 1;
        if limit.is_some_and(|limit| received >= limit) {
            info!("Frame limit reached, stopping");
            cancel_signal.store(true, Ordering::Relaxed);
            break;
        }
    }

    info!("Decapsulation completed, {} tunneled frames", received);
}
