//! Offline driver: reads a pcap file through the connection tracker and
//! reports handshake hijacks and segment injections as it goes.

use inquisitor::capture::PacketSource;
use inquisitor::config::{self, Config};
use inquisitor::logger::{
    AttackLogger, ConnectionPacketLogger, FileConnectionPacketLogger, JsonLinesAttackLogger,
    StdoutAttackLogger,
};
use inquisitor::tracker::ConnectionTracker;

use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Parser;

/// How many packets to process between inactivity-reaper sweeps. Keeps the
/// reaper off the hot path without letting stranded half-closed connections
/// pile up indefinitely on a long capture.
const REAP_INTERVAL: u64 = 1000;

#[derive(Parser, Debug)]
#[clap(
    about = "Passive TCP stream inquisitor: replays an offline capture through the connection tracker and flags handshake hijacks and segment injection"
)]
struct Args {
    /// Offline pcap file to read. Overrides `offline_pcap` in the config file.
    #[clap(short, long, parse(from_os_str), value_name = "FILE")]
    pcap: Option<PathBuf>,

    /// TOML configuration file.
    #[clap(short, long, parse(from_os_str), value_name = "FILE")]
    config: Option<PathBuf>,

    /// Newline-delimited JSON file to write attack findings to. Findings go
    /// to stdout if omitted.
    #[clap(short, long, parse(from_os_str), value_name = "FILE")]
    attack_log: Option<PathBuf>,

    /// Directory to archive each connection's raw packet payloads into.
    #[clap(short = 'd', long, parse(from_os_str), value_name = "DIR")]
    packet_log_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };

    let pcap_path = args
        .pcap
        .clone()
        .or_else(|| config.offline_pcap.clone().map(PathBuf::from))
        .context("no pcap file given: pass --pcap or set offline_pcap in the config file")?;

    let attack_log: Rc<dyn AttackLogger> = match &args.attack_log {
        Some(path) => Rc::new(
            JsonLinesAttackLogger::create(path)
                .with_context(|| format!("failed to open attack log {}", path.display()))?,
        ),
        None => Rc::new(StdoutAttackLogger),
    };

    let mut tracker = ConnectionTracker::new(config, Rc::clone(&attack_log));
    if let Some(dir) = args.packet_log_dir.clone() {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create packet log directory {}", dir.display()))?;
        tracker = tracker.with_packet_logger(Box::new(move |flow| {
            let filename = format!(
                "{}_{}-{}_{}.raw",
                flow.src_ip, flow.src_port, flow.dst_ip, flow.dst_port
            );
            match FileConnectionPacketLogger::create(dir.join(filename)) {
                Ok(logger) => Some(Box::new(logger) as Box<dyn ConnectionPacketLogger>),
                Err(e) => {
                    log::warn!("failed to create packet log for {flow}: {e}");
                    None
                }
            }
        }));
    }

    let mut source = PacketSource::open(&pcap_path)
        .with_context(|| format!("failed to open pcap file {}", pcap_path.display()))?;

    let mut packet_count: u64 = 0;
    while let Some((flow, pkt)) = source.next_packet() {
        tracker.process(&flow, pkt);
        packet_count += 1;
        if packet_count % REAP_INTERVAL == 0 {
            tracker.check_inactive();
        }
    }
    tracker.check_inactive();
    tracker.drain();

    log::info!("processed {packet_count} packets");
    Ok(())
}
