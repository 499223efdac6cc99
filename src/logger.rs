//! Attack and packet log sinks.
//!
//! These are the core's only I/O seam (§5): packet processing must never
//! block on them. The trait methods are narrow by design; everything else
//! (formatting, rotation, batching) is a sink's own business.

use crate::flow::FlowKey;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::Serialize;

/// Receives attack findings from the core.
pub trait AttackLogger {
    /// A second SYN-ACK matching the recorded handshake witness was observed.
    fn report_hijack(&self, timestamp: u64, flow: &FlowKey);

    /// A retransmitted segment's payload differs from what was previously
    /// observed for the same sequence range.
    #[allow(clippy::too_many_arguments)]
    fn report_injection(
        &self,
        timestamp: u64,
        flow: &FlowKey,
        new_payload: &[u8],
        overlap_bytes: &[u8],
        start_seq: u32,
        end_seq: u32,
        payload_start_offset: usize,
        payload_end_offset: usize,
    );

    /// Flushes and releases any underlying resources. Called once, when the
    /// owning connection (or the tracker, on shutdown) is destroyed.
    fn close(&self);
}

/// Optionally archives every raw packet payload seen for a connection, so an
/// analyst can re-examine the evidence after the fact.
pub trait ConnectionPacketLogger {
    fn write_packet(&mut self, raw_bytes: &[u8], flow: &FlowKey);
    fn close(&mut self);
}

/// An `AttackLogger` that does nothing. Useful as a default when no sink is
/// configured.
#[derive(Debug, Default)]
pub struct NullAttackLogger;

impl AttackLogger for NullAttackLogger {
    fn report_hijack(&self, _timestamp: u64, _flow: &FlowKey) {}
    fn report_injection(
        &self,
        _timestamp: u64,
        _flow: &FlowKey,
        _new_payload: &[u8],
        _overlap_bytes: &[u8],
        _start_seq: u32,
        _end_seq: u32,
        _payload_start_offset: usize,
        _payload_end_offset: usize,
    ) {
    }
    fn close(&self) {}
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind")]
enum AttackRecord {
    #[serde(rename = "hijack")]
    Hijack { timestamp: u64, flow: String },
    #[serde(rename = "injection")]
    Injection {
        timestamp: u64,
        flow: String,
        new_payload_hex: String,
        overlap_bytes_hex: String,
        start_seq: u32,
        end_seq: u32,
        payload_start_offset: usize,
        payload_end_offset: usize,
    },
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Writes one JSON object per attack finding, newline-delimited, to a
/// buffered sink. Mirrors the reference framework's example applications,
/// which log subscribed data as JSON lines.
pub struct JsonLinesAttackLogger {
    writer: std::sync::Mutex<BufWriter<File>>,
}

impl JsonLinesAttackLogger {
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(JsonLinesAttackLogger {
            writer: std::sync::Mutex::new(BufWriter::new(file)),
        })
    }

    fn write_record(&self, record: &AttackRecord) {
        let mut writer = self.writer.lock().expect("attack log mutex poisoned");
        match serde_json::to_string(record) {
            Ok(line) => {
                if let Err(e) = writeln!(writer, "{line}") {
                    log::error!("failed to write attack record: {e}");
                }
            }
            Err(e) => log::error!("failed to serialize attack record: {e}"),
        }
    }
}

impl AttackLogger for JsonLinesAttackLogger {
    fn report_hijack(&self, timestamp: u64, flow: &FlowKey) {
        self.write_record(&AttackRecord::Hijack {
            timestamp,
            flow: flow.to_string(),
        });
    }

    fn report_injection(
        &self,
        timestamp: u64,
        flow: &FlowKey,
        new_payload: &[u8],
        overlap_bytes: &[u8],
        start_seq: u32,
        end_seq: u32,
        payload_start_offset: usize,
        payload_end_offset: usize,
    ) {
        self.write_record(&AttackRecord::Injection {
            timestamp,
            flow: flow.to_string(),
            new_payload_hex: to_hex(new_payload),
            overlap_bytes_hex: to_hex(overlap_bytes),
            start_seq,
            end_seq,
            payload_start_offset,
            payload_end_offset,
        });
    }

    fn close(&self) {
        let mut writer = self.writer.lock().expect("attack log mutex poisoned");
        if let Err(e) = writer.flush() {
            log::error!("failed to flush attack log: {e}");
        }
    }
}

/// Logs findings to stdout in a human-readable line, for interactive runs.
#[derive(Debug, Default)]
pub struct StdoutAttackLogger;

impl AttackLogger for StdoutAttackLogger {
    fn report_hijack(&self, timestamp: u64, flow: &FlowKey) {
        println!("[{timestamp}] HIJACK suspected on {flow}");
    }

    fn report_injection(
        &self,
        timestamp: u64,
        flow: &FlowKey,
        new_payload: &[u8],
        overlap_bytes: &[u8],
        start_seq: u32,
        end_seq: u32,
        payload_start_offset: usize,
        payload_end_offset: usize,
    ) {
        println!(
            "[{timestamp}] INJECTION on {flow}: seq [{start_seq},{end_seq}] offsets [{payload_start_offset},{payload_end_offset}) new={} prior={}",
            to_hex(new_payload),
            to_hex(overlap_bytes),
        );
    }

    fn close(&self) {}
}

/// Appends raw packet bytes to a file, one length-prefixed record per
/// packet, for post-hoc analysis.
pub struct FileConnectionPacketLogger {
    writer: BufWriter<File>,
}

impl FileConnectionPacketLogger {
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(FileConnectionPacketLogger {
            writer: BufWriter::new(file),
        })
    }
}

impl ConnectionPacketLogger for FileConnectionPacketLogger {
    fn write_packet(&mut self, raw_bytes: &[u8], flow: &FlowKey) {
        let header = format!("{flow} {}\n", raw_bytes.len());
        if let Err(e) = self
            .writer
            .write_all(header.as_bytes())
            .and_then(|_| self.writer.write_all(raw_bytes))
        {
            log::warn!("failed to archive packet for {flow}: {e}");
        }
    }

    fn close(&mut self) {
        if let Err(e) = self.writer.flush() {
            log::error!("failed to flush packet log: {e}");
        }
    }
}
