use anyhow::Result;
use log::{debug, error, info, trace};
use serde::Serialize;
use std::io::Write;
use std::sync::mpsc::Receiver;

use crate::contact::{Contact, Frame};

/// A finished frame on its way from a device worker to the sinks.
pub struct DispatchMsg {
    pub device: String,
    pub frame: Frame,
}

/// Consumer of contact frames. Sinks run on the dispatcher thread.
pub trait ContactSink {
    fn name(&self) -> &str;
    fn deliver(&mut self, device: &str, frame: &Frame) -> Result<()>;
}

/// Writes every contact to the log.
pub struct LogSink;

impl ContactSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn deliver(&mut self, device: &str, frame: &Frame) -> Result<()> {
        if frame.is_empty() {
            trace!("[{device}] empty frame at {}", frame.timestamp_ms);
            return Ok(());
        }
        for c in &frame.contacts {
            debug!(
                "[{device}] contact {} {:?} at ({:.0}, {:.0})",
                c.id, c.kind, c.position.x, c.position.y
            );
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct FrameLine<'a> {
    device: &'a str,
    timestamp_ms: u128,
    contacts: &'a [Contact],
}

/// One JSON object per frame, newline separated.
pub struct JsonLinesSink<W: Write> {
    out: W,
    skip_empty: bool,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            skip_empty: true,
        }
    }

    pub fn with_empty_frames(mut self, keep: bool) -> Self {
        self.skip_empty = !keep;
        self
    }
}

impl<W: Write> ContactSink for JsonLinesSink<W> {
    fn name(&self) -> &str {
        "json-lines"
    }

    fn deliver(&mut self, device: &str, frame: &Frame) -> Result<()> {
        if self.skip_empty && frame.is_empty() {
            return Ok(());
        }
        let line = FrameLine {
            device,
            timestamp_ms: frame.timestamp_ms,
            contacts: &frame.contacts,
        };
        serde_json::to_writer(&mut self.out, &line)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

/// Fan each frame out to every sink, in arrival order. A failing sink is
/// logged and skipped for that frame only. Returns when all senders are gone.
pub fn run_dispatcher(rx: Receiver<DispatchMsg>, mut sinks: Vec<Box<dyn ContactSink + Send>>) {
    info!(
        "dispatcher: {} sink(s): {}",
        sinks.len(),
        sinks.iter().map(|s| s.name()).collect::<Vec<_>>().join(", ")
    );
    for msg in rx {
        for sink in sinks.iter_mut() {
            if let Err(e) = sink.deliver(&msg.device, &msg.frame) {
                error!("sink {} failed: {e}", sink.name());
            }
        }
    }
    info!("dispatcher: stopped");
}
