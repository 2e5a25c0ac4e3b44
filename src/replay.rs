//! Offline replay of recorded IR traces through a provider.
//!
//! A trace is JSON lines, one report per line:
//!
//! ```text
//! {"t": 0, "blobs": [{"x": 512, "y": 384}], "buttons": {"a": true}}
//! ```
//!
//! `t` (milliseconds) is optional; without it reports are spaced 10 ms apart.
//! Blank lines and lines starting with `#` are ignored.

use anyhow::{Result, anyhow};
use log::{info, warn};
use serde::Deserialize;
use std::io::BufRead;

use crate::calibration::{Calibrate, CalibrationRectangle, CalibrationSession};
use crate::config::Profile;
use crate::input::{Buttons, IrBlob, IrState};
use crate::ipc::dispatch::ContactSink;
use crate::provider::PointerProvider;

const NOMINAL_PERIOD_MS: u64 = 10;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct TraceLine {
    t: Option<u64>,
    buttons: Buttons,
    blobs: Vec<IrBlob>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceRecord {
    pub timestamp_ms: u64,
    pub state: IrState,
}

pub fn parse_trace<R: BufRead>(reader: R) -> Result<Vec<TraceRecord>> {
    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let parsed: TraceLine = serde_json::from_str(trimmed)
            .map_err(|e| anyhow!("trace line {}: {e}", idx + 1))?;
        let timestamp_ms = parsed
            .t
            .unwrap_or(out.len() as u64 * NOMINAL_PERIOD_MS);
        out.push(TraceRecord {
            timestamp_ms,
            state: IrState {
                buttons: parsed.buttons,
                blobs: parsed.blobs,
            },
        });
    }
    Ok(out)
}

#[derive(Debug, Clone, Default)]
pub struct ReplaySummary {
    pub reports: usize,
    pub contacts: usize,
    /// Camera-space corners captured in calibration mode.
    pub calibration: Option<CalibrationRectangle>,
}

/// Drive `records` through a fresh provider built from `profile`, handing
/// every frame to `sink`. With `calibrate`, the first four touches are taken
/// as the screen corners and the resulting warp is installed for the rest
/// of the trace.
pub fn replay(
    profile: &Profile,
    records: &[TraceRecord],
    sink: &mut dyn ContactSink,
    calibrate: bool,
) -> Result<ReplaySummary> {
    let provider = PointerProvider::new("replay", profile)?;
    provider.start()?;
    let mut session = if calibrate {
        provider.begin_calibration()?;
        Some(CalibrationSession::new())
    } else {
        None
    };

    let mut summary = ReplaySummary::default();
    for rec in records {
        let frame = provider.handle_state(&rec.state, u128::from(rec.timestamp_ms))?;
        summary.reports += 1;
        summary.contacts += frame.contacts.len();

        if let Some(s) = session.as_mut() {
            if let Some(source) = s.record(&frame) {
                let screen = profile.screen_size();
                provider.set_calibration_data(source, CalibrationRectangle::from_size(screen), screen)?;
                info!("replay: calibration captured at report {}", summary.reports);
                summary.calibration = Some(source);
                session = None;
            }
        }

        if let Err(e) = sink.deliver(provider.name(), &frame) {
            warn!("replay: sink {} failed: {e}", sink.name());
        }
    }

    if let Some(s) = session {
        warn!("replay: trace ended with {} of 4 calibration corners", s.captured());
    }
    provider.stop()?;
    Ok(summary)
}

/// Profile snippet for a captured source rectangle.
pub fn calibration_toml(source: &CalibrationRectangle) -> String {
    let c = |v: crate::geometry::Vec2| format!("[{:.1}, {:.1}]", v.x, v.y);
    format!(
        "[calibration]\nsource = [{}, {}, {}, {}]\n",
        c(source.top_left),
        c(source.top_right),
        c(source.bottom_left),
        c(source.bottom_right)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::dispatch::JsonLinesSink;
    use crate::geometry::Vec2;

    const TRACE: &str = r#"
# one blob held for three reports, then gone
{"t": 100, "blobs": [{"x": 512, "y": 384}]}
{"blobs": [{"x": 512, "y": 384}]}

{"blobs": [{"x": 512, "y": 384}], "buttons": {"a": true}}
{}
"#;

    #[test]
    fn trace_parses_with_defaults() {
        let recs = parse_trace(TRACE.as_bytes()).unwrap();
        assert_eq!(recs.len(), 4);
        assert_eq!(recs[0].timestamp_ms, 100);
        assert_eq!(recs[1].timestamp_ms, 10);
        assert!(recs[2].state.buttons.a);
        assert!(recs[3].state.blobs.is_empty());
    }

    #[test]
    fn bad_line_reports_its_number() {
        let err = parse_trace("{}\n{\"blobs\": 3}\n".as_bytes()).unwrap_err();
        assert!(err.to_string().starts_with("trace line 2"));
    }

    #[test]
    fn replay_emits_start_move_end() {
        let recs = parse_trace(TRACE.as_bytes()).unwrap();
        let mut out = Vec::new();
        let summary = replay(&Profile::default(), &recs, &mut JsonLinesSink::new(&mut out), false).unwrap();
        assert_eq!(summary.reports, 4);
        assert_eq!(summary.contacts, 3);

        let text = String::from_utf8(out).unwrap();
        let kinds: Vec<String> = text
            .lines()
            .map(|l| {
                let v: serde_json::Value = serde_json::from_str(l).unwrap();
                v["contacts"][0]["kind"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(kinds, vec!["start", "move", "end"]);
    }

    #[test]
    fn replay_calibrates_from_four_touches() {
        let corners = [(100.0, 100.0), (900.0, 100.0), (100.0, 700.0), (900.0, 700.0)];
        let mut lines = String::new();
        for (x, y) in corners {
            // two reports to confirm the touch, one empty to lift it
            for _ in 0..2 {
                lines.push_str(&format!("{{\"blobs\": [{{\"x\": {x}, \"y\": {y}}}]}}\n"));
            }
            lines.push_str("{}\n");
        }
        lines.push_str("{\"blobs\": [{\"x\": 500, \"y\": 400}]}\n");
        lines.push_str("{\"blobs\": [{\"x\": 500, \"y\": 400}]}\n");

        let recs = parse_trace(lines.as_bytes()).unwrap();
        let mut out = Vec::new();
        let summary = replay(&Profile::default(), &recs, &mut JsonLinesSink::new(&mut out), true).unwrap();
        let source = summary.calibration.unwrap();
        assert_eq!(source.top_right, Vec2::new(900.0, 100.0));

        let text = String::from_utf8(out).unwrap();
        let last: serde_json::Value = serde_json::from_str(text.lines().last().unwrap()).unwrap();
        let x = last["contacts"][0]["position"]["x"].as_f64().unwrap();
        let y = last["contacts"][0]["position"]["y"].as_f64().unwrap();
        assert!((x - 960.0).abs() < 1e-6 && (y - 540.0).abs() < 1e-6);

        assert!(calibration_toml(&source).contains("[900.0, 100.0]"));
    }
}
