use anyhow::Result;
use log::{error, info, warn};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc::Sender,
};
use std::{
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use super::dispatch::DispatchMsg;
use crate::error::TrackError;
use crate::input::{DeviceInfo, IrReader};
use crate::provider::PointerProvider;

const IDLE_SLEEP: Duration = Duration::from_millis(4);

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// One remote: a reader thread feeding its provider.
pub struct DeviceWorker {
    pub info: DeviceInfo,
    pub provider: Arc<PointerProvider>,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl DeviceWorker {
    pub fn spawn(info: DeviceInfo, provider: Arc<PointerProvider>, tx: Sender<DispatchMsg>) -> Result<Self> {
        let reader = IrReader::open(&info)?;
        provider.start()?;
        let stop = Arc::new(AtomicBool::new(false));

        let stop_flag = stop.clone();
        let prov = provider.clone();
        let device = info.ir_path.clone();
        let handle = thread::Builder::new()
            .name(format!("ir-{}", provider.name()))
            .spawn(move || {
                if let Err(e) = run_device(reader, &prov, &device, &stop_flag, &tx) {
                    error!("{device}: worker stopped: {e}");
                }
                if let Err(e) = prov.stop() {
                    warn!("{device}: provider stop failed: {e}");
                }
            })?;

        info!("{}: worker started", info.ir_path);
        Ok(Self {
            info,
            provider,
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread, wait for the in-flight report to drain, then
    /// reset the provider.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            if h.join().is_err() {
                error!("{}: worker panicked", self.info.ir_path);
            }
        }
        info!("{}: worker stopped", self.info.ir_path);
    }
}

fn run_device(
    mut reader: IrReader,
    provider: &PointerProvider,
    device: &str,
    stop: &AtomicBool,
    tx: &Sender<DispatchMsg>,
) -> Result<()> {
    while !stop.load(Ordering::SeqCst) {
        let states = reader.poll()?;
        if states.is_empty() {
            thread::sleep(IDLE_SLEEP);
            continue;
        }
        for state in states {
            let frame = match provider.handle_state(&state, now_ms()) {
                Ok(frame) => frame,
                // profile swap or shutdown in progress
                Err(TrackError::NotRunning) => continue,
                Err(e) => return Err(e.into()),
            };
            let msg = DispatchMsg {
                device: device.to_string(),
                frame,
            };
            if tx.send(msg).is_err() {
                warn!("{device}: dispatcher gone; stopping");
                return Ok(());
            }
        }
    }
    Ok(())
}
