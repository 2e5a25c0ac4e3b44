use anyhow::{Result, anyhow};
use log::{error, info, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{
    io::{self, BufRead, BufReader, Write},
    os::unix::net::{UnixListener, UnixStream},
    path::{Path, PathBuf},
    sync::{
        Arc,
        mpsc::{self, Receiver, Sender},
    },
    thread,
    time::{Duration, Instant},
};

use super::dispatch::{DispatchMsg, LogSink, run_dispatcher};
use super::pipeline::DeviceWorker;
use super::runtime::socket_path;
use crate::config::{DaemonConfigState, Profile};
use crate::input::{self, DeviceInfo};
use crate::provider::PointerProvider;

const RELOAD_DEBOUNCE: Duration = Duration::from_millis(250);
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

type Reply = Sender<std::result::Result<String, String>>;

enum IpcMsg {
    Reload(Reply),
    UseProfile(String, Reply),
    ProfileChanged(Vec<PathBuf>),
    Shutdown,
}

pub fn run_daemon() -> Result<()> {
    // socket
    let sock = socket_path()?;
    if sock.exists() {
        let _ = std::fs::remove_file(&sock);
    }
    let listener = UnixListener::bind(&sock)?;
    info!("daemon: listening on {}", sock.display());

    // state
    let mut cfg = DaemonConfigState::load_or_install_default()?;
    info!("daemon: active profile '{}'", cfg.active_name);

    // channels
    let (tx_req, rx_req) = mpsc::channel::<IpcMsg>();
    let (tx_frames, rx_frames) = mpsc::channel::<DispatchMsg>();

    let dispatcher = thread::Builder::new()
        .name("dispatch".into())
        .spawn(move || run_dispatcher(rx_frames, vec![Box::new(LogSink)]))?;
    let workers = start_workers(&cfg.profile, &tx_frames);
    drop(tx_frames);

    let _watcher = match watch_profiles(&cfg.profiles_dir, tx_req.clone()) {
        Ok(w) => Some(w),
        Err(e) => {
            warn!("profile watching disabled: {e}");
            None
        }
    };
    watch_signals(tx_req.clone())?;

    serve(&listener, &mut cfg, &workers, &tx_req, &rx_req)?;

    info!("daemon: shutting down");
    for w in workers {
        w.shutdown();
    }
    if dispatcher.join().is_err() {
        error!("dispatcher panicked");
    }
    let _ = std::fs::remove_file(&sock);
    Ok(())
}

fn serve(
    listener: &UnixListener,
    cfg: &mut DaemonConfigState,
    workers: &[DeviceWorker],
    tx_req: &Sender<IpcMsg>,
    rx_req: &Receiver<IpcMsg>,
) -> Result<()> {
    listener.set_nonblocking(true)?;
    let mut pending_reload: Option<Instant> = None;
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                let view = DaemonView::capture(cfg, workers);
                let tx = tx_req.clone();
                thread::spawn(move || {
                    if let Err(e) = handle_client(stream, view, tx) {
                        error!("ipc client error: {e}");
                    }
                });
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => warn!("accept failed: {e}"),
        }

        while let Ok(msg) = rx_req.try_recv() {
            match msg {
                IpcMsg::Reload(reply) => {
                    let r = cfg
                        .reload()
                        .and_then(|_| apply_to_workers(&cfg.profile, workers))
                        .map(|_| cfg.active_name.clone())
                        .map_err(|e| e.to_string());
                    match &r {
                        Ok(_) => info!("profile reloaded"),
                        Err(e) => error!("reload failed: {e}"),
                    }
                    let _ = reply.send(r);
                }
                IpcMsg::UseProfile(name, reply) => {
                    let r = cfg
                        .set_active(&name)
                        .and_then(|_| apply_to_workers(&cfg.profile, workers))
                        .map(|_| cfg.active_name.clone())
                        .map_err(|e| e.to_string());
                    match &r {
                        Ok(n) => info!("switched active profile to {n}"),
                        Err(e) => error!("use profile failed: {e}"),
                    }
                    let _ = reply.send(r);
                }
                IpcMsg::ProfileChanged(paths) => {
                    if paths.iter().any(|p| is_profile_file(p, &cfg.active_name)) {
                        pending_reload = Some(Instant::now());
                    }
                }
                IpcMsg::Shutdown => return Ok(()),
            }
        }

        // editors write in bursts; reload once things settle
        if pending_reload.is_some_and(|t| t.elapsed() >= RELOAD_DEBOUNCE) {
            pending_reload = None;
            match cfg.reload().and_then(|_| apply_to_workers(&cfg.profile, workers)) {
                Ok(()) => info!("profile '{}' changed on disk; reloaded", cfg.active_name),
                Err(e) => error!("live reload failed, keeping last good profile: {e}"),
            }
        }

        thread::sleep(Duration::from_millis(5));
    }
}

fn is_profile_file(path: &Path, active: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n == format!("{active}.toml"))
}

/// Each remote gets its own contact ID window, counted from the profile's
/// `remote_index`.
fn profile_for(profile: &Profile, index: usize) -> Profile {
    let mut p = profile.clone();
    p.touch.remote_index += index as u64;
    p
}

fn start_workers(profile: &Profile, tx: &Sender<DispatchMsg>) -> Vec<DeviceWorker> {
    let devices = input::discover_remotes();
    if devices.is_empty() {
        warn!("no Wii Remote IR devices detected; pipeline idle");
    }
    let mut workers = vec![];
    for (i, info) in devices.into_iter().enumerate() {
        let provider = match PointerProvider::new(format!("remote{}", i + 1), &profile_for(profile, i)) {
            Ok(p) => Arc::new(p),
            Err(e) => {
                error!("{}: cannot build provider: {e}", info.ir_path);
                continue;
            }
        };
        if info.buttons_path.is_none() {
            warn!("{}: no button device paired; pointer touches unavailable", info.ir_path);
        }
        let path = info.ir_path.clone();
        match DeviceWorker::spawn(info, provider, tx.clone()) {
            Ok(w) => workers.push(w),
            Err(e) => warn!("failed to start {path}: {e}"),
        }
    }
    workers
}

fn apply_to_workers(profile: &Profile, workers: &[DeviceWorker]) -> Result<()> {
    for (i, w) in workers.iter().enumerate() {
        w.provider.apply_profile(&profile_for(profile, i))?;
    }
    Ok(())
}

fn watch_profiles(dir: &Path, tx: Sender<IpcMsg>) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(ev) => {
            if matches!(ev.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                let _ = tx.send(IpcMsg::ProfileChanged(ev.paths));
            }
        }
        Err(e) => warn!("profile watch error: {e}"),
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    info!("watching {} for profile changes", dir.display());
    Ok(watcher)
}

fn watch_signals(tx: Sender<IpcMsg>) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::Builder::new().name("signals".into()).spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!("received signal {sig}");
            let _ = tx.send(IpcMsg::Shutdown);
        }
    })?;
    Ok(())
}

struct DeviceView {
    info: DeviceInfo,
    provider: Arc<PointerProvider>,
    worker_alive: bool,
}

/// What a client connection may look at, captured at accept time.
struct DaemonView {
    cfg: DaemonConfigState,
    devices: Vec<DeviceView>,
}

impl DaemonView {
    fn capture(cfg: &DaemonConfigState, workers: &[DeviceWorker]) -> Self {
        Self {
            cfg: cfg.clone(),
            devices: workers
                .iter()
                .map(|w| DeviceView {
                    info: w.info.clone(),
                    provider: w.provider.clone(),
                    worker_alive: w.is_alive(),
                })
                .collect(),
        }
    }

    fn status(&self) -> Result<serde_json::Value> {
        let mut devices = vec![];
        for d in &self.devices {
            let stats = d.provider.stats()?;
            devices.push(serde_json::json!({
                "name": d.info.name,
                "provider": d.provider.name(),
                "ir_path": d.info.ir_path,
                "buttons_path": d.info.buttons_path,
                "worker_alive": d.worker_alive,
                "running": stats.running,
                "calibrating": stats.calibrating,
                "smooth_size": stats.smooth_size,
                "duplicate_distance": stats.duplicate_distance,
                "live_trackers": stats.live_trackers,
                "trackers": stats.trackers,
                "frames": stats.frames,
            }));
        }
        Ok(serde_json::json!({
            "active_profile": self.cfg.active_name,
            "mode": self.cfg.profile.tracking.mode,
            "socket": socket_path()?,
            "devices": devices,
        }))
    }
}

fn await_reply(rx: Receiver<std::result::Result<String, String>>) -> serde_json::Value {
    match rx.recv_timeout(REPLY_TIMEOUT) {
        Ok(Ok(name)) => serde_json::json!({"ok": true, "data": {"active_profile": name}}),
        Ok(Err(e)) => serde_json::json!({"ok": false, "error": e}),
        Err(_) => serde_json::json!({"ok": false, "error": "daemon did not answer in time"}),
    }
}

fn handle_client(mut stream: UnixStream, st: DaemonView, tx_req: Sender<IpcMsg>) -> Result<()> {
    stream.set_nonblocking(false)?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }
    let req: serde_json::Value = serde_json::from_str(&line)?;
    let op = req.get("op").and_then(|v| v.as_str()).unwrap_or("");

    let resp = match op {
        "status" => match st.status() {
            Ok(data) => serde_json::json!({"ok": true, "data": data}),
            Err(e) => serde_json::json!({"ok": false, "error": e.to_string()}),
        },
        "reload" => {
            let (tx, rx) = mpsc::channel();
            tx_req
                .send(IpcMsg::Reload(tx))
                .map_err(|_| anyhow!("daemon loop is gone"))?;
            await_reply(rx)
        }
        "use" => {
            let name = req.get("profile").and_then(|v| v.as_str()).unwrap_or("");
            let (tx, rx) = mpsc::channel();
            tx_req
                .send(IpcMsg::UseProfile(name.to_string(), tx))
                .map_err(|_| anyhow!("daemon loop is gone"))?;
            await_reply(rx)
        }
        "list" => {
            let list = st.cfg.list_profiles();
            serde_json::json!({"ok": true, "data": {"profiles": list, "active": st.cfg.active_name}})
        }
        "doctor" => {
            let report = st.cfg.doctor_report();
            serde_json::json!({"ok": true, "data": report})
        }
        "shutdown" => {
            let _ = tx_req.send(IpcMsg::Shutdown);
            serde_json::json!({"ok": true, "data": "shutting down"})
        }
        _ => serde_json::json!({"ok": false, "error": format!("unknown op: {op}")}),
    };

    writeln!(stream, "{resp}")?;
    Ok(())
}
