use anyhow::{Result, anyhow};
use pico_args::Arguments;
use std::{
    env,
    fs::File,
    io::{self, BufReader},
    process::Command,
};

use crate::config;
use crate::input;
use crate::ipc::{self, dispatch::JsonLinesSink};
use crate::replay;

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // Hidden daemon mode (spawned by `start`)
    if pargs.contains("--daemon") {
        return ipc::run_daemon();
    }

    // No args -> general help
    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    // First free arg is the subcommand
    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            if let Some(t) = topic {
                print_subcmd_help(&t);
            } else {
                print_help();
            }
            Ok(())
        }

        Some("start") => {
            let exe = env::current_exe()?;
            let child = Command::new(exe).arg("--daemon").spawn()?;
            println!("blobtouch: started daemon (pid={})", child.id());
            Ok(())
        }

        Some("stop") => request(serde_json::json!({"op":"shutdown"})),
        Some("status") => request(serde_json::json!({"op":"status"})),
        Some("reload") => request(serde_json::json!({"op":"reload"})),
        Some("list") => request(serde_json::json!({"op":"list"})),
        Some("doctor") => request(serde_json::json!({"op":"doctor"})),

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: blobtouch use <profile_name>"))?;
            request(serde_json::json!({"op":"use","profile":name}))
        }

        Some("devices") => {
            let devices = input::discover_remotes();
            if devices.is_empty() {
                println!("no Wii Remote IR devices found (is hid-wiimote loaded and the remote paired?)");
            }
            for d in devices {
                println!(
                    "{}\n  ir:      {}\n  buttons: {}\n  phys:    {}",
                    d.name,
                    d.ir_path,
                    d.buttons_path.as_deref().unwrap_or("-"),
                    d.phys.as_deref().unwrap_or("-"),
                );
            }
            Ok(())
        }

        Some("replay") => {
            let profile_name: Option<String> = pargs.opt_value_from_str("--profile")?;
            let calibrate = pargs.contains("--calibrate");
            let all = pargs.contains("--all");
            let path: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: blobtouch replay <trace.jsonl> [--profile <name>] [--calibrate] [--all]"))?;

            let profile = match profile_name {
                Some(name) => config::load_profile(&config::config_dir()?.join("profiles"), &name)?,
                None => config::embedded_default()?,
            };
            let file = File::open(&path).map_err(|e| anyhow!("failed to open {path}: {e}"))?;
            let records = replay::parse_trace(BufReader::new(file))?;

            let mut sink = JsonLinesSink::new(io::stdout().lock()).with_empty_frames(all);
            let summary = replay::replay(&profile, &records, &mut sink, calibrate)?;
            eprintln!(
                "blobtouch: replayed {} reports, {} contacts",
                summary.reports, summary.contacts
            );
            if let Some(source) = summary.calibration {
                eprintln!("\n{}", replay::calibration_toml(&source));
            }
            Ok(())
        }

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

fn request(req: serde_json::Value) -> Result<()> {
    let r = ipc::client_request(req)?;
    print_response(&r);
    Ok(())
}

fn print_help() {
    println!(
        r#"blobtouch — Wii Remote IR blob tracker

USAGE:
  blobtouch help [command]                 Show general or command-specific help
  blobtouch start                          Start the daemon
  blobtouch stop                           Stop the daemon
  blobtouch status                         Show profile, devices and tracker counts
  blobtouch reload                         Reload active profile
  blobtouch use <name>                     Switch active profile
  blobtouch list                           List profiles
  blobtouch doctor                         Diagnose permissions/devices
  blobtouch devices                        List detected Wii Remote IR devices
  blobtouch replay <trace.jsonl>           Run a recorded IR trace, print frames as JSON

TIPS:
  - Profiles: ~/.config/blobtouch/profiles (edits to the active one reload live)
  - Active profile pointer: ~/.config/blobtouch/active
  - Log level: BLOBTOUCH_LOG=debug
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "start" => println!("usage: blobtouch start\nStarts the background daemon."),
        "stop" => println!("usage: blobtouch stop\nStops the daemon; trackers are reset."),
        "status" => println!(
            "usage: blobtouch status\nShows active profile, socket, and per-device worker state, live trackers and frame counts."
        ),
        "reload" => println!(
            "usage: blobtouch reload\nReloads the current profile; keeps last good on error."
        ),
        "use" => {
            println!("usage: blobtouch use <name>\nSwitches active profile to <name> and reloads.")
        }
        "list" => println!("usage: blobtouch list\nLists available profiles."),
        "doctor" => println!(
            "usage: blobtouch doctor\nChecks permissions and lists detected IR devices."
        ),
        "devices" => println!(
            "usage: blobtouch devices\nScans /dev/input for Wii Remote IR cameras and their button devices."
        ),
        "replay" => println!(
            "usage: blobtouch replay <trace.jsonl> [--profile <name>] [--calibrate] [--all]\n\
             Feeds a JSON-lines IR trace through the tracker offline.\n\
             --profile    use a profile from the profiles directory instead of the built-in default\n\
             --calibrate  take the first four touches as screen corners and print the calibration\n\
             --all        also print frames without contacts"
        ),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_response(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}
