mod calibration;
mod classifier;
mod cli;
mod config;
mod contact;
mod cursor;
mod duotouch;
mod error;
mod filters;
mod geometry;
mod input;
mod ipc;
mod logging;
mod provider;
mod replay;
mod touch;
mod tracker;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
