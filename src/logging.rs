use env_logger::{Builder, Env};

/// Install the global logger. `BLOBTOUCH_LOG` takes precedence over
/// `RUST_LOG`; without either, `info` and above are printed.
pub fn init() {
    let fallback = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env = Env::new().filter_or("BLOBTOUCH_LOG", fallback);
    let _ = Builder::from_env(env).format_timestamp_millis().try_init();
}
