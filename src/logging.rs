use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Once;

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

static SETUP: Once = Once::new();

pub const WINAUTH_LOG_PATH_ENV: &str = "WINAUTH_LOG_PATH";
pub const WINAUTH_LOG_LEVEL_ENV: &str = "WINAUTH_LOG_LEVEL";

/// Sends `tracing` output to the file named by `WINAUTH_LOG_PATH`, filtered by `WINAUTH_LOG_LEVEL`.
///
/// Does nothing when the variable is unset or the file can not be opened. Safe to call more
/// than once; only the first call has an effect. Applications that install their own subscriber
/// should not call this.
pub fn setup_logger() {
    SETUP.call_once(|| {
        let Ok(path) = std::env::var(WINAUTH_LOG_PATH_ENV) else {
            return;
        };
        let path = PathBuf::from(path);

        let file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("[winauth] couldn't open log file {}: {e}", path.display());
                return;
            }
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_thread_names(true)
            .with_ansi(false)
            .with_writer(file);

        let result = tracing_subscriber::registry()
            .with(fmt_layer)
            .with(EnvFilter::from_env(WINAUTH_LOG_LEVEL_ENV))
            .try_init();

        if let Err(e) = result {
            eprintln!("[winauth] a global tracing subscriber is already installed: {e}");
        }
    })
}
