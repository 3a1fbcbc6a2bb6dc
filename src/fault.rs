//! Process-wide fault capture
//!
//! Installs a global panic hook that writes a structured log record
//! before delegating to whatever hook was installed before it. Crash
//! persistence and formatting belong to the embedding application; this
//! only guarantees the record reaches the log pipeline.

use log::error;
use std::panic;
use std::sync::Once;

static INSTALL: Once = Once::new();

/// Install the panic logger. Safe to call more than once; only the first
/// call installs the hook.
pub fn install_panic_logger() {
    INSTALL.call_once(|| {
        let previous = panic::take_hook();

        panic::set_hook(Box::new(move |info| {
            let thread = std::thread::current();
            let location = info
                .location()
                .map(|l| l.to_string())
                .unwrap_or_else(|| "unknown location".to_string());
            let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = info.payload().downcast_ref::<String>() {
                s.clone()
            } else {
                "non-string panic payload".to_string()
            };

            error!(
                "Panic on thread '{}' at {}: {}",
                thread.name().unwrap_or("<unnamed>"),
                location,
                payload
            );

            previous(info);
        }));
    });
}
