//! Process hardening: structured logging and a last-resort panic hook.
//!
//! Request handlers run under local `catch_unwind` isolation; the hook here
//! is the safety net that records panics escaping everything else. Logs go
//! to stderr so they never interleave with DAP frames on stdout.

use tracing_subscriber::EnvFilter;

pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter.to_string()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    install_panic_hook();
}

fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!(target: "lunar.dap", "panic: {info}");
        previous(info);
    }));
}
