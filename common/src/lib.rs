use owo_colors::OwoColorize;

pub mod args;
pub mod shutdown;

/// Process-wide bootstrap shared by every binary in the platform: installs
/// a panic hook that never leaves the process half-alive (a panicked
/// reconciler or metrics server should restart the container, not limp
/// along) and prints the startup banner.
pub fn init() {
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));
}

/// Touches the readiness-probe marker file expected by the deployment's
/// liveness/readiness checks. A no-op (not an error) if `READY_FILE` is
/// unset, since not every binary is deployed with a filesystem probe.
pub fn signal_ready() {
    if let Ok(path) = std::env::var("READY_FILE") {
        if let Err(e) = std::fs::write(&path, b"ready") {
            eprintln!(
                "{}",
                format!("failed to write readiness marker {path}: {e}").yellow()
            );
        }
    }
}
