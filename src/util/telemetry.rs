//! Telemetry helpers for structured logging and tracing.

/// Initialize tracing for the agent process.
///
/// Does nothing when a global subscriber is already installed, so embedding
/// applications keep control. Otherwise a `.env` file (if any) is loaded first
/// so `RUST_LOG` can be set there, then an env-filtered fmt subscriber is
/// installed.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = dotenvy::dotenv();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}
