//! Logging setup using `tracing` and `tracing-subscriber`.

use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global subscriber: a compact fmt layer behind an
/// [`EnvFilter`].
///
/// `RUST_LOG` overrides `default_directive` when set. Fails if a global
/// subscriber is already installed, which embedding applications that bring
/// their own should treat as expected.
pub fn init(default_directive: &str) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
}

/// [`init`] with the library's standard default of `info`.
pub fn init_default() -> Result<(), TryInitError> {
    init("info")
}
