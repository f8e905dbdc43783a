//! Provide tracing, tailored to this program.
//!
//! Binaries call [`init_stdout`] once at startup to install a subscriber. The
//! rest of the crate uses `crate::tracing::prelude::*` for the `trace!()`,
//! `debug!()`, `info!()`, `warn!()` and `error!()` macros.

use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    prelude::*,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

/// Log to stdout, filtering according to environment variable RUST_LOG,
/// overriding the default level (ERROR) to INFO.
///
/// Samples are logged at INFO under the `ADC` target, so `RUST_LOG=ADC=off`
/// silences them while keeping everything else.
pub fn init_stdout() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
