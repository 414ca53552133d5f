//! Process-wide log setup for the binary.

use thiserror::Error;
use tracing_subscriber::filter::{LevelFilter, ParseError};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    Filter(#[from] ParseError),

    #[error("A global subscriber is already installed: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("A log bridge is already installed: {0}")]
    Bridge(#[from] log::SetLoggerError),
}

/// Builds the level filter. An explicit `level` wins over `RUST_LOG`; with
/// neither, everything at `info` and above passes.
pub fn build_filter(level: Option<&str>) -> Result<EnvFilter, LoggingError> {
    let builder = EnvFilter::builder().with_default_directive(LevelFilter::INFO.into());
    match level {
        Some(level) => Ok(builder.parse(level)?),
        None => Ok(builder.from_env_lossy()),
    }
}

/// Installs the global subscriber and routes `log` records into it.
///
/// Can only succeed once per process.
pub fn init(level: Option<&str>, json: bool) -> Result<(), LoggingError> {
    let filter = build_filter(level)?;
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_current_span(true)))
        .with((!json).then(|| fmt::layer().with_target(false)));

    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_explicit_level_is_parsed() {
        let filter = build_filter(Some("poets=debug,warn")).unwrap();
        assert!(filter.to_string().contains("poets=debug"));
        assert!(build_filter(Some("poets=notalevel")).is_err());
    }

    #[test]
    #[serial]
    fn test_init_only_once() {
        init(Some("info"), false).unwrap();
        log::info!("bridged through tracing");
        assert!(matches!(
            init(Some("info"), true),
            Err(LoggingError::Subscriber(_))
        ));
    }
}
