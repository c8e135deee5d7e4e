// Plain-text log sink handed to backend factories in tests.
use tracing::Dispatch;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// DEBUG-level, non-colourised logging to stderr.
///
/// `RUST_LOG` overrides the level when set.
#[must_use]
pub fn test_dispatch() -> Dispatch {
    test_dispatch_with_level("debug")
}

#[must_use]
pub fn test_dispatch_with_level(level: &str) -> Dispatch {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(std::io::stderr),
    );
    Dispatch::new(subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_installs_subscriber() {
        let dispatch = test_dispatch_with_level("debug");
        tracing::dispatcher::with_default(&dispatch, || {
            assert!(tracing::enabled!(tracing::Level::ERROR));
            tracing::error!("visible in test output");
        });
    }
}
