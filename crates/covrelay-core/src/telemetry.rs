//! Tracing setup for the relay daemon and for tests that want log output.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Environment variable selecting JSON output when set to `json`.
pub const LOG_FORMAT_ENV: &str = "COVRELAY_LOG_FORMAT";

/// Install the global subscriber.
///
/// `RUST_LOG` overrides `level`. JSON output is used when `json` is set or
/// when [`LOG_FORMAT_ENV`] is `json`. Only the first call in a process has an
/// effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let json = json
        || std::env::var(LOG_FORMAT_ENV)
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

    let output = if json {
        fmt::layer().with_target(false).json().boxed()
    } else {
        fmt::layer().with_target(false).boxed()
    };

    tracing_subscriber::registry()
        .with(output.with_filter(filter))
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_twice_does_not_panic() {
        init_tracing(false, Level::DEBUG);
        init_tracing(true, Level::INFO);
    }
}
