// ABOUTME: Logging setup: a tracing-subscriber fmt layer filtered by QUIETPAGE_LOG.
// ABOUTME: Safe to call more than once; only the first call installs a subscriber.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the log filter, e.g. `quietpage=debug`.
pub const LOG_ENV: &str = "QUIETPAGE_LOG";

/// Installs the global subscriber. `default_directive` applies when
/// `QUIETPAGE_LOG` is unset or unparsable. Returns false if a subscriber was
/// already installed.
pub fn init_logging(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}
