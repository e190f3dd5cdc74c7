//! Log setup for the `apkover` binary.
//!
//! Stdout is reserved for the coverage report, so that `-o json` or
//! `-o yaml` output can be piped straight into other tools. Every log line,
//! including the relayed Melange output, goes to stderr.

use std::io;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// `level` is the verbosity when `RUST_LOG` is unset; at `debug` the
/// Melange build and test output is shown as well. With `json` every line
/// is a JSON object, for CI log collectors. A subscriber installed earlier
/// is left in place.
pub fn init_tracing(json: bool, level: Level) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let text_layer = (!json).then(|| fmt::layer().with_writer(io::stderr).with_target(false));
    let json_layer = json.then(|| {
        fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
            .json()
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .try_init();
}
