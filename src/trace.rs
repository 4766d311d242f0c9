//! Tracing initialization (spec.md §7, "Logging"). Honors two environment
//! variables the original tool reads directly: `OLR_LOG_TIMEZONE` selects the
//! zone timestamps are rendered in, and `OLR_LOCALES=MOCK` strips timestamps
//! entirely so captured output is reproducible in tests.

use std::env;
use std::fmt;

use chrono::Utc;
use chrono_tz::Tz;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

/// A `FormatTime` that renders the current instant in a configured zone
/// instead of `tracing-subscriber`'s default local-time guess, which on most
/// containers is UTC regardless of where the source database actually runs.
struct ZonedTime {
    zone: Tz,
}

impl FormatTime for ZonedTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let now = Utc::now().with_timezone(&self.zone);
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

fn configured_zone() -> Option<Tz> {
    let raw = env::var("OLR_LOG_TIMEZONE").ok()?;
    raw.parse::<Tz>().ok()
}

fn mock_locales() -> bool {
    env::var("OLR_LOCALES").map(|v| v == "MOCK").unwrap_or(false)
}

/// Installs the global tracing subscriber. Call once, as early as possible
/// in `main`.
pub fn init() {
    let filter = EnvFilter::try_from_env("OLR_LOG").unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if mock_locales() {
        builder.without_time().init();
        return;
    }

    match configured_zone() {
        Some(zone) => builder.with_timer(ZonedTime { zone }).init(),
        None => builder.init(),
    }
}
