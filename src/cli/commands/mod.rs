mod events;
mod init;
mod login;
mod query;

pub use events::execute_events;
pub use init::execute_init;
pub use login::{execute_devices, execute_login};
pub use query::{execute_clear_cache, execute_query};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::cache::{FileStorage, RangeCache};
use crate::cli::config::Config;
use crate::error::Error;
use crate::session::TelemetryClient;

/// Parse an RFC 3339 instant or a bare `YYYY-MM-DD` date (midnight UTC).
pub fn parse_instant(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").with_context(|| {
        format!(
            "Invalid time '{}': expected RFC 3339 or YYYY-MM-DD",
            value
        )
    })?;
    Ok(date.and_time(chrono::NaiveTime::MIN).and_utc())
}

/// `start`..`end`, with `end` defaulting to now. Rejects inverted ranges.
pub fn resolve_range(start: &str, end: Option<&str>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = parse_instant(start)?;
    let end = match end {
        Some(end) => parse_instant(end)?,
        None => Utc::now(),
    };
    if start > end {
        bail!("--start ({}) is after --end ({})", start, end);
    }
    Ok((start, end))
}

fn build_client(config: &Config) -> Result<TelemetryClient> {
    TelemetryClient::new(config.client_config()).context("Failed to create HTTP client")
}

fn open_cache(config: &Config) -> Result<RangeCache<TelemetryClient, FileStorage>> {
    let dir = config.resolve_cache_dir()?;
    Ok(RangeCache::new(build_client(config)?, FileStorage::new(dir)))
}

/// Turn an authentication failure into a message naming the identity.
fn explain_auth(config: &Config, err: Error) -> anyhow::Error {
    if err.is_invalid_credentials() {
        anyhow::anyhow!("Invalid credentials for {}", config.identity)
    } else if err.is_auth_failure() {
        anyhow::Error::new(err).context(format!("Could not log in as {}", config.identity))
    } else {
        anyhow::Error::new(err)
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
