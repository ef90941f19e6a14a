use anyhow::{Context, Result};
use chrono::{Duration, Utc};

use super::{explain_auth, open_cache, print_json, resolve_range};
use crate::cli::config::Config;
use crate::cli::QueryArgs;

pub async fn execute_query(config: &Config, args: QueryArgs) -> Result<()> {
    let (start, end) = match args.start.as_deref() {
        Some(start) => resolve_range(start, args.end.as_deref())?,
        None => {
            let end = Utc::now();
            let span = Duration::try_hours(args.hours.max(0)).context("--hours is out of range")?;
            (end - span, end)
        }
    };

    let mut cache = open_cache(config)?;
    let credentials = config.credentials(args.auth.password);
    let records = cache
        .query(start, end, &credentials)
        .await
        .map_err(|e| explain_auth(config, e))?;

    print_json(&records)
}

pub async fn execute_clear_cache(config: &Config) -> Result<()> {
    let cache = open_cache(config)?;
    cache.clear().await.context("Failed to clear cache")?;
    eprintln!(
        "Cleared cache in {}",
        cache.storage().dir().display()
    );
    Ok(())
}
