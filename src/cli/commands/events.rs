use anyhow::Result;
use tracing::info;

use super::{build_client, explain_auth, print_json, resolve_range};
use crate::cli::config::Config;
use crate::cli::EventsArgs;

pub async fn execute_events(config: &Config, args: EventsArgs) -> Result<()> {
    let (start, end) = resolve_range(&args.start, args.end.as_deref())?;

    let mut client = build_client(config)?;
    client
        .login(&config.identity, &args.auth.password)
        .await
        .map_err(|e| explain_auth(config, e))?;

    let device_id = match args.device_id.or_else(|| config.device_id.clone()) {
        Some(id) => id,
        None => client.latest_device().await?.device_id,
    };

    let records = client.fetch_raw_telemetry(&device_id, start, end).await?;
    info!(device_id = %device_id, records = records.len(), "events fetched");
    print_json(&records)
}
