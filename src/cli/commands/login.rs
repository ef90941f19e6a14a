use anyhow::Result;
use serde_json::json;

use super::{build_client, explain_auth, print_json};
use crate::cli::config::Config;
use crate::cli::AuthArgs;

pub async fn execute_login(config: &Config, args: AuthArgs) -> Result<()> {
    let mut client = build_client(config)?;
    let session = client
        .login(&config.identity, &args.password)
        .await
        .map_err(|e| explain_auth(config, e))?;

    eprintln!("Logged in as {} ({})", config.identity, client.region());
    print_json(&json!({
        "identity": config.identity,
        "region": client.region(),
        "owner_id": session.owner_id,
    }))
}

pub async fn execute_devices(config: &Config, args: AuthArgs) -> Result<()> {
    let mut client = build_client(config)?;
    client
        .login(&config.identity, &args.password)
        .await
        .map_err(|e| explain_auth(config, e))?;

    let devices = client.fetch_device_metadata().await?;
    if devices.is_empty() {
        eprintln!("No devices have uploaded reports for this account");
    }
    print_json(&devices)
}
