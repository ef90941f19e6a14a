use anyhow::{bail, Result};
use std::path::Path;

use crate::cli::config::{Config, CONFIG_FILENAME};
use crate::cli::InitArgs;

pub fn execute_init(args: InitArgs) -> Result<()> {
    if Path::new(CONFIG_FILENAME).exists() && !args.force {
        bail!(
            "{} already exists. Use --force to overwrite.",
            CONFIG_FILENAME
        );
    }

    let mut config = Config::new(args.identity, args.region);
    config.device_id = args.device_id;
    config.cache_dir = args.cache_dir;

    config.save()?;

    eprintln!("Created {}", CONFIG_FILENAME);
    eprintln!("  identity: {}", config.identity);
    eprintln!("  region: {}", config.region);
    if let Some(ref device) = config.device_id {
        eprintln!("  device_id: {}", device);
    }
    eprintln!();
    eprintln!("Next: PUMPSYNC_PASSWORD=... pumpsync login");

    Ok(())
}
