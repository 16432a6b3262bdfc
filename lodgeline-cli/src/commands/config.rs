use std::fs;

use anyhow::{Result, bail};
use shared::config::server::Config;

/// Writes `config.yaml` or `config.json` with every default filled in.
///
/// # Errors
/// Returns an error if the format is unsupported or writing the file fails.
pub fn generate_config(format: &str) -> Result<()> {
    let config = Config::with_defaults();
    let (file_name, serialized) = match format {
        "yaml" => ("config.yaml", serde_yml::to_string(&config)?),
        "json" => ("config.json", serde_json::to_string_pretty(&config)?),
        other => bail!("unsupported format '{other}', use 'yaml' or 'json'"),
    };

    fs::write(file_name, serialized)?;
    println!("Configuration file '{file_name}' generated successfully.");
    Ok(())
}
