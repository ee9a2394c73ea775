//! Config show/validate command.

use std::path::Path;

use anyhow::Result;
use gamecheck_core::Config;

use crate::ui;

/// Config actions.
#[derive(Debug, Clone, Copy)]
pub enum ConfigAction {
    /// Print the effective configuration.
    Show,
    /// Check the configuration file.
    Validate,
}

/// Run the config command.
pub fn run_config(action: ConfigAction, config_path: &Path) -> Result<()> {
    match action {
        ConfigAction::Show => show_config(config_path),
        ConfigAction::Validate => validate_config(config_path),
    }
}

/// Show the effective configuration, defaults filled in.
fn show_config(config_path: &Path) -> Result<()> {
    let mut config = if config_path.exists() {
        Config::load(config_path)?
    } else {
        ui::warning(&format!(
            "Config file not found: {}, showing defaults",
            config_path.display()
        ));
        Config::default().with_env_overrides()
    };

    if config.auth.jwt_secret.is_some() {
        config.auth.jwt_secret = Some("<redacted>".to_string());
    }

    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Validate the configuration.
fn validate_config(config_path: &Path) -> Result<()> {
    ui::header("Validating Configuration");

    if !config_path.exists() {
        ui::error(&format!("Config file not found: {}", config_path.display()));
        return Ok(());
    }

    let content = std::fs::read_to_string(config_path)?;

    match json5::from_str::<serde_json::Value>(&content) {
        Ok(_) => {
            ui::success("Syntax: Valid JSON5");

            match Config::load(config_path) {
                Ok(config) => {
                    ui::success("Schema: Configuration is valid");
                    let classes: Vec<&str> = config
                        .rate_limits
                        .classes
                        .iter()
                        .map(|(name, _)| name)
                        .collect();
                    ui::kv("Rate classes", &classes.join(", "));
                    ui::kv(
                        "Missing limiter policy",
                        &format!("{:?}", config.rate_limits.missing_policy),
                    );
                }
                Err(e) => {
                    ui::error(&format!("Schema error: {e}"));
                }
            }
        }
        Err(e) => {
            ui::error(&format!("Syntax error: {e}"));
        }
    }

    Ok(())
}
