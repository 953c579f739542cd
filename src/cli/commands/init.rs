//! Implementation of the `caseflow init` command.

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::adapters::sqlite::initialize_database;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;

#[derive(Debug, serde::Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub message: String,
    pub config_path: PathBuf,
    pub database_initialized: bool,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![self.message.clone()];
        if self.database_initialized {
            lines.push(format!(
                "Database initialized at {}",
                Config::default().database.path
            ));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(force: bool, json_mode: bool) -> Result<()> {
    let caseflow_dir = PathBuf::from(".caseflow");
    let config_path = caseflow_dir.join("config.yaml");

    if config_path.exists() && !force {
        let out = InitOutput {
            success: false,
            message: "Project already initialized. Use --force to reinitialize.".to_string(),
            config_path,
            database_initialized: false,
        };
        output(&out, json_mode);
        return Ok(());
    }

    std::fs::create_dir_all(&caseflow_dir).context("Failed to create .caseflow directory")?;

    let config = Config::default();
    let yaml = serde_yaml::to_string(&config).context("Failed to serialize default config")?;
    std::fs::write(&config_path, yaml)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    let database_url = format!("sqlite://{}", config.database.path);
    initialize_database(&database_url)
        .await
        .context("Failed to initialize database")?;

    let out = InitOutput {
        success: true,
        message: format!("Initialized caseflow project ({})", config_path.display()),
        config_path,
        database_initialized: true,
    };
    output(&out, json_mode);
    Ok(())
}
