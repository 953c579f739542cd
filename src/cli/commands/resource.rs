//! Implementation of the `caseflow resource` subcommands.

use anyhow::{Context, Result};

use crate::adapters::sqlite::{initialize_database, SqliteResourceRepository};
use crate::cli::display::{list_table, render_list};
use crate::cli::output::{output, CommandOutput};
use crate::cli::types::ResourceCommands;
use crate::domain::models::Resource;
use crate::domain::ports::ResourceRepository;
use crate::infrastructure::config::ConfigLoader;

pub async fn execute(command: ResourceCommands, json_mode: bool) -> Result<()> {
    let config = ConfigLoader::load().context("Failed to load configuration")?;
    let database_url = format!("sqlite://{}", config.database.path);
    let db = initialize_database(&database_url)
        .await
        .context("Failed to open database")?;
    let repo = SqliteResourceRepository::new(db);

    match command {
        ResourceCommands::List => {
            // Make configured slots visible even before the first run cycle.
            for slot in &config.resources.slots {
                repo.upsert(slot).await?;
            }
            let resources = repo.list_all().await?;
            let out = ResourceListOutput { resources };
            output(&out, json_mode);
        }
    }

    Ok(())
}

#[derive(Debug, serde::Serialize)]
struct ResourceListOutput {
    resources: Vec<Resource>,
}

impl CommandOutput for ResourceListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "status", "holder", "locked since"]);
        for resource in &self.resources {
            table.add_row(vec![
                resource.id.clone(),
                resource.status.to_string(),
                resource
                    .holder_case_id
                    .clone()
                    .unwrap_or_else(|| "-".to_string()),
                resource
                    .locked_at
                    .map_or_else(|| "-".to_string(), |t| {
                        t.format("%Y-%m-%d %H:%M:%S").to_string()
                    }),
            ]);
        }
        render_list("resource", &table, self.resources.len())
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.resources).unwrap_or_default()
    }
}
