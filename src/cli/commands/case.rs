//! Implementation of the `caseflow case` subcommands.

use anyhow::{Context, Result};

use crate::adapters::sqlite::{initialize_database, SqliteCaseRepository};
use crate::cli::display::{list_table, render_list};
use crate::cli::output::{output, CommandOutput};
use crate::cli::types::CaseCommands;
use crate::domain::models::{Case, CasePriority, CaseStatus, StepRecord};
use crate::domain::ports::CaseRepository;
use crate::infrastructure::config::ConfigLoader;

pub async fn execute(command: CaseCommands, json_mode: bool) -> Result<()> {
    let config = ConfigLoader::load().context("Failed to load configuration")?;
    let database_url = format!("sqlite://{}", config.database.path);
    let db = initialize_database(&database_url)
        .await
        .context("Failed to open database")?;
    let repo = SqliteCaseRepository::new(db);

    match command {
        CaseCommands::Submit {
            case_id,
            source_path,
            priority,
        } => {
            let priority = parse_priority(&priority)?;
            let case = Case::new(case_id.clone(), source_path).with_priority(priority);
            repo.insert(&case)
                .await
                .with_context(|| format!("Failed to submit case {case_id}"))?;

            let out = CaseListOutput { cases: vec![case] };
            output(&out, json_mode);
        }

        CaseCommands::List { status, limit } => {
            let mut cases = match status {
                Some(s) => {
                    let status = CaseStatus::from_str(&s)
                        .with_context(|| format!("Unknown status: {s}"))?;
                    repo.list_by_status(status).await?
                }
                None => repo.list_all().await?,
            };
            cases.truncate(limit);

            let out = CaseListOutput { cases };
            output(&out, json_mode);
        }

        CaseCommands::Show { case_id } => {
            let case = repo
                .get(&case_id)
                .await?
                .with_context(|| format!("Case {case_id} not found"))?;
            let history = repo.step_history(&case_id).await?;

            let out = CaseShowOutput { case, history };
            output(&out, json_mode);
        }

        CaseCommands::SetPriority { case_id, priority } => {
            let priority = parse_priority(&priority)?;
            repo.set_priority(&case_id, priority)
                .await
                .with_context(|| format!("Failed to update priority for {case_id}"))?;
            let case = repo
                .get(&case_id)
                .await?
                .with_context(|| format!("Case {case_id} not found"))?;

            let out = CaseListOutput { cases: vec![case] };
            output(&out, json_mode);
        }
    }

    Ok(())
}

fn parse_priority(s: &str) -> Result<CasePriority> {
    CasePriority::from_str(s)
        .with_context(|| format!("Unknown priority: {s} (low|normal|high|urgent|critical)"))
}

#[derive(Debug, serde::Serialize)]
struct CaseListOutput {
    cases: Vec<Case>,
}

impl CommandOutput for CaseListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "status", "priority", "resource", "retries", "created"]);
        for case in &self.cases {
            table.add_row(vec![
                case.id.clone(),
                case.status.to_string(),
                case.priority.to_string(),
                case.assigned_resource.clone().unwrap_or_else(|| "-".to_string()),
                case.retry_count.to_string(),
                case.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ]);
        }
        render_list("case", &table, self.cases.len())
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.cases).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
struct CaseShowOutput {
    case: Case,
    history: Vec<StepRecord>,
}

impl CommandOutput for CaseShowOutput {
    fn to_human(&self) -> String {
        let case = &self.case;
        let mut lines = vec![
            format!("Case:     {}", case.id),
            format!("Path:     {}", case.source_path),
            format!("Status:   {}", case.status),
            format!("Priority: {}", case.priority),
            format!(
                "Resource: {}",
                case.assigned_resource.as_deref().unwrap_or("-")
            ),
            format!("Retries:  {}", case.retry_count),
        ];
        if let (Some(kind), Some(message)) = (&case.last_error_kind, &case.last_error_message) {
            lines.push(format!("Error:    {kind}: {message}"));
        }

        if self.history.is_empty() {
            lines.push("\nNo steps recorded yet.".to_string());
        } else {
            let mut table = list_table(&["step", "started", "result", "detail"]);
            for record in &self.history {
                table.add_row(vec![
                    record.step.clone(),
                    record.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    if record.outcome.success {
                        "ok".to_string()
                    } else {
                        "failed".to_string()
                    },
                    record.outcome.summary(),
                ]);
            }
            lines.push(format!("\n{table}"));
        }

        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
