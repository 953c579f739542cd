//! Caseflow CLI entry point.

use clap::Parser;

use caseflow::cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { force } => caseflow::cli::commands::init::execute(force, cli.json).await,
        Commands::Run => caseflow::cli::commands::run::execute(cli.json).await,
        Commands::Case(command) => caseflow::cli::commands::case::execute(command, cli.json).await,
        Commands::Resource(command) => {
            caseflow::cli::commands::resource::execute(command, cli.json).await
        }
    };

    if let Err(err) = result {
        caseflow::cli::handle_error(err, cli.json);
    }
}
