use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

use vmigrate::report::{self, ABORTED};
use vmigrate::secrets::credential_store;
use vmigrate::{Cli, Commands, MigrateArgs};
use vmigrate_core::domain::DomainProviderRegistry;
use vmigrate_core::observability::init_logging;
use vmigrate_core::MigrationOrchestrator;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // Usage errors count as an aborted run, help and version do not
            return if e.use_stderr() {
                ExitCode::from(ABORTED)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let result = match cli.command {
        Commands::Migrate(args) => migrate(args).await,
        Commands::Providers => {
            list_providers();
            Ok(ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("Migration run aborted: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(ABORTED)
        }
    }
}

async fn migrate(args: MigrateArgs) -> anyhow::Result<ExitCode> {
    let config = args.load_config().context("Invalid configuration")?;
    init_logging(&config.logging);

    let plan = args.plan()?;
    let credentials = credential_store(&args.source_login(), &args.target_login())?;

    let registry = DomainProviderRegistry::default();
    let orchestrator = MigrationOrchestrator::from_registry(config, &registry, Arc::new(credentials))
        .context("Failed to create domain provider")?;

    let summary = orchestrator.run(&plan).await?;

    let rendered = report::render(&summary, args.output).context("Failed to render report")?;
    println!("{}", rendered);

    Ok(report::exit_code(&summary))
}

fn list_providers() {
    let registry = DomainProviderRegistry::default();
    println!("Available domain providers:");
    for (kind, description) in registry.provider_info() {
        println!("  {:<10} {}", kind, description);
    }
}
