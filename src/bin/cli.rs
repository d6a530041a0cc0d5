//! AirStore CLI - Main entry point for CLI binary
//!
//! This binary provides the `airstore` tool for inspecting configured stores
//! and running migration backfills.

use airstore::engine::{
    cli::formatter::{format_ratio, CliFormatter},
    cli::{Cli, Commands, OutputFormat},
    config::{Config, CONFIG_FILE},
    registry::StoreRegistry,
};
use anyhow::{bail, Context};
use clap::Parser;
use std::path::Path;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run_cli(cli).await {
        CliFormatter::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run_cli(cli: Cli) -> anyhow::Result<()> {
    let project_dir = cli.get_project_dir();
    let json_output = cli.format == OutputFormat::Json;

    match cli.command {
        Commands::Init { force } => cmd_init(&project_dir, force, json_output),
        Commands::Migrate { store } => cmd_migrate(&project_dir, &store, json_output).await,
        Commands::Stats { store } => cmd_stats(&project_dir, &store, json_output).await,
        Commands::Get { store, uuid } => cmd_get(&project_dir, &store, &uuid, json_output).await,
    }
}

fn load_registry(project_dir: &Path) -> anyhow::Result<StoreRegistry> {
    let config = Config::load(project_dir)
        .with_context(|| format!("loading {} from {}", CONFIG_FILE, project_dir.display()))?;
    Ok(StoreRegistry::from_config(&config)?)
}

fn cmd_init(project_dir: &Path, force: bool, json: bool) -> anyhow::Result<()> {
    if project_dir.join(CONFIG_FILE).exists() && !force {
        bail!(
            "{} already exists in {} (use --force to overwrite)",
            CONFIG_FILE,
            project_dir.display()
        );
    }

    std::fs::create_dir_all(project_dir)?;
    let config = Config::default_for_project(project_dir);
    config.save(project_dir)?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "success": true,
                "config": project_dir.join(CONFIG_FILE).display().to_string(),
                "stores": config.stores.keys().collect::<Vec<_>>(),
            })
        );
    } else {
        CliFormatter::success(&format!("Wrote {}", project_dir.join(CONFIG_FILE).display()));
    }
    Ok(())
}

async fn cmd_migrate(project_dir: &Path, store: &str, json: bool) -> anyhow::Result<()> {
    let registry = load_registry(project_dir)?;
    let migration = registry.migration(store)?;

    let report = migration
        .migrate()
        .await
        .with_context(|| format!("backfill of {} failed", store))?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "store": store,
                "from": migration.from().name(),
                "to": migration.to().name(),
                "report": report,
            })
        );
    } else {
        CliFormatter::migration_report(store, &report);
        CliFormatter::kv("Copied ratio", &format_ratio(report.copied, report.scanned));
        if report.copied == 0 {
            CliFormatter::success(&format!("{} already holds every record", migration.to().name()));
        } else {
            CliFormatter::success(&format!(
                "Copied {} records into {}",
                report.copied,
                migration.to().name()
            ));
        }
    }
    Ok(())
}

async fn cmd_stats(project_dir: &Path, store: &str, json: bool) -> anyhow::Result<()> {
    let registry = load_registry(project_dir)?;
    let count = registry.get(store)?.get_all(None).await?.len();

    if json {
        println!("{}", serde_json::json!({ "store": store, "records": count }));
    } else {
        CliFormatter::header(&format!("Store: {}", store));
        CliFormatter::kv("Records", &count.to_string());
    }
    Ok(())
}

async fn cmd_get(project_dir: &Path, store: &str, uuid: &str, json: bool) -> anyhow::Result<()> {
    let registry = load_registry(project_dir)?;
    match registry.get(store)?.get(uuid).await? {
        Some(record) if json => println!("{}", record.to_value()),
        Some(record) => {
            CliFormatter::header(&format!("{} / {}", store, uuid));
            CliFormatter::record(&record.to_value());
        }
        None if json => println!("null"),
        None => CliFormatter::warning(&format!("No record {} in {}", uuid, store)),
    }
    Ok(())
}
