//! Operator CLI for the batch migrator
//!
//! Wires the HTTP record-store clients, the JSON state store and the
//! rate-limited executors into a `Migrator`, then runs one command.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use connector::{EndpointConfig, HttpDestinationClient, HttpSourceClient, RateLimitedExecutor};
use migrator::{
    operations,
    services::{JsonStateStore, MappingTransformer, TracingProgressSink},
    MigrationSettings, Migrator, MigratorOptions,
};
use shared::{logging, EntityType, RunStatus, SourceId};

const COMPONENT: &str = "cli";

/// Idempotent batch transfer of leads, contacts, companies, tasks and notes between CRM accounts
#[derive(Parser)]
#[command(name = "migrator")]
#[command(about = "Transfers CRM records in resumable, reversible batches")]
pub struct Args {
    /// Directory holding the index, batch cursor, mappings and last run
    #[arg(long, global = true, default_value = "./migration_state")]
    pub state_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Transfer the next slice of eligible leads
    StartBatch,
    /// Undo everything the last batch created
    RollbackBatch,
    /// Undo the newest root record of the last batch and its dependents
    RollbackLast {
        /// Root entity type: leads, contacts or companies
        #[arg(long, default_value = "leads")]
        entity_type: EntityType,
    },
    /// Start the next batch from the beginning of the eligible set
    ResetOffset,
    /// Forget every transferred record (irreversible)
    ResetIndex {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Show the batch cursor, index counts and last run summary
    Status,
    /// Change the owner filter or page size of the batch cursor
    Configure {
        /// Owner ids whose leads are eligible (repeatable); pass none to keep the current filter
        #[arg(long = "owner")]
        owners: Vec<String>,

        /// Match every owner
        #[arg(long, conflicts_with = "owners")]
        all_owners: bool,

        /// Leads per batch
        #[arg(long)]
        page_size: Option<usize>,
    },
    /// Count source leads per owner, to choose the owner filter from
    Owners,
    /// Transfer specific leads now, outside the batch cursor
    Transfer {
        /// Source lead id (repeatable)
        #[arg(long = "lead", required = true)]
        leads: Vec<String>,
    },
    /// Show the most recent skipped or refused operations
    Blocked {
        #[arg(long, default_value = "50")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init_tracing(Some(&args.log_level));

    match run(args).await {
        Ok(code) => {
            logging::log_shutdown(COMPONENT, "command finished");
            code
        }
        Err(e) => {
            logging::log_error(COMPONENT, "Command failed", &format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let store = JsonStateStore::new(&args.state_dir);

    match args.command {
        Command::StartBatch => {
            let migrator = build_migrator(store)?;
            let run = migrator.start_batch().await?;
            print_json(&run)?;
            Ok(exit_for(run.status))
        }
        Command::RollbackBatch => {
            let migrator = build_migrator(store)?;
            let report = migrator.rollback_batch().await?;
            print_json(&report)?;
            Ok(exit_for(report.run.status))
        }
        Command::RollbackLast { entity_type } => {
            let migrator = build_migrator(store)?;
            let report = migrator.rollback_last(entity_type).await?;
            print_json(&report)?;
            Ok(exit_for(report.run.status))
        }
        Command::ResetOffset => {
            print_json(&operations::reset_offset(&store).await?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::ResetIndex { yes } => {
            anyhow::ensure!(yes, "reset-index wipes every transferred-record mapping; pass --yes to confirm");
            let dropped = operations::reset_index(&store).await?;
            logging::log_success(COMPONENT, "Identity index reset");
            print_json(&dropped)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Status => {
            print_json(&operations::status(&store).await?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Configure {
            owners,
            all_owners,
            page_size,
        } => {
            let owner_ids = if all_owners {
                Some(Vec::new())
            } else if owners.is_empty() {
                None
            } else {
                Some(owners)
            };
            print_json(&operations::configure(&store, owner_ids, page_size).await?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Owners => {
            let migrator = build_migrator(store)?;
            print_json(&migrator.owner_summary().await?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Transfer { leads } => {
            let migrator = build_migrator(store)?;
            let ids: Vec<SourceId> = leads.into_iter().map(SourceId::from).collect();
            let report = migrator.transfer_leads(&ids).await?;
            print_json(&report)?;
            Ok(exit_for(report.run.status))
        }
        Command::Blocked { limit } => {
            print_json(&operations::blocked_attempts(&store, limit).await?)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_migrator(
    store: JsonStateStore,
) -> anyhow::Result<Migrator<HttpSourceClient, HttpDestinationClient, MappingTransformer, TracingProgressSink, JsonStateStore>>
{
    let settings = MigrationSettings::from_env().context("loading endpoint settings")?;
    let policy = settings.retry_policy();

    let source = HttpSourceClient::new(
        EndpointConfig::new(&settings.source.base_url, settings.source.token.clone())
            .context("invalid SOURCE_BASE_URL")?,
    )?;
    let destination = HttpDestinationClient::new(
        EndpointConfig::new(&settings.destination.base_url, settings.destination.token.clone())
            .context("invalid DEST_BASE_URL")?,
    )?
    .with_lost_status_id(settings.lost_status_id);

    let transformer = match &settings.pipeline_id {
        Some(pipeline) => MappingTransformer::new().with_pipeline_id(pipeline.clone()),
        None => MappingTransformer::new(),
    };

    logging::log_startup(
        COMPONENT,
        &format!(
            "{} req/s, {} retries, state in {}",
            settings.max_requests_per_second,
            settings.max_retries,
            store.state_dir().display()
        ),
    );

    Ok(Migrator::new(
        source,
        destination,
        transformer,
        TracingProgressSink::new("progress"),
        store,
        Arc::new(RateLimitedExecutor::new("source", policy.clone())),
        Arc::new(RateLimitedExecutor::new("destination", policy)),
    )
    .with_options(MigratorOptions {
        create_chunk_size: settings.create_chunk_size,
        terminal_stage_ids: settings.terminal_stage_ids.clone(),
    }))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_for(status: RunStatus) -> ExitCode {
    match status {
        RunStatus::Error => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}
