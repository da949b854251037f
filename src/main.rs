use clap::Parser;
use mimalloc::MiMalloc;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use storesync::cli::{Cli, Command};
use storesync::config::{self, Config};
use storesync::error::SyncError;
use storesync::{jobs, logging};
use tracing::{error, info};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let env_file = config::load_env_file(&cli.env_file);

    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            logging::init_console("info");
            env_file.log(&cli.env_file);
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = match logging::init(&cfg.app) {
        Ok(guard) => {
            info!(log_dir = %guard.log_dir.display(), "logging initialised");
            Some(guard)
        }
        Err(e) => {
            logging::init_console(&cfg.app.log_level);
            error!(error = %e, path = %cfg.app.log_dir.display(), "cannot open log file; console only");
            None
        }
    };
    env_file.log(&cli.env_file);

    let job = cli.command.name();
    let started = Instant::now();
    info!(job, version = env!("CARGO_PKG_VERSION"), "job started");

    match run(&cfg, cli.command).await {
        Ok(()) => {
            info!(job, elapsed_ms = started.elapsed().as_millis() as u64, "job finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(job, error = %e, elapsed_ms = started.elapsed().as_millis() as u64, "critical error; job aborted");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: &Config, command: Command) -> Result<(), SyncError> {
    let output_or = |output: Option<PathBuf>, stem: &str| {
        output.unwrap_or_else(|| jobs::default_export_path(cfg, stem))
    };

    match command {
        Command::CheckDb => {
            jobs::check_db(cfg).await?;
        }
        Command::RunProcedure {
            procedure,
            params,
            named,
            output,
        } => {
            let table = if named.is_empty() {
                jobs::run_procedure(cfg, &procedure, params, output.as_deref()).await?
            } else {
                jobs::run_procedure_named(cfg, &procedure, named, output.as_deref()).await?
            };
            info!(procedure = %procedure, rows = table.len(), "procedure finished");
        }
        Command::LoadTable {
            procedure,
            param,
            table_type,
            input,
        } => {
            let table = jobs::load_table(cfg, &procedure, &param, &table_type, &input).await?;
            info!(procedure = %procedure, rows = table.len(), "table-valued call finished");
        }
        Command::ShopifyProducts { output } => {
            let path = output_or(output, "shopify_products");
            let rows = jobs::shopify_products(cfg, &path).await?;
            info!(variants = rows.len(), path = %path.display(), "products exported");
        }
        Command::ShopifyInventoryGet { inventory_item_id } => {
            let level = jobs::shopify_inventory_get(cfg, inventory_item_id).await?;
            println!("{}", serde_json::to_string_pretty(&level)?);
        }
        Command::ShopifyPushInventory {
            procedure,
            location_id,
            report,
        } => {
            let report = Some(output_or(report, "shopify_push_report"));
            jobs::shopify_push_inventory(cfg, &procedure, location_id, report.as_deref()).await?;
        }
        Command::VtexOrders { days_back, output } => {
            let path = output_or(output, "vtex_orders");
            let count = jobs::vtex_orders(cfg, days_back, &path).await?;
            info!(orders = count, path = %path.display(), "orders exported");
        }
        Command::VtexInventory { procedure, output } => {
            let path = output_or(output, "vtex_inventory");
            let rows = jobs::vtex_inventory(cfg, &procedure, &path).await?;
            info!(rows = rows.len(), path = %path.display(), "inventory exported");
        }
        Command::CleanLogs => {
            jobs::clean_logs(cfg);
        }
        Command::Dedupe { procedure } => {
            let affected = jobs::dedupe(cfg, &procedure).await?;
            info!(procedure = %procedure, affected, "duplicates removed");
        }
        Command::Recipients { origin } => {
            let recipients = jobs::notification_recipients(cfg, &origin).await?;
            println!("to:  {}", recipients.to.join("; "));
            println!("cc:  {}", recipients.cc.join("; "));
            println!("bcc: {}", recipients.bcc.join("; "));
        }
    }
    Ok(())
}
