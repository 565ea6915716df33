use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser as _;

use contract_ocr_worker::cli::{Cli, Command, ProcessArgs, ServeArgs};
use contract_ocr_worker::event::IngestEvent;
use contract_ocr_worker::gemini::GeminiConfig;
use contract_ocr_worker::orchestrator::Orchestrator;
use contract_ocr_worker::pipeline::CommandOcrPipeline;
use contract_ocr_worker::server::{self, AppState};
use contract_ocr_worker::storage::object_store_from_env;
use contract_ocr_worker::taxonomy::SqliteRiskRepository;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    contract_ocr_worker::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        Command::Serve(args) => serve(args).await.context("serve")?,
        Command::Process(args) => process(args).await.context("process")?,
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    // Managed container platforms dictate the port via PORT.
    let addr = match std::env::var("PORT") {
        Ok(raw) => {
            let port = raw
                .parse::<u16>()
                .with_context(|| format!("invalid PORT={raw:?}"))?;
            std::net::SocketAddr::new(args.addr.ip(), port)
        }
        Err(_) => args.addr,
    };

    let state = AppState {
        store: object_store_from_env().context("configure object store")?,
        pipeline: Arc::new(CommandOcrPipeline::from_env().context("configure ocr pipeline")?),
        gemini: GeminiConfig::from_env().context("configure model client")?,
        work_dir: args.work_dir,
        output_bucket: args.output_bucket,
        pipeline_timeout: Duration::from_secs(args.pipeline_timeout_secs),
    };

    server::serve(addr, state).await
}

async fn process(args: ProcessArgs) -> anyhow::Result<()> {
    let event = IngestEvent::from_object_path(&args.bucket, &args.object, args.risk_type_ids)?;

    let orchestrator = Orchestrator {
        store: object_store_from_env().context("configure object store")?,
        pipeline: Arc::new(CommandOcrPipeline::from_env().context("configure ocr pipeline")?),
        repository: Arc::new(SqliteRiskRepository::for_bucket(&event.bucket)),
        gemini: GeminiConfig::from_env().context("configure model client")?,
        work_dir: args.work_dir,
        output_bucket: args.output_bucket,
        pipeline_timeout: Duration::from_secs(args.pipeline_timeout_secs),
    };

    let outcome = orchestrator.process_single_pdf(&event).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&outcome).context("serialize outcome")?
    );

    if !outcome.success {
        anyhow::bail!(
            "processing failed: {}",
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
