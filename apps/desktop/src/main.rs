mod chat;
mod config;
mod render;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    Action, ActionController, AnalysisRequest, AnalyzeAction, ArchiveAction, ArchiveRequest,
    ArchiveResponse, BackendClient, CategorizeAction, CategorizeInput, ChatAction, ChatMessage,
    ConcurrencyPolicy, ControllerConfig, RenderHooks, Settlement, TabularUpload,
};
use shared::{
    domain::{EntryId, FileUpload, ReportId},
    protocol::CreateReportRequest,
};
use tokio::{io::BufReader, sync::broadcast::error::RecvError};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::{
    chat::{ChatTranscript, Transcript},
    config::{load_settings, Settings},
    render::{AnalysisView, ArchiveView, CategorizeView},
};

#[derive(Parser, Debug)]
#[command(name = "desk", about = "Terminal client for the task desk backend")]
struct Args {
    /// Config file; defaults to ./desk.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    backend_url: Option<String>,
    /// Controller deadline in milliseconds; 0 disables it.
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
    #[arg(long, global = true)]
    concurrency: Option<ConcurrencyPolicy>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one message, or read messages from stdin when none is given.
    Chat {
        message: Vec<String>,
        #[arg(long)]
        transcript: Option<PathBuf>,
    },
    /// Analyze a weekly task export, or reanalyze a stored entry.
    Analyze {
        #[arg(required_unless_present = "reanalyze")]
        file: Option<PathBuf>,
        #[arg(long, conflicts_with = "file")]
        reanalyze: Option<String>,
    },
    /// Categorize target problems against a reference set.
    Categorize {
        reference: PathBuf,
        target: PathBuf,
        /// Write the categorized result file here.
        #[arg(long)]
        download: Option<PathBuf>,
    },
    Reports {
        #[command(subcommand)]
        action: ReportsCommand,
    },
    History {
        #[command(subcommand)]
        action: HistoryCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ReportsCommand {
    List,
    Show {
        id: String,
    },
    Delete {
        id: String,
    },
    Create {
        #[arg(long, default_value = "")]
        incidents: String,
        #[arg(long, default_value = "")]
        suggestions: String,
        #[arg(long, default_value = "")]
        notes: String,
        #[arg(long, default_value = "")]
        summary: String,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryCommand {
    List,
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(url) = args.backend_url {
        settings.backend_url = url;
    }
    if let Some(ms) = args.timeout_ms {
        settings.timeout_ms = (ms > 0).then_some(ms);
    }
    if let Some(policy) = args.concurrency {
        settings.concurrency = policy;
    }
    info!(
        backend_url = %settings.backend_url,
        concurrency = %settings.concurrency,
        timeout_ms = ?settings.timeout_ms,
        "desk starting"
    );

    let client = BackendClient::new(&settings.backend_url)
        .with_context(|| format!("invalid backend url '{}'", settings.backend_url))?;

    match args.command {
        Command::Chat {
            message,
            transcript,
        } => {
            let transcript = transcript.or_else(|| settings.transcript_path.clone());
            run_chat(&settings, client, message, transcript).await
        }
        Command::Analyze { file, reanalyze } => {
            let request = match (file, reanalyze) {
                (_, Some(entry_id)) => AnalysisRequest::Reanalyze(EntryId::new(entry_id)),
                (Some(path), None) => {
                    AnalysisRequest::Upload(TabularUpload::new(read_upload(&path).await?)?)
                }
                (None, None) => bail!("either a file or --reanalyze is required"),
            };
            run_once(&settings, AnalyzeAction::new(client), AnalysisView, request).await
        }
        Command::Categorize {
            reference,
            target,
            download,
        } => run_categorize(&settings, client, reference, target, download).await,
        Command::Reports { action } => {
            let request = match action {
                ReportsCommand::List => ArchiveRequest::ListReports,
                ReportsCommand::Show { id } => ArchiveRequest::ViewReport(ReportId::new(id)),
                ReportsCommand::Delete { id } => ArchiveRequest::DeleteReport(ReportId::new(id)),
                ReportsCommand::Create {
                    incidents,
                    suggestions,
                    notes,
                    summary,
                } => ArchiveRequest::CreateReport(CreateReportRequest {
                    incident_info: incidents,
                    improvement_suggestions: suggestions,
                    additional_notes: notes,
                    ai_summary: summary,
                    data_summary: None,
                }),
            };
            run_once(&settings, ArchiveAction::new(client), ArchiveView, request).await
        }
        Command::History { action } => {
            let request = match action {
                HistoryCommand::List => ArchiveRequest::ListHistory,
                HistoryCommand::Delete { id } => ArchiveRequest::DeleteHistory(EntryId::new(id)),
            };
            run_once(&settings, ArchiveAction::new(client), ArchiveView, request).await
        }
    }
}

fn spawn_controller<A, H>(action: A, hooks: H, config: ControllerConfig) -> ActionController<A>
where
    A: Action,
    H: RenderHooks<A::Output>,
{
    let controller = ActionController::spawn(action, hooks, config);
    let name = controller.name();
    let mut events = controller.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(action = name, ?event, "controller event"),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(action = name, skipped, "controller events lagged")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
    controller
}

async fn run_once<A, H>(settings: &Settings, action: A, hooks: H, input: A::Input) -> Result<()>
where
    A: Action,
    H: RenderHooks<A::Output>,
{
    let controller = spawn_controller(action, hooks, settings.controller_config());
    let settlement = controller.trigger_and_wait(input).await;
    controller.shutdown().await;
    ensure_succeeded(controller.name(), settlement?)
}

async fn run_chat(
    settings: &Settings,
    client: BackendClient,
    words: Vec<String>,
    transcript_path: Option<PathBuf>,
) -> Result<()> {
    let (transcript, writer) = Transcript::spawn(transcript_path);
    let controller = spawn_controller(
        ChatAction::new(client),
        ChatTranscript::new(transcript.clone()),
        settings.controller_config(),
    );

    let outcome = if words.is_empty() {
        chat::run_session(&controller, &transcript, BufReader::new(tokio::io::stdin()))
            .await
            .map(|failures| {
                if failures > 0 {
                    info!(failures, "chat session ended with failed messages");
                }
            })
    } else {
        match ChatMessage::new(&words.join(" ")) {
            Ok(message) => chat::send(&controller, &transcript, message)
                .await
                .and_then(|settlement| ensure_succeeded(controller.name(), settlement)),
            Err(err) => Err(err.into()),
        }
    };

    controller.shutdown().await;
    drop(transcript);
    let _ = writer.await;
    outcome
}

async fn run_categorize(
    settings: &Settings,
    client: BackendClient,
    reference: PathBuf,
    target: PathBuf,
    download: Option<PathBuf>,
) -> Result<()> {
    let input = CategorizeInput::new(read_upload(&reference).await?, read_upload(&target).await?)?;
    let categorize = spawn_controller(
        CategorizeAction::new(client.clone()),
        CategorizeView,
        settings.controller_config(),
    );
    let settlement = categorize.trigger_and_wait(input).await?;
    let response = categorize.last_result().await?;
    categorize.shutdown().await;
    ensure_succeeded(categorize.name(), settlement)?;

    let (Some(path), Some(response)) = (download, response) else {
        return Ok(());
    };
    let archive = spawn_controller(
        ArchiveAction::new(client),
        ArchiveView,
        settings.controller_config(),
    );
    let settlement = archive
        .trigger_and_wait(ArchiveRequest::DownloadResult {
            download_url: response.download_url,
        })
        .await?;
    let downloaded = archive.last_result().await?;
    archive.shutdown().await;
    ensure_succeeded(archive.name(), settlement)?;

    if let Some(ArchiveResponse::Download(bytes)) = downloaded {
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write '{}'", path.display()))?;
        info!(path = %path.display(), "saved categorized result");
    }
    Ok(())
}

async fn read_upload(path: &Path) -> Result<FileUpload> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("'{}' has no file name", path.display()))?;
    Ok(FileUpload::new(filename, bytes))
}

/// The hooks have already rendered the failure; this only sets the exit status.
fn ensure_succeeded(name: &str, settlement: Settlement) -> Result<()> {
    match settlement {
        Settlement::Succeeded(_) => Ok(()),
        Settlement::Failed(token, kind) => bail!("{name} {token} failed ({kind:?})"),
        other => bail!("{name} did not complete: {other:?}"),
    }
}
