use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use pipewright_config::{Block, PipelineFile, Settings};
use pipewright_history::{FsHistoryStore, HistoryStore, Recorder};
use pipewright_host::{Catalog, RunnerHost};
use pipewright_protocol::{InvocationClient, LogLine};
use pipewright_runtime::{
  ExecutionObserver, NodeExit, NodeStatus, Observers, Processor, RunInfo, RunOutcome, RunRequest,
};

/// Pipewright - run build pipelines assembled from typed blocks
#[derive(Parser)]
#[command(name = "pipewright")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.pipewright)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a pipeline file
  Run {
    /// Path to the pipeline file (JSON)
    pipeline_file: PathBuf,

    /// Pipeline id used for build history (default: file stem)
    #[arg(long)]
    pipeline_id: Option<String>,

    /// Write the step outputs to this file instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
  },

  /// Inspect or prune build history
  History {
    #[command(subcommand)]
    action: HistoryAction,
  },

  /// List the built-in plugins and their nodes
  Plugins,
}

#[derive(Subcommand)]
enum HistoryAction {
  /// List past runs, newest first
  List {
    /// Only show runs of this pipeline
    #[arg(long)]
    pipeline: Option<String>,
  },

  /// Print one run as JSON
  Show { id: String },

  /// Delete one run
  Delete { id: String },

  /// Delete every run of one pipeline
  Prune { pipeline: String },

  /// Delete all history
  Clear,

  /// Show storage usage
  Info,
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let data_dir = cli.data_dir.unwrap_or_else(|| {
    dirs::home_dir()
      .expect("could not determine home directory")
      .join(".pipewright")
  });

  let settings = Settings::load(&data_dir)
    .with_context(|| format!("failed to load settings from {}", data_dir.display()))?;

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(settings.log_filter())),
    )
    .with_writer(std::io::stderr)
    .init();

  let rt = tokio::runtime::Runtime::new()?;

  match cli.command {
    Some(Commands::Run {
      pipeline_file,
      pipeline_id,
      output,
    }) => rt.block_on(run_pipeline(&pipeline_file, pipeline_id, output, &data_dir, &settings)),
    Some(Commands::History { action }) => rt.block_on(history(action, &data_dir, &settings)),
    Some(Commands::Plugins) => list_plugins(),
    None => {
      println!("pipewright - use --help to see available commands");
      Ok(())
    }
  }
}

async fn run_pipeline(
  pipeline_file: &Path,
  pipeline_id: Option<String>,
  output: Option<PathBuf>,
  data_dir: &Path,
  settings: &Settings,
) -> Result<()> {
  let pipeline = PipelineFile::load(pipeline_file)
    .with_context(|| format!("failed to load pipeline file: {}", pipeline_file.display()))?;

  let pipeline_id = pipeline_id.unwrap_or_else(|| {
    pipeline_file
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| pipeline.name.clone())
  });

  eprintln!("Loaded pipeline: {} ({})", pipeline.name, pipeline_id);

  let catalog = Arc::new(Catalog::with_system());
  let cache_folder = settings.cache_folder();
  tokio::fs::create_dir_all(&cache_folder)
    .await
    .with_context(|| format!("failed to create cache folder: {}", cache_folder.display()))?;

  let shutdown = CancellationToken::new();
  let (client, endpoint) = InvocationClient::local();
  let host = RunnerHost::new(catalog.clone(), cache_folder).spawn(endpoint, shutdown.clone());

  let store: Arc<dyn HistoryStore> = Arc::new(FsHistoryStore::new(settings.history_dir(data_dir)));
  let recorder = Recorder::new(store).with_project_path(pipeline_file.display().to_string());
  let observers = Observers::new()
    .with(Arc::new(recorder))
    .with(Arc::new(ConsoleObserver));

  let processor = Processor::new(Arc::new(client))
    .with_definitions(catalog.definitions())
    .with_observer(Arc::new(observers));

  let cancel = CancellationToken::new();
  let on_interrupt = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      eprintln!("Cancelling...");
      on_interrupt.cancel();
    }
  });

  let request = RunRequest {
    pipeline_id,
    name: pipeline.name.clone(),
    blocks: pipeline.graph(),
    variables: pipeline.variables.clone(),
  };
  let result = processor.run(request, cancel).await;

  shutdown.cancel();
  let _ = host.await;

  let result = match result {
    Ok(result) => result,
    Err(e) if e.is_cancelled() => bail!("run cancelled"),
    Err(e) => return Err(e).context("pipeline run failed"),
  };

  eprintln!("Execution completed: {}", result.execution_id);
  eprintln!("Steps recorded: {}", result.steps.len());

  let json = serde_json::to_string_pretty(&result.steps)?;
  match output {
    Some(path) => tokio::fs::write(&path, json)
      .await
      .with_context(|| format!("failed to write output file: {}", path.display()))?,
    None => println!("{}", json),
  }

  Ok(())
}

async fn history(action: HistoryAction, data_dir: &Path, settings: &Settings) -> Result<()> {
  let store = FsHistoryStore::new(settings.history_dir(data_dir));

  match action {
    HistoryAction::List { pipeline } => {
      let entries = match pipeline {
        Some(id) => store.get_by_pipeline(&id).await,
        None => store.get_all().await,
      }
      .context("failed to read build history")?;

      if entries.is_empty() {
        eprintln!("No builds recorded");
      }
      for entry in entries {
        let duration = entry
          .duration
          .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
          .unwrap_or_else(|| "-".to_string());
        println!(
          "{}  {:<10} {:<24} {}  {}/{} steps  {}",
          entry.created_at.format("%Y-%m-%d %H:%M:%S"),
          format!("{:?}", entry.status).to_lowercase(),
          entry.pipeline_id,
          entry.id,
          entry.completed_steps,
          entry.total_steps,
          duration,
        );
      }
    }
    HistoryAction::Show { id } => {
      let entry = store
        .get(&id)
        .await
        .with_context(|| format!("failed to load build {}", id))?;
      println!("{}", serde_json::to_string_pretty(&entry)?);
    }
    HistoryAction::Delete { id } => {
      store
        .delete(&id)
        .await
        .with_context(|| format!("failed to delete build {}", id))?;
      eprintln!("Deleted {}", id);
    }
    HistoryAction::Prune { pipeline } => {
      store
        .delete_by_pipeline(&pipeline)
        .await
        .with_context(|| format!("failed to delete builds of {}", pipeline))?;
      eprintln!("Deleted builds of {}", pipeline);
    }
    HistoryAction::Clear => {
      store.clear().await.context("failed to clear build history")?;
      eprintln!("Build history cleared");
    }
    HistoryAction::Info => {
      let info = store
        .storage_info()
        .await
        .context("failed to read build history")?;
      println!("Location: {}", store.dir().display());
      println!("Entries:  {}", info.entries);
      println!("Size:     {} bytes", info.bytes);
      if let (Some(oldest), Some(newest)) = (info.oldest, info.newest) {
        println!("Oldest:   {}", oldest.format("%Y-%m-%d %H:%M:%S"));
        println!("Newest:   {}", newest.format("%Y-%m-%d %H:%M:%S"));
      }
    }
  }

  Ok(())
}

fn list_plugins() -> Result<()> {
  for plugin in Catalog::with_system().definitions() {
    println!("{} - {}", plugin.id, plugin.name);
    for node in &plugin.nodes {
      let mut params: Vec<_> = node.params.keys().cloned().collect();
      params.sort();
      println!(
        "  {:<10} {:<10} {}  [{}]",
        node.id,
        format!("{:?}", node.kind).to_lowercase(),
        node.description,
        params.join(", ")
      );
    }
  }
  Ok(())
}

/// Prints progress to stderr.
struct ConsoleObserver;

#[async_trait]
impl ExecutionObserver for ConsoleObserver {
  async fn run_started(&self, run: &RunInfo) {
    eprintln!("Run {} started", run.execution_id);
  }

  async fn node_enter(&self, _run: &RunInfo, block: &Block) {
    eprintln!("> {}", block.display_name());
  }

  async fn node_exit(&self, _run: &RunInfo, block: &Block, exit: &NodeExit) {
    match (exit.status, &exit.error) {
      (NodeStatus::Failed, Some(error)) => eprintln!("x {}: {}", block.display_name(), error),
      (NodeStatus::Cancelled, _) => eprintln!("- {} cancelled", block.display_name()),
      _ => {}
    }
  }

  async fn log(&self, _run: &RunInfo, line: &LogLine, _block: Option<&Block>) {
    eprintln!("  [{}] {}", line.level, line.message);
  }

  async fn run_finished(&self, _run: &RunInfo, outcome: &RunOutcome) {
    if let RunOutcome::Failed { message, .. } = outcome {
      eprintln!("Run failed: {}", message);
    }
  }
}
