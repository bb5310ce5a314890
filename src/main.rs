use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use url::Url;

use solrelay::cache::{offline_page, Lifecycle, SqliteAssets};
use solrelay::config::Config;
use solrelay::delivery::{HttpBackend, ServiceOrder};
use solrelay::push::PushClient;
use solrelay::queue::{QueueStore, SqliteQueue};
use solrelay::relay::{Relay, RelayOutcome};
use solrelay::request::InterceptedRequest;
use solrelay::sync::{SyncScheduler, SyncTrigger, SYNC_TAG};

#[derive(Parser, Debug)]
#[command(name = "solrelay")]
#[command(about = "Offline-first relay for service order submissions")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/solrelay/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Submit a service order through the relay (queued if offline)
  Submit {
    #[arg(long)]
    cliente_id: String,
    #[arg(long)]
    tipo: String,
    #[arg(long)]
    descripcion: String,
    #[arg(long)]
    direccion: String,
    #[arg(long)]
    latitud: Option<f64>,
    #[arg(long)]
    longitud: Option<f64>,
    #[arg(long)]
    fecha_preferida: Option<String>,
  },
  /// Replay queued orders now, in submission order
  Drain,
  /// List queued orders
  Queue,
  /// Send a push notification to a device token
  Push {
    #[arg(long)]
    token: String,
    #[arg(long, default_value = "solrelay")]
    title: String,
    #[arg(long, default_value = "Tienes una nueva notificación")]
    body: String,
    /// Extra data entries as key=value, repeatable
    #[arg(long)]
    data: Vec<String>,
  },
}

/// Wired-up relay components for one invocation.
struct Runtime {
  relay: Relay<SqliteQueue, SqliteAssets, HttpBackend>,
  scheduler: SyncScheduler<SqliteQueue, HttpBackend>,
  queue: Arc<SqliteQueue>,
  trigger: Arc<SyncTrigger>,
  mutation_url: Url,
}

fn build_runtime(config: &Config, data_dir: &Path) -> Result<Runtime> {
  let origin: Url = config
    .backend
    .url
    .parse()
    .map_err(|e| eyre!("Invalid backend url {}: {}", config.backend.url, e))?;

  let queue = Arc::new(SqliteQueue::open(&data_dir.join("queue.db"))?);
  let assets = Arc::new(SqliteAssets::open(&data_dir.join("cache.db"))?);

  let lifecycle = Lifecycle::new(
    Arc::clone(&assets),
    origin.clone(),
    config.cache.version.clone(),
  );
  lifecycle.install(&[offline_page(config.cache.offline_path.as_str())])?;
  lifecycle.activate()?;

  let backend = Arc::new(HttpBackend::new(origin.clone(), &config.backend.mutation_path)?);
  let mutation_url = backend.mutation_url().clone();
  let trigger = Arc::new(SyncTrigger::new());

  let relay = Relay::new(
    Arc::clone(&queue),
    assets,
    lifecycle,
    Arc::clone(&backend),
    Arc::clone(&trigger),
    config.backend.mutation_path.clone(),
    config.cache.offline_path.clone(),
  );
  let scheduler = SyncScheduler::new(Arc::clone(&queue), backend, Arc::clone(&trigger));

  Ok(Runtime {
    relay,
    scheduler,
    queue,
    trigger,
    mutation_url,
  })
}

fn init_tracing(data_dir: &Path) -> tracing_appender::non_blocking::WorkerGuard {
  let file_appender = tracing_appender::rolling::daily(data_dir.join("logs"), "solrelay.log");
  let (writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  guard
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let data_dir = config.data_dir()?;
  let _log_guard = init_tracing(&data_dir);

  match args.command {
    Command::Submit {
      cliente_id,
      tipo,
      descripcion,
      direccion,
      latitud,
      longitud,
      fecha_preferida,
    } => {
      let runtime = build_runtime(&config, &data_dir)?;

      let order = ServiceOrder {
        cliente_id,
        tipo,
        descripcion,
        direccion,
        latitud,
        longitud,
        fecha_preferida,
        created_at: Some(chrono::Utc::now().to_rfc3339()),
      };
      let body = serde_json::to_vec(&order)
        .map_err(|e| eyre!("Failed to serialize order: {}", e))?;

      let request = InterceptedRequest::post(runtime.mutation_url.clone(), body);
      match runtime.relay.handle(&request).await? {
        RelayOutcome::Respond(response) => {
          println!("{} {}", response.status, String::from_utf8_lossy(&response.body));
        }
        RelayOutcome::Passthrough => {
          return Err(eyre!("Submit request was not intercepted; check mutation_path"));
        }
      }
    }

    Command::Drain => {
      let runtime = build_runtime(&config, &data_dir)?;

      // A manual drain behaves like a trigger firing
      runtime.trigger.register(SYNC_TAG);
      let report = runtime.scheduler.on_sync(SYNC_TAG).await?;

      println!(
        "attempted {}, delivered {}, remaining {}",
        report.attempted, report.delivered, report.remaining
      );
      if let Some(reason) = report.halted {
        println!("halted: {}", reason);
      }
    }

    Command::Queue => {
      let runtime = build_runtime(&config, &data_dir)?;

      let records = runtime.queue.list_all()?;
      if records.is_empty() {
        println!("queue is empty");
      }
      for record in records {
        println!(
          "{}  {}  {}",
          record.id,
          record.queued_at.format("%Y-%m-%d %H:%M:%S"),
          record.payload
        );
      }
    }

    Command::Push {
      token,
      title,
      body,
      data,
    } => {
      let push_config = config
        .push
        .as_ref()
        .ok_or_else(|| eyre!("No push section in config"))?;
      let client = PushClient::new(push_config)?;

      let mut entries = HashMap::new();
      for pair in data {
        let (key, value) = pair
          .split_once('=')
          .ok_or_else(|| eyre!("Invalid data entry '{}', expected key=value", pair))?;
        entries.insert(key.to_string(), value.to_string());
      }

      let response = client.send(&token, &title, &body, &entries).await?;
      println!("{}", response);
    }
  }

  Ok(())
}
