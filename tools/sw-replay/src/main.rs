//! Replay host events against the Trackside offline worker.
//!
//! Drives a real worker (real HTTP transport, in-memory notification center
//! and window list) from a script of JSON host events and prints one JSON
//! result per event on stdout. Logs go to stderr.
//!
//! ## Usage
//!
//! ```bash
//! # Replay a script against a configuration
//! sw-replay run --config worker.json events.jsonl
//!
//! # Read the script from stdin
//! cat events.jsonl | sw-replay run
//!
//! # Validate a configuration and print it with defaults filled in
//! sw-replay check-config worker.json
//!
//! # Show how a URL would be routed
//! sw-replay classify /metas --navigate
//! ```

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use trackside_common::{init_logging, now_millis, LogConfig, LogFormat};
use trackside_net::loader::ResourceLoader;
use trackside_sw::notification::NotificationFormatter;
use trackside_sw::{
    Client, Clients, FetchDisposition, HostAdapter, HostHandle, HostServices, NotificationCenter,
    NotificationClick, RouteClassifier, ServiceWorker, WorkerConfig,
};

mod events;

use events::{build_request, parse_events, push_bytes, ReplayEvent};

#[derive(Parser)]
#[command(name = "sw-replay")]
#[command(about = "Replay host events against the Trackside offline worker")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Log format: pretty, compact or json
    #[arg(long, default_value = "compact", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a script of host events
    Run {
        /// Worker configuration (JSON); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Event script, one JSON event per line; stdin when omitted
        script: Option<PathBuf>,
    },

    /// Validate a configuration file
    CheckConfig {
        config: PathBuf,
    },

    /// Print the route class of a URL
    Classify {
        url: String,
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long, default_value = "GET")]
        method: String,
        /// Treat the request as a top-level navigation
        #[arg(long)]
        navigate: bool,
    },
}

fn load_config(path: Option<&Path>) -> Result<WorkerConfig> {
    match path {
        Some(path) => Ok(WorkerConfig::load(path)?),
        None => Ok(WorkerConfig::default()),
    }
}

fn read_script(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut script = String::new();
            std::io::stdin().read_to_string(&mut script)?;
            Ok(script)
        }
    }
}

fn emit(line: Option<usize>, event: &str, result: Value) {
    println!("{}", json!({ "line": line, "event": event, "result": result }));
}

fn fetch_result(disposition: FetchDisposition) -> Value {
    match disposition {
        FetchDisposition::Passthrough => json!({ "disposition": "passthrough" }),
        FetchDisposition::Respond(response) => json!({
            "disposition": "respond",
            "status": response.status.as_u16(),
            "from_cache": response.from_cache,
            "response_type": format!("{:?}", response.response_type),
            "content_type": response.content_type().map(|m| m.to_string()),
            "bytes": response.body().len(),
        }),
    }
}

struct Replay {
    handle: HostHandle,
    clients: Arc<Clients>,
    formatter: NotificationFormatter,
    origin: url::Url,
}

impl Replay {
    async fn apply(&self, event: ReplayEvent) -> Result<Value> {
        let result = match event {
            ReplayEvent::Install => match self.handle.install().await {
                Ok(count) => json!({ "precached": count }),
                Err(e) => json!({ "error": e.to_string() }),
            },
            ReplayEvent::Activate => match self.handle.activate().await {
                Ok(deleted) => json!({ "deleted": deleted }),
                Err(e) => json!({ "error": e.to_string() }),
            },
            ReplayEvent::Fetch {
                url,
                method,
                navigate,
            } => {
                let request = build_request(&self.origin, &url, method.as_deref(), navigate)?;
                fetch_result(self.handle.fetch(request).await?)
            }
            ReplayEvent::Sync { tag } => serde_json::to_value(self.handle.sync(&tag).await?)?,
            ReplayEvent::Push { payload } => {
                let shown = self.handle.push(push_bytes(payload.as_ref())?).await?;
                serde_json::to_value(shown)?
            }
            ReplayEvent::Click {
                action,
                notification,
            } => {
                let click = NotificationClick {
                    action,
                    notification: self.formatter.from_input(notification, now_millis()),
                };
                serde_json::to_value(self.handle.notification_click(click).await?)?
            }
            ReplayEvent::Message { message } => {
                serde_json::to_value(self.handle.message(message).await?)?
            }
            ReplayEvent::OpenWindow { id, url } => {
                let url = self.origin.join(&url)?;
                self.clients.add(Client::window(&id, url, false)).await;
                json!({ "windows": self.clients.all().await })
            }
            ReplayEvent::Wait { ms } => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                json!({ "waited_ms": ms })
            }
        };
        Ok(result)
    }
}

async fn run(config: WorkerConfig, script: &str) -> Result<()> {
    let events = parse_events(script)?;

    let fetcher = Arc::new(ResourceLoader::new(config.loader_config())?);
    let notifier = Arc::new(NotificationCenter::new());
    let clients = Arc::new(Clients::new());
    let formatter = NotificationFormatter::new(config.notifications.clone());
    let origin = config.origin.clone();

    let services = HostServices {
        fetcher,
        notifier: notifier.clone(),
        clients: clients.clone(),
    };
    let (worker, signals) = ServiceWorker::new(config, services)?;
    let (observer, mut observed) = mpsc::unbounded_channel();
    let (handle, task) = HostAdapter::new(worker, signals)
        .with_observer(observer)
        .spawn();

    let printer = tokio::spawn(async move {
        while let Some(signal) = observed.recv().await {
            emit(None, "signal", serde_json::to_value(signal).unwrap_or(Value::Null));
        }
    });

    let replay = Replay {
        handle: handle.clone(),
        clients,
        formatter,
        origin,
    };
    for (line, event) in events {
        let name = event.name();
        let result = replay.apply(event).await?;
        emit(Some(line), name, result);
    }

    handle.shutdown()?;
    task.await?;
    printer.await?;

    emit(None, "notifications", json!({ "visible": notifier.visible().await }));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogConfig::from_verbosity(cli.verbose).with_format(cli.log_format))?;

    match cli.command {
        Commands::Run { config, script } => {
            let config = load_config(config.as_deref())?;
            let script = read_script(script.as_deref())?;
            run(config, &script).await?;
        }

        Commands::CheckConfig { config } => {
            let config = WorkerConfig::load(&config)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Commands::Classify {
            url,
            config,
            method,
            navigate,
        } => {
            let config = load_config(config.as_deref())?;
            let request = build_request(&config.origin, &url, Some(&method), navigate)?;
            let class = RouteClassifier::from_config(&config).classify(&request);
            println!("{class:?}");
        }
    }

    Ok(())
}
