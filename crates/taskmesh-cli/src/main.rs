use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use taskmesh_broker::TaskBroker;
use taskmesh_core::MeshConfig;
use taskmesh_gateway::GatewayServer;
use taskmesh_registry::WorkerRegistry;
use taskmesh_store::{KvStore, MemoryStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taskmesh", about = "Taskmesh — worker fleet control plane")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "taskmesh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the control-plane server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[derive(Deserialize, Default)]
struct TaskmeshConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    mesh: MeshConfig,
}

#[derive(Deserialize)]
struct ServerConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    // A missing config file is fine; everything has a default and the
    // environment can override it.
    let mut config: TaskmeshConfig = match tokio::fs::read_to_string(&cli.config).await {
        Ok(raw) => toml::from_str(&raw)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %cli.config.display(), "No config file; using defaults");
            TaskmeshConfig::default()
        }
        Err(e) => {
            return Err(anyhow::anyhow!(
                "Failed to read config file '{}': {}",
                cli.config.display(),
                e
            ))
        }
    };
    config.mesh.apply_env_overrides();

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or(config.server.host);
            let port = port.unwrap_or(config.server.port);

            let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
            let registry = Arc::new(WorkerRegistry::new(
                store.clone(),
                config.mesh.worker_ttl(),
            ));
            let sweeper = registry.start_sweeper(config.mesh.sweep_interval());
            let broker = TaskBroker::new(registry.clone(), store, config.mesh.clone());

            let app = GatewayServer::build(registry, broker);
            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!(
                addr = %addr,
                worker_ttl_secs = config.mesh.worker_ttl_secs,
                "Taskmesh control plane listening"
            );

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            sweeper.stop().await;
            info!("Shutdown complete");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}
