//! seqrpc server - serves the demo services over the ordered RPC protocol.

mod services;

use anyhow::Result;
use clap::Parser;
use seqrpc::{RpcServer, ServerConfig, ServerDefaults, ServiceRegistry};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "seqrpc-server")]
#[command(about = "Ordered RPC server")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Registry configuration: JSON object of service name to implementation
    #[arg(long, default_value = ServerDefaults::SERVICES_FILE)]
    services: PathBuf,

    /// Worker count (defaults to available parallelism)
    #[arg(long)]
    workers: Option<usize>,

    /// Jobs that may wait for a worker before readers are held back
    #[arg(long, default_value_t = ServerDefaults::BACKLOG)]
    backlog: usize,

    /// Requests per connection read but not yet answered before reading pauses
    #[arg(long, default_value_t = ServerDefaults::MAX_IN_FLIGHT)]
    max_in_flight: usize,

    /// Processing deadline per request, in milliseconds
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        let mut config = ServerConfig::default()
            .with_backlog(self.backlog)
            .with_max_in_flight(self.max_in_flight)
            .with_request_deadline(self.deadline_ms.map(Duration::from_millis));
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting seqrpc server");

    let registry = ServiceRegistry::from_config(&args.services, &services::catalog());
    info!("Serving: {}", registry.names().join(", "));

    let addr = SocketAddr::new(args.host, args.port);
    let mut server = match RpcServer::start(addr, Arc::new(registry), args.server_config()).await {
        Ok(server) => server,
        Err(e) => {
            error!("Unable to listen on {}: {}", addr, e);
            return Ok(ExitCode::FAILURE);
        }
    };

    // Port announcement for whoever spawned us (intentional stdout)
    println!("RPC_PORT={}", server.port);

    info!("RPC server running on {}", server.addr());

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    info!("Closing {} active connections", server.active_connections());
    server.shutdown();

    Ok(ExitCode::SUCCESS)
}
