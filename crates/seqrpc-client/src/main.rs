//! seqrpc client - drives concurrent calls over one connection.
//!
//! Every caller sleeps remotely for a second and then asks for the time, so
//! the log shows many callers sharing a single connection.

use anyhow::{Context, Result};
use clap::Parser;
use seqrpc::{RpcClient, Value};
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "seqrpc-client")]
#[command(about = "Concurrent demo client for a seqrpc server")]
struct Args {
    /// Server host
    host: String,

    /// Server port
    port: u16,

    /// Number of concurrent callers
    thread_count: usize,

    /// Service name the clock implementation is registered under
    #[arg(long, default_value = "clock")]
    service: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

/// One caller's demonstration sequence: `sleep(1000)` then `now()`.
async fn run_caller(client: &RpcClient, service: &str, caller: usize) -> seqrpc::Result<()> {
    client
        .call(service, "sleep", vec![Value::Int(1000)])
        .await?;
    match client.call(service, "now", vec![]).await? {
        Some(now) => info!("Caller {}: current date is {}", caller, now),
        None => info!("Caller {}: server returned no date", caller),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .compact()
        .init();

    let client = RpcClient::connect_host(&args.host, args.port)
        .await
        .with_context(|| format!("connecting to {}:{}", args.host, args.port))?;
    let client = Arc::new(client);

    info!("Starting {} callers", args.thread_count);

    let callers = (0..args.thread_count).map(|caller| {
        let client = Arc::clone(&client);
        let service = args.service.clone();
        tokio::spawn(async move {
            if let Err(e) = run_caller(&client, &service, caller).await {
                error!("Caller {} failed: {}", caller, e);
            }
        })
    });
    for joined in futures::future::join_all(callers).await {
        if let Err(e) = joined {
            error!("Caller task ended abnormally: {}", e);
        }
    }

    client.close().await?;
    info!("All callers finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_positional() {
        let args = Args::try_parse_from(["seqrpc-client", "localhost", "4000", "8"]).unwrap();
        assert_eq!(args.host, "localhost");
        assert_eq!(args.port, 4000);
        assert_eq!(args.thread_count, 8);
        assert_eq!(args.service, "clock");
        assert!(!args.debug);
    }

    #[test]
    fn test_args_require_thread_count() {
        assert!(Args::try_parse_from(["seqrpc-client", "localhost", "4000"]).is_err());
        assert!(Args::try_parse_from(["seqrpc-client", "localhost", "port", "8"]).is_err());
    }
}
