//! seqrpc - ordered, concurrent RPC over one TCP stream per connection.
//!
//! A client may issue calls from any number of tasks over a single connection.
//! The server processes requests concurrently in a bounded worker pool, yet
//! writes every response in the order its request arrived, so the client can
//! match responses to callers by turn instead of by id.
//!
//! # Example
//!
//! ```rust,ignore
//! use seqrpc::{RpcClient, RpcServer, Service, ServiceRegistry, ServerConfig, Value};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> seqrpc::Result<()> {
//!     let registry = ServiceRegistry::builder()
//!         .register(Service::new("math").method("add", |a: i64, b: i64| a + b))
//!         .build();
//!
//!     let server = RpcServer::start(
//!         "127.0.0.1:0".parse().unwrap(),
//!         Arc::new(registry),
//!         ServerConfig::default(),
//!     )
//!     .await?;
//!
//!     let client = RpcClient::connect(server.addr()).await?;
//!     let sum = client.call("math", "add", vec![Value::Int(2), Value::Int(3)]).await?;
//!     assert_eq!(sum, Some(Value::Int(5)));
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod value;

// Re-export commonly used types
pub use client::RpcClient;
pub use config::{ServerConfig, ServerDefaults};
pub use error::{Result, RpcError};
pub use protocol::{Fault, FaultKind, Frame, Outcome, Request, Response};
pub use registry::{ServiceCatalog, Service, ServiceRegistry};
pub use server::{RpcServer, RpcServerHandle, WorkerPool};
pub use value::{Value, ValueKind};
