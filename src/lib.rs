//! polgate - authorization gate for privileged daemons served over Unix sockets
//!
//! Callers reach the daemon through gRPC on a Unix domain socket. Every call is
//! authorized against the caller's kernel-reported identity, bound to the exact
//! process instance, and decided by polkit.
//!
//! # Modules
//!
//! - `grpc` - peer credential extraction for tonic servers
//! - `authorizer` - actions, process validation, authority client, decisions
//! - `metrics` - Prometheus metrics for observability
//! - `tracing` - logging and OpenTelemetry setup
//!
//! # Quick Start
//!
//! ```ignore
//! use polgate::{with_unix_peer_creds, Authorizer, AuthorizerConfig};
//!
//! let authorizer = Arc::new(Authorizer::with_polkit(AuthorizerConfig::default()).await?);
//!
//! let listener = tokio::net::UnixListener::bind("/run/mydaemon.sock")?;
//! Server::builder()
//!     .add_service(MyServiceServer::new(MyService { authorizer }))
//!     .serve_with_incoming(with_unix_peer_creds(listener))
//!     .await?;
//! ```

pub mod authorizer;
pub mod grpc;
pub mod metrics;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use authorizer::{Action, Authorizer, AuthorizerConfig, DeniedError, ACTION_ALWAYS_ALLOWED};
pub use grpc::{with_unix_peer_creds, PeerCredsInfo};
