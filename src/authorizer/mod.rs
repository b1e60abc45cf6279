//! Per-request authorization for callers of the daemon
//!
//! This module provides:
//! - `Action` declarations, with self/other variants for user-targeted actions
//! - Process start-time lookup, binding a decision to one process instance
//! - The `Authority` capability and its polkit implementation
//! - The `Authorizer` decision engine
//!
//! # Example Usage
//!
//! ```ignore
//! use polgate::authorizer::{Action, Authorizer, AuthorizerConfig};
//!
//! const UPDATE: Action = Action::new("org.example.update");
//!
//! let authorizer = Authorizer::with_polkit(AuthorizerConfig::default()).await?;
//!
//! // Inside a tonic handler, on a server fed by `with_unix_peer_creds`
//! authorizer.is_allowed_from_request(&request, &UPDATE).await?;
//! ```

pub mod action;
pub mod authority;
pub mod engine;
pub mod process;
pub mod testing;

pub use action::{Action, ACTION_ALWAYS_ALLOWED, ALWAYS_ALLOWED_ID};
pub use authority::{
    Authority, AuthorityError, AuthorizationRequest, PolkitAuthority, Subject,
};
pub use engine::{Authorizer, AuthorizerConfig, DeniedError, ON_USER_METADATA_KEY};
pub use process::{ProcessError, ProcessRecord, StatParseError};
