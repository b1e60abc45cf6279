//! Authorization decision engine
//!
//! # Decision Sequence
//!
//! ```text
//! is_allowed(action, pid, uid, target_uid)
//!   │
//!   ├─ uid == 0 ───────────────────────────► ALLOW  (no authority call)
//!   ├─ action == ACTION_ALWAYS_ALLOWED ────► ALLOW  (no authority call)
//!   │
//!   ├─ resolve id (self / other / base)
//!   ├─ read /proc/<pid>/stat ──── error ───► DENY   (process lookup)
//!   │
//!   └─ authority.check_authorization(id, pid, start_time, uid)
//!        ├─ Ok(true)  ─────────────────────► ALLOW
//!        ├─ Ok(false) ─────────────────────► DENY   (refused)
//!        └─ Err(_)    ─────────────────────► DENY   (authority error)
//! ```
//!
//! The process record is read on every check, after the bypass rules and
//! right before the authority call. It is never cached: a stale start time
//! would let a recycled pid inherit someone else's decision.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tonic::{Request, Status};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::action::{Action, ACTION_ALWAYS_ALLOWED};
use super::authority::{
    Authority, AuthorityError, AuthorizationRequest, PolkitAuthority, Subject,
};
use super::process::{ProcessError, ProcessRecord};
use crate::grpc::PeerCredsInfo;
use crate::metrics::{AUTHORITY_CALL_DURATION, AUTHZ_DECISIONS_TOTAL};

/// gRPC metadata key naming the user a call acts on
pub const ON_USER_METADATA_KEY: &str = "x-polgate-on-user";

/// Why a call was denied
///
/// Callers only need to know it was denied. The variants tell operators a
/// refusal apart from a broken authority or a vanished process.
#[derive(Debug, Error)]
pub enum DeniedError {
    #[error("permission denied: {0}")]
    ProcessLookup(#[from] ProcessError),

    #[error("permission denied: {0}")]
    Authority(#[from] AuthorityError),

    #[error("permission denied: authority refused {action_id}")]
    Refused { action_id: String },

    #[error("permission denied: {0}")]
    Caller(String),
}

impl DeniedError {
    /// Short label used in metrics
    fn reason(&self) -> &'static str {
        match self {
            DeniedError::ProcessLookup(_) => "process_lookup",
            DeniedError::Authority(_) => "authority_error",
            DeniedError::Refused { .. } => "refused",
            DeniedError::Caller(_) => "caller",
        }
    }
}

impl From<DeniedError> for Status {
    fn from(e: DeniedError) -> Self {
        Status::permission_denied(e.to_string())
    }
}

/// Authorizer configuration
#[derive(Debug, Clone)]
pub struct AuthorizerConfig {
    /// Filesystem root under which `proc/<pid>/stat` is read
    pub root: PathBuf,
    /// Let the authority prompt the user (password dialog, ...)
    pub allow_user_interaction: bool,
    /// Extra details forwarded with every request
    pub details: HashMap<String, String>,
}

impl Default for AuthorizerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
            allow_user_interaction: true,
            details: HashMap::new(),
        }
    }
}

impl AuthorizerConfig {
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_user_interaction(mut self, allow: bool) -> Self {
        self.allow_user_interaction = allow;
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Per-request authorization gate
///
/// Holds no per-call state: share it behind an `Arc` between connection
/// handlers.
///
/// # Example
///
/// ```ignore
/// let authorizer = Authorizer::with_polkit(AuthorizerConfig::default()).await?;
///
/// const SET_POLICY: Action =
///     Action::with_variants("org.example.set-policy", "org.example.set-policy.self", "org.example.set-policy.other");
///
/// authorizer.is_allowed(&SET_POLICY, peer.pid(), peer.uid(), Some(target_uid)).await?;
/// ```
pub struct Authorizer {
    authority: Arc<dyn Authority>,
    config: AuthorizerConfig,
}

impl Authorizer {
    pub fn new(authority: Arc<dyn Authority>, config: AuthorizerConfig) -> Self {
        Self { authority, config }
    }

    /// Authorizer backed by polkit on the system bus
    pub async fn with_polkit(config: AuthorizerConfig) -> Result<Self, AuthorityError> {
        let authority = PolkitAuthority::connect().await?;
        Ok(Self::new(Arc::new(authority), config))
    }

    pub fn config(&self) -> &AuthorizerConfig {
        &self.config
    }

    /// Decide whether process `pid`, running as `uid`, may perform `action`.
    ///
    /// `target_uid` is the user the action applies to, when it applies to one.
    /// Returns `Ok(())` when allowed.
    pub async fn is_allowed(
        &self,
        action: &Action,
        pid: i32,
        uid: u32,
        target_uid: Option<u32>,
    ) -> Result<(), DeniedError> {
        let check_id = Uuid::now_v7();

        if uid == 0 {
            debug!(%check_id, pid, action = %action, "Authorized as being administrator");
            AUTHZ_DECISIONS_TOTAL.with_label_values(&["allowed", "root"]).inc();
            return Ok(());
        }

        if *action == ACTION_ALWAYS_ALLOWED {
            debug!(%check_id, pid, uid, "Action is always allowed");
            AUTHZ_DECISIONS_TOTAL
                .with_label_values(&["allowed", "always_allowed"])
                .inc();
            return Ok(());
        }

        let result = self.check_with_authority(action, pid, uid, target_uid).await;

        match &result {
            Ok(()) => {
                info!(%check_id, pid, uid, action = %action, "Authorized");
                AUTHZ_DECISIONS_TOTAL
                    .with_label_values(&["allowed", "authority"])
                    .inc();
            }
            Err(e @ DeniedError::Refused { .. }) => {
                info!(%check_id, pid, uid, action = %action, error = %e, "Denied");
                AUTHZ_DECISIONS_TOTAL
                    .with_label_values(&["denied", e.reason()])
                    .inc();
            }
            Err(e) => {
                warn!(%check_id, pid, uid, action = %action, error = %e, "Denied without a decision");
                AUTHZ_DECISIONS_TOTAL
                    .with_label_values(&["denied", e.reason()])
                    .inc();
            }
        }

        result
    }

    async fn check_with_authority(
        &self,
        action: &Action,
        pid: i32,
        uid: u32,
        target_uid: Option<u32>,
    ) -> Result<(), DeniedError> {
        let action_id = action.resolve_id(uid, target_uid).to_string();

        let process = ProcessRecord::load(&self.config.root, pid).await?;

        let request = AuthorizationRequest {
            action_id,
            subject: Subject {
                pid: process.pid,
                start_time: process.start_time,
                uid,
            },
            details: self.config.details.clone(),
            allow_user_interaction: self.config.allow_user_interaction,
        };

        let start = Instant::now();
        let authorized = self.authority.check_authorization(&request).await;
        AUTHORITY_CALL_DURATION.observe(start.elapsed().as_secs_f64());

        if authorized? {
            Ok(())
        } else {
            Err(DeniedError::Refused {
                action_id: request.action_id,
            })
        }
    }

    /// Authorize a gRPC request using the identity its connection carries.
    ///
    /// For actions with self/other variants, the targeted user is read from
    /// the `x-polgate-on-user` metadata entry (a user name).
    pub async fn is_allowed_from_request<T>(
        &self,
        request: &Request<T>,
        action: &Action,
    ) -> Result<(), Status> {
        let (peer, target_uid) = match caller_identity(request, action).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(action = %action, error = %e, "Denied before reaching the authority");
                AUTHZ_DECISIONS_TOTAL
                    .with_label_values(&["denied", e.reason()])
                    .inc();
                return Err(e.into());
            }
        };

        self.is_allowed(action, peer.pid(), peer.uid(), target_uid)
            .await
            .map_err(Status::from)
    }
}

/// Connection identity of `request`, plus the user it acts on for actions
/// with self/other variants
async fn caller_identity<T>(
    request: &Request<T>,
    action: &Action,
) -> Result<(PeerCredsInfo, Option<u32>), DeniedError> {
    let peer = PeerCredsInfo::from_request(request)
        .copied()
        .ok_or_else(|| DeniedError::Caller("no peer credentials on connection".to_string()))?;

    if !action.has_variants() {
        return Ok((peer, None));
    }

    let target_uid = match request.metadata().get(ON_USER_METADATA_KEY) {
        Some(value) => {
            let name = value.to_str().map_err(|_| {
                DeniedError::Caller(format!("invalid {ON_USER_METADATA_KEY} value"))
            })?;
            Some(lookup_uid(name).await?)
        }
        None => None,
    };

    Ok((peer, target_uid))
}

/// Resolve a user name through the system user database
///
/// `getpwnam_r` may go through NSS to a directory service, so it runs on the
/// blocking pool.
async fn lookup_uid(name: &str) -> Result<u32, DeniedError> {
    let owned = name.to_string();
    let lookup = tokio::task::spawn_blocking(move || nix::unistd::User::from_name(&owned))
        .await
        .map_err(|e| DeniedError::Caller(format!("user lookup for {name:?} failed: {e}")))?;

    match lookup {
        Ok(Some(user)) => Ok(user.uid.as_raw()),
        Ok(None) => Err(DeniedError::Caller(format!("unknown user {name:?}"))),
        Err(e) => Err(DeniedError::Caller(format!(
            "could not look up user {name:?}: {e}"
        ))),
    }
}
