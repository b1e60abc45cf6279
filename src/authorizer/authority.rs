//! Authority client: the external service rendering the final decision
//!
//! The authorizer only knows the [`Authority`] capability. In production this
//! is polkit, reached over the D-Bus system bus:
//!
//! ```text
//! Authorizer ──CheckAuthorization──► org.freedesktop.PolicyKit1
//!                                         │
//!                                         ├─ policy lookup for action id
//!                                         ├─ may prompt the user (password)
//!                                         │
//! Authorizer ◄──(authorized, challenge)───┘
//! ```
//!
//! Tests substitute [`crate::authorizer::testing::MockAuthority`].

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;
use zbus::zvariant::Value;

/// polkit `CheckAuthorizationFlags::AllowUserInteraction`
const CHECK_ALLOW_USER_INTERACTION: u32 = 0x1;

/// polkit subject kind for a process bound to its start time
const SUBJECT_KIND_UNIX_PROCESS: &str = "unix-process";

/// Failure to obtain a decision from the authority
#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("authority call failed: {0}")]
    Bus(#[from] zbus::Error),

    #[error("authority unavailable: {0}")]
    Unavailable(String),
}

/// The process asking for authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subject {
    pub pid: i32,
    /// Kernel start time of `pid`, binding the subject to one process instance
    pub start_time: u64,
    pub uid: u32,
}

/// One question to the authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub action_id: String,
    pub subject: Subject,
    /// Authority specific context (e.g. `polkit.message`)
    pub details: HashMap<String, String>,
    /// Let the authority prompt the user for credentials
    pub allow_user_interaction: bool,
}

/// Capability to render an authorization decision
///
/// `Ok(false)` is a deliberate refusal, `Err` means no decision could be
/// obtained. Implementations must be usable concurrently.
#[tonic::async_trait]
pub trait Authority: Send + Sync {
    async fn check_authorization(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<bool, AuthorityError>;
}

#[zbus::proxy(
    interface = "org.freedesktop.PolicyKit1.Authority",
    default_service = "org.freedesktop.PolicyKit1",
    default_path = "/org/freedesktop/PolicyKit1/Authority"
)]
trait PolicyKitAuthority {
    /// Returns `(is_authorized, is_challenge, details)`
    fn check_authorization(
        &self,
        subject: &(&str, HashMap<&str, Value<'_>>),
        action_id: &str,
        details: &HashMap<&str, &str>,
        flags: u32,
        cancellation_id: &str,
    ) -> zbus::Result<(bool, bool, HashMap<String, String>)>;
}

/// polkit client on the system bus
#[derive(Clone)]
pub struct PolkitAuthority {
    proxy: PolicyKitAuthorityProxy<'static>,
}

impl PolkitAuthority {
    /// Connect to polkit on the system bus
    pub async fn connect() -> Result<Self, AuthorityError> {
        let connection = zbus::Connection::system().await?;
        Self::with_connection(&connection).await
    }

    /// Use an existing bus connection (e.g. a test bus)
    pub async fn with_connection(connection: &zbus::Connection) -> Result<Self, AuthorityError> {
        let proxy = PolicyKitAuthorityProxy::new(connection).await?;
        Ok(Self { proxy })
    }
}

#[tonic::async_trait]
impl Authority for PolkitAuthority {
    async fn check_authorization(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<bool, AuthorityError> {
        let subject = &request.subject;

        // polkit types: pid is u32, uid is i32
        let mut subject_details = HashMap::new();
        subject_details.insert("pid", Value::from(subject.pid as u32));
        subject_details.insert("start-time", Value::from(subject.start_time));
        subject_details.insert("uid", Value::from(subject.uid as i32));

        let details: HashMap<&str, &str> = request
            .details
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let flags = if request.allow_user_interaction {
            CHECK_ALLOW_USER_INTERACTION
        } else {
            0
        };

        let (is_authorized, is_challenge, _) = self
            .proxy
            .check_authorization(
                &(SUBJECT_KIND_UNIX_PROCESS, subject_details),
                &request.action_id,
                &details,
                flags,
                "",
            )
            .await?;

        if is_challenge {
            debug!(
                action = %request.action_id,
                pid = subject.pid,
                "polkit requires authentication the caller could not provide"
            );
        }

        Ok(is_authorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::net::UnixStream;
    use zbus::zvariant::OwnedValue;

    /// What the fake polkit service saw on the wire
    struct Received {
        subject_kind: String,
        subject: HashMap<String, OwnedValue>,
        action_id: String,
        details: HashMap<String, String>,
        flags: u32,
    }

    /// Answers every check with a fixed `(is_authorized, is_challenge)` reply
    struct FakePolkit {
        reply: (bool, bool),
        received: Arc<Mutex<Option<Received>>>,
    }

    #[zbus::interface(name = "org.freedesktop.PolicyKit1.Authority")]
    impl FakePolkit {
        async fn check_authorization(
            &self,
            subject: (String, HashMap<String, OwnedValue>),
            action_id: String,
            details: HashMap<String, String>,
            flags: u32,
            _cancellation_id: String,
        ) -> (bool, bool, HashMap<String, String>) {
            *self.received.lock().unwrap() = Some(Received {
                subject_kind: subject.0,
                subject: subject.1,
                action_id,
                details,
                flags,
            });
            (self.reply.0, self.reply.1, HashMap::new())
        }
    }

    /// Serve `FakePolkit` on one end of a socket pair and return a client on
    /// the other end. The service connection must outlive the client.
    async fn polkit_pair(
        reply: (bool, bool),
    ) -> (PolkitAuthority, zbus::Connection, Arc<Mutex<Option<Received>>>) {
        let received = Arc::new(Mutex::new(None));
        let service = FakePolkit {
            reply,
            received: Arc::clone(&received),
        };

        let (server_end, client_end) = UnixStream::pair().unwrap();
        let server = zbus::connection::Builder::unix_stream(server_end)
            .server(zbus::Guid::generate())
            .unwrap()
            .p2p()
            .serve_at("/org/freedesktop/PolicyKit1/Authority", service)
            .unwrap()
            .build();
        let client = zbus::connection::Builder::unix_stream(client_end)
            .p2p()
            .build();
        let (server, client) = tokio::try_join!(server, client).unwrap();

        let authority = PolkitAuthority::with_connection(&client).await.unwrap();
        (authority, server, received)
    }

    fn request(allow_user_interaction: bool) -> AuthorizationRequest {
        AuthorizationRequest {
            action_id: "org.example.set-policy".to_string(),
            subject: Subject {
                pid: 4242,
                start_time: 8263,
                uid: 1000,
            },
            details: HashMap::from([(
                "polkit.message".to_string(),
                "Authentication is required".to_string(),
            )]),
            allow_user_interaction,
        }
    }

    #[tokio::test]
    async fn test_subject_is_sent_with_polkit_types() {
        let (authority, _server, received) = polkit_pair((true, false)).await;

        assert!(authority.check_authorization(&request(true)).await.unwrap());

        let received = received.lock().unwrap().take().unwrap();
        assert_eq!(received.subject_kind, "unix-process");
        assert_eq!(received.action_id, "org.example.set-policy");
        assert_eq!(
            received.details.get("polkit.message").map(String::as_str),
            Some("Authentication is required")
        );
        assert_eq!(received.flags, CHECK_ALLOW_USER_INTERACTION);

        // pid travels as u32, start-time as u64, uid as i32
        let pid = &received.subject["pid"];
        assert_eq!(u32::try_from(pid).unwrap(), 4242);
        assert!(i32::try_from(pid).is_err());

        let start_time = &received.subject["start-time"];
        assert_eq!(u64::try_from(start_time).unwrap(), 8263);
        assert!(u32::try_from(start_time).is_err());

        let uid = &received.subject["uid"];
        assert_eq!(i32::try_from(uid).unwrap(), 1000);
        assert!(u32::try_from(uid).is_err());
    }

    #[tokio::test]
    async fn test_no_interaction_sends_zero_flags() {
        let (authority, _server, received) = polkit_pair((false, false)).await;

        assert!(!authority.check_authorization(&request(false)).await.unwrap());
        assert_eq!(received.lock().unwrap().as_ref().unwrap().flags, 0);
    }

    /// polkit answering "a challenge is possible" is not an authorization
    #[tokio::test]
    async fn test_challenge_reply_is_not_authorized() {
        let (authority, _server, _received) = polkit_pair((false, true)).await;

        let authorized = authority.check_authorization(&request(true)).await.unwrap();
        assert!(!authorized);
    }
}
