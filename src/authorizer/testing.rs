//! Test double for the authority capability

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::authority::{Authority, AuthorityError, AuthorizationRequest};

/// Authority answering with a fixed decision, or a fixed failure
///
/// Records the last request so tests can assert on the action id the
/// authorizer resolved.
#[derive(Debug, Default)]
pub struct MockAuthority {
    authorized: bool,
    fail: bool,
    last_request: Mutex<Option<AuthorizationRequest>>,
    calls: AtomicUsize,
}

impl MockAuthority {
    /// Authority granting every request
    pub fn granting() -> Self {
        Self {
            authorized: true,
            ..Self::default()
        }
    }

    /// Authority refusing every request
    pub fn refusing() -> Self {
        Self::default()
    }

    /// Authority whose every call fails, as if the bus were unreachable
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn new(authorized: bool) -> Self {
        Self {
            authorized,
            ..Self::default()
        }
    }

    /// Action id of the last request received
    pub fn last_action_id(&self) -> Option<String> {
        self.last_request().map(|r| r.action_id)
    }

    pub fn last_request(&self) -> Option<AuthorizationRequest> {
        self.last_request
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of times the authority was asked
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[tonic::async_trait]
impl Authority for MockAuthority {
    async fn check_authorization(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<bool, AuthorityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .last_request
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(request.clone());

        if self.fail {
            return Err(AuthorityError::Unavailable(
                "mock authority configured to fail".to_string(),
            ));
        }

        Ok(self.authorized)
    }
}
