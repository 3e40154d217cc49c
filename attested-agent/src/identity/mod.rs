//! Agent identity: the platform credential, its birth certificate and the
//! registration lifecycle.

pub mod certificate;
pub mod seal;

pub use certificate::{BirthCertificate, CERTIFICATE_VERSION};
pub use seal::{SealError, SealingKey};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{AgentError, Result};

/// Platform API credential.
///
/// Generated inside the TEE at registration and never shown to an operator.
/// The type deliberately has no `Display` or `Serialize` impl; `Debug` is
/// redacted and the backing memory is zeroed on drop. Use [`Credential::expose`]
/// only to build an auth header or to persist it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// One-way SHA-256 digest, safe to publish
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Registration lifecycle of the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Booting,
    Unregistered,
    Registering,
    Registered,
    Verified,
    Error,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Booting => "booting",
            LifecycleState::Unregistered => "unregistered",
            LifecycleState::Registering => "registering",
            LifecycleState::Registered => "registered",
            LifecycleState::Verified => "verified",
            LifecycleState::Error => "error",
        }
    }

    /// Whether `next` is a legal successor. Verified never regresses.
    pub fn can_advance_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Booting, Unregistered)
                | (Booting, Registered)
                | (Booting, Verified)
                | (Booting, Error)
                | (Unregistered, Registering)
                | (Unregistered, Error)
                | (Registering, Registered)
                | (Registering, Error)
                | (Registered, Verified)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current lifecycle state plus what an operator needs to see about it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lifecycle {
    pub state: LifecycleState,
    /// URL a human uses to claim (verify) the agent
    pub claim_url: Option<String>,
    pub verification_code: Option<String>,
    /// Failure reason when `state` is `Error`
    pub error: Option<String>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: LifecycleState::Booting,
            claim_url: None,
            verification_code: None,
            error: None,
        }
    }
}

impl Lifecycle {
    pub fn advance(&mut self, next: LifecycleState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(AgentError::Transition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        if next == LifecycleState::Verified {
            self.claim_url = None;
            self.verification_code = None;
        }
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.advance(LifecycleState::Error)?;
        self.error = Some(message.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_redacted() {
        let credential = Credential::new("tok_abc");
        let debug = format!("{:?}", credential);
        assert!(!debug.contains("tok_abc"));
        assert_eq!(credential.expose(), "tok_abc");
    }

    #[test]
    fn test_credential_fingerprint() {
        // sha256("tok_abc")
        let fingerprint = Credential::new("tok_abc").fingerprint();
        assert_eq!(fingerprint.len(), 64);
        assert_eq!(fingerprint, Credential::new("tok_abc").fingerprint());
        assert_ne!(fingerprint, Credential::new("tok_abd").fingerprint());
    }

    #[test]
    fn test_registration_path() {
        let mut lifecycle = Lifecycle::default();
        lifecycle.advance(LifecycleState::Unregistered).unwrap();
        lifecycle.advance(LifecycleState::Registering).unwrap();
        lifecycle.advance(LifecycleState::Registered).unwrap();
        lifecycle.claim_url = Some("https://claim/xyz".into());
        lifecycle.advance(LifecycleState::Verified).unwrap();

        assert_eq!(lifecycle.state, LifecycleState::Verified);
        assert!(lifecycle.claim_url.is_none());
    }

    #[test]
    fn test_verified_never_regresses() {
        let mut lifecycle = Lifecycle::default();
        lifecycle.advance(LifecycleState::Verified).unwrap();
        for next in [
            LifecycleState::Registered,
            LifecycleState::Registering,
            LifecycleState::Error,
            LifecycleState::Booting,
        ] {
            assert!(lifecycle.advance(next).is_err());
        }
        assert_eq!(lifecycle.state, LifecycleState::Verified);
    }

    #[test]
    fn test_fail_records_message() {
        let mut lifecycle = Lifecycle::default();
        lifecycle.advance(LifecycleState::Unregistered).unwrap();
        lifecycle.advance(LifecycleState::Registering).unwrap();
        lifecycle.fail("name taken").unwrap();
        assert_eq!(lifecycle.state, LifecycleState::Error);
        assert_eq!(lifecycle.error.as_deref(), Some("name taken"));
    }

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&LifecycleState::Registered).unwrap(),
            "\"registered\""
        );
    }
}
