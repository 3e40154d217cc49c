//! Agent identity and lifecycle.
//!
//! Boot runs once per process:
//!
//! ```text
//! BOOTING ─┬─ credential stored ──► REGISTERED | VERIFIED (stored flag)
//!          └─ none ──► UNREGISTERED ──► REGISTERING ─┬─ ok ──► REGISTERED
//!                                                    └─ err ─► ERROR
//! ```
//!
//! The only in-process advance afterwards is `REGISTERED → VERIFIED`, driven
//! by [`Agent::check_verification`].

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::attestation::{AttestationProvider, AttestationSnapshot};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::identity::seal::{self, SealingKey};
use crate::identity::{BirthCertificate, Credential, Lifecycle, LifecycleState};
use crate::memory::{keys, ActivityStats, MemoryStore, SubscriptionSource};
use crate::platform::{PlatformClient, PlatformConnector, Registration};

/// Point-in-time view for monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStats {
    pub name: String,
    pub state: LifecycleState,
    pub paused: bool,
    pub activity: ActivityStats,
    pub seen_items: u64,
    pub subscriptions: usize,
    pub last_heartbeat: Option<String>,
}

pub struct Agent {
    name: String,
    description: String,
    seed_channels: Vec<String>,
    memory: Arc<MemoryStore>,
    connector: Arc<dyn PlatformConnector>,
    attestation: Arc<dyn AttestationProvider>,
    seal_key: Option<SealingKey>,
    attestation_timeout: Duration,
    lifecycle: RwLock<Lifecycle>,
    platform: RwLock<Option<Arc<dyn PlatformClient>>>,
    paused: AtomicBool,
}

impl Agent {
    pub fn new(
        config: &AgentConfig,
        memory: Arc<MemoryStore>,
        connector: Arc<dyn PlatformConnector>,
        attestation: Arc<dyn AttestationProvider>,
    ) -> Result<Self> {
        Ok(Self {
            name: config.agent_name.clone(),
            description: config.agent_description.clone(),
            seed_channels: config.heartbeat.seed_channels.clone(),
            memory,
            connector,
            attestation,
            seal_key: config.sealing_key()?,
            // enclave and inference fetches each make a few sequential requests
            attestation_timeout: Duration::from_secs(config.attestation.timeout_secs * 4),
            lifecycle: RwLock::new(Lifecycle::default()),
            platform: RwLock::new(None),
            paused: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    /// Run the boot state machine. Registration failure leaves the agent in
    /// `Error` and is not returned; storage failures are.
    pub async fn boot(&self) -> Result<LifecycleState> {
        self.seed_subscriptions()?;

        match self.load_credential()? {
            Some(credential) => self.resume(&credential).await?,
            None => {
                self.lifecycle
                    .write()
                    .await
                    .advance(LifecycleState::Unregistered)?;
                info!(agent = %self.name, "No stored credential, registering");
                if let Err(e) = self.mint(&self.name, &self.description).await {
                    error!(agent = %self.name, error = %e, "Registration failed");
                }
            }
        }

        Ok(self.state().await)
    }

    /// Rehydrate from a stored credential
    async fn resume(&self, credential: &Credential) -> Result<()> {
        let client = self.connector.connect(credential)?;
        *self.platform.write().await = Some(client);

        let verified = self.memory.get_config::<bool>(keys::VERIFIED)?.unwrap_or(false);
        let mut lifecycle = self.lifecycle.write().await;
        if verified {
            lifecycle.advance(LifecycleState::Verified)?;
        } else {
            lifecycle.claim_url = self.memory.get_config(keys::CLAIM_URL)?;
            lifecycle.verification_code = self.memory.get_config(keys::VERIFICATION_CODE)?;
            lifecycle.advance(LifecycleState::Registered)?;
        }

        info!(
            agent = %self.name,
            state = %lifecycle.state,
            credential = %short_fingerprint(credential),
            "Restored identity from memory"
        );
        Ok(())
    }

    /// Register with the platform and issue the birth certificate.
    ///
    /// The credential is persisted before any other side effect. The
    /// attestation snapshot is taken after registration so the certificate
    /// describes the environment that produced the credential; if collection
    /// stalls the certificate is still issued with empty measurements.
    pub async fn mint(&self, name: &str, description: &str) -> Result<Registration> {
        self.lifecycle
            .write()
            .await
            .advance(LifecycleState::Registering)?;

        let registration = match self.connector.register(name, description).await {
            Ok(registration) => registration,
            Err(e) => return Err(self.fail_registration(e.to_string()).await),
        };
        if registration.credential.is_empty() {
            return Err(self.fail_registration("platform returned an empty credential").await);
        }

        if let Err(e) = self.persist_registration(&registration) {
            return Err(self.fail_registration(e.to_string()).await);
        }

        match self.connector.connect(&registration.credential) {
            Ok(client) => *self.platform.write().await = Some(client),
            Err(e) => return Err(self.fail_registration(e.to_string()).await),
        }

        let snapshot = match tokio::time::timeout(
            self.attestation_timeout,
            self.attestation.collect(),
        )
        .await
        {
            Ok(bundle) => bundle.snapshot(),
            Err(_) => {
                warn!("Attestation timed out during mint, certifying without measurements");
                AttestationSnapshot::unavailable()
            }
        };

        let certificate = BirthCertificate::issue(name, &registration.credential, snapshot);
        match self
            .memory
            .set_config_once(keys::BIRTH_CERTIFICATE, &certificate)
        {
            Ok(true) => info!(
                digest = %certificate.digest,
                quality = certificate.attestation.quality.as_str(),
                "Birth certificate issued"
            ),
            Ok(false) => warn!("Birth certificate already present, keeping the original"),
            Err(e) => error!(error = %e, "Failed to store birth certificate"),
        }

        let mut lifecycle = self.lifecycle.write().await;
        lifecycle.advance(LifecycleState::Registered)?;
        lifecycle.claim_url = registration.claim_url.clone();
        lifecycle.verification_code = registration.verification_code.clone();
        info!(
            agent = %name,
            credential = %short_fingerprint(&registration.credential),
            claim_url = registration.claim_url.as_deref().unwrap_or("-"),
            "Registered, awaiting human claim"
        );

        Ok(registration)
    }

    fn persist_registration(&self, registration: &Registration) -> Result<()> {
        let stored = match &self.seal_key {
            Some(key) => seal::seal(&registration.credential, key)?,
            None => registration.credential.expose().to_string(),
        };
        if !self.memory.set_config_once(keys::CREDENTIAL, &stored)? {
            return Err(AgentError::Registration(
                "a credential is already stored".into(),
            ));
        }

        if let Some(url) = &registration.claim_url {
            self.memory.set_config(keys::CLAIM_URL, url)?;
        }
        if let Some(code) = &registration.verification_code {
            self.memory.set_config(keys::VERIFICATION_CODE, code)?;
        }
        self.memory.set_config(keys::VERIFIED, &false)?;
        self.memory
            .set_config(keys::REGISTERED_AT, &crate::memory::now())?;
        Ok(())
    }

    async fn fail_registration(&self, message: impl Into<String>) -> AgentError {
        let message = message.into();
        if let Err(e) = self.memory.set_config(keys::REGISTRATION_ERROR, &message) {
            warn!(error = %e, "Could not store registration error");
        }
        if let Err(e) = self.lifecycle.write().await.fail(message.clone()) {
            warn!(error = %e, "Could not enter error state");
        }
        AgentError::Registration(message)
    }

    /// Ask the platform whether a human has claimed the agent.
    ///
    /// Tries the profile endpoint, then the status endpoint. A positive
    /// answer is persisted before the state flips; nothing ever moves the
    /// agent back out of `Verified`.
    pub async fn check_verification(&self) -> Result<bool> {
        match self.state().await {
            LifecycleState::Verified => return Ok(true),
            LifecycleState::Registered => {}
            _ => return Ok(false),
        }
        let Some(platform) = self.platform().await else {
            return Ok(false);
        };

        let claimed = match platform.get_me().await {
            Ok(profile) if profile.claimed => true,
            primary => {
                if let Err(e) = &primary {
                    debug!(error = %e, "Profile check failed, trying status endpoint");
                }
                match platform.get_status().await {
                    Ok(status) => status.is_claimed(),
                    Err(e) => {
                        debug!(error = %e, "Status check failed");
                        false
                    }
                }
            }
        };
        if !claimed {
            return Ok(false);
        }

        self.memory.set_config(keys::VERIFIED, &true)?;
        let mut lifecycle = self.lifecycle.write().await;
        if lifecycle.state != LifecycleState::Verified {
            lifecycle.advance(LifecycleState::Verified)?;
            info!(agent = %self.name, "Agent verified by its human");
        }
        Ok(true)
    }

    fn load_credential(&self) -> Result<Option<Credential>> {
        match self.memory.get_config::<String>(keys::CREDENTIAL)? {
            Some(stored) => Ok(Some(seal::unseal(&stored, self.seal_key.as_ref())?)),
            None => Ok(None),
        }
    }

    fn seed_subscriptions(&self) -> Result<()> {
        if !self.memory.subscriptions()?.is_empty() {
            return Ok(());
        }
        for channel in &self.seed_channels {
            self.memory
                .subscribe(channel, None, None, SubscriptionSource::Seed)?;
        }
        debug!(count = self.seed_channels.len(), "Seeded subscriptions");
        Ok(())
    }

    pub async fn state(&self) -> LifecycleState {
        self.lifecycle.read().await.state
    }

    pub async fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.read().await.clone()
    }

    /// Authenticated platform client, once a credential exists
    pub async fn platform(&self) -> Option<Arc<dyn PlatformClient>> {
        self.platform.read().await.clone()
    }

    pub fn birth_certificate(&self) -> Result<Option<BirthCertificate>> {
        Ok(self.memory.get_config(keys::BIRTH_CERTIFICATE)?)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!(agent = %self.name, "Paused");
    }

    pub fn resume_activity(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!(agent = %self.name, "Resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub async fn stats(&self) -> Result<AgentStats> {
        Ok(AgentStats {
            name: self.name.clone(),
            state: self.state().await,
            paused: self.is_paused(),
            activity: self.memory.activity_stats()?,
            seen_items: self.memory.seen_count()?,
            subscriptions: self.memory.subscriptions()?.len(),
            last_heartbeat: self.memory.get_config(keys::LAST_HEARTBEAT)?,
        })
    }
}

/// Enough of the credential digest to correlate log lines
fn short_fingerprint(credential: &Credential) -> String {
    credential.fingerprint().chars().take(12).collect()
}
