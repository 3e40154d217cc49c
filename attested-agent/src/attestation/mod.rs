//! Attestation collection.
//!
//! Two independent sources are measured concurrently:
//!
//! - **Enclave**: the TEE this agent runs in, via its loopback attestation service
//! - **Inference**: the confidential LLM service the agent thinks with
//!
//! Each fetch yields a [`FetchOutcome`]. The outcomes are combined into an
//! [`AttestationBundle`] carrying a quality grade and a hash binding over both
//! measurement sets. Collection never fails; unreachable sources become
//! `null` measurements and lower the grade.

pub mod binding;
pub mod enclave;
pub mod inference;
pub mod quote;

pub use binding::{canonical_json, sha256_hex, AttestationBinding};
pub use enclave::EnclaveSource;
pub use inference::InferenceSource;
pub use quote::QuoteRegisters;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{AttestationConfig, LlmConfig};
use crate::error::{AgentError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementSource {
    Enclave,
    Inference,
}

/// How strong the evidence behind a measurement is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofLevel {
    /// A TDX quote was retrieved
    Full,
    /// Only the TLS certificate fingerprint could be observed
    Partial,
}

/// One measurement set.
///
/// Optional fields always serialize (as `null`) so the canonical form used by
/// the binding digest does not depend on which fields happened to be present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
    pub source: MeasurementSource,
    pub proof: ProofLevel,
    pub endpoint: String,
    pub tee_type: String,
    pub registers: QuoteRegisters,
    pub raw_quote: Option<String>,
    pub tls_fingerprint: Option<String>,
    pub container_hash: Option<String>,
    pub model: Option<String>,
    pub captured_at: String,
}

impl Measurement {
    pub fn new(source: MeasurementSource, proof: ProofLevel, endpoint: impl Into<String>) -> Self {
        Self {
            source,
            proof,
            endpoint: endpoint.into(),
            tee_type: "intel-tdx".to_string(),
            registers: QuoteRegisters::default(),
            raw_quote: None,
            tls_fingerprint: None,
            container_hash: None,
            model: None,
            captured_at: binding::now_rfc3339(),
        }
    }
}

/// Result of fetching one source
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Verified(Measurement),
    Partial(Measurement),
    Failed(String),
}

impl FetchOutcome {
    pub fn measurement(&self) -> Option<&Measurement> {
        match self {
            FetchOutcome::Verified(m) | FetchOutcome::Partial(m) => Some(m),
            FetchOutcome::Failed(_) => None,
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, FetchOutcome::Verified(_))
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, FetchOutcome::Partial(_))
    }

    fn into_measurement(self) -> Option<Measurement> {
        match self {
            FetchOutcome::Verified(m) | FetchOutcome::Partial(m) => Some(m),
            FetchOutcome::Failed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    None,
    Low,
    Medium,
    High,
}

impl Quality {
    /// | enclave | inference | quality |
    /// |---------|-----------|---------|
    /// | full    | full      | high    |
    /// | full    | partial   | medium  |
    /// | full    | none      | low     |
    /// | none    | full      | low     |
    /// | none    | partial   | none    |
    /// | none    | none      | none    |
    pub fn grade(enclave_verified: bool, inference_verified: bool, inference_partial: bool) -> Self {
        match (enclave_verified, inference_verified, inference_partial) {
            (true, true, _) => Quality::High,
            (true, false, true) => Quality::Medium,
            (true, false, false) | (false, true, _) => Quality::Low,
            (false, false, _) => Quality::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::None => "none",
            Quality::Low => "low",
            Quality::Medium => "medium",
            Quality::High => "high",
        }
    }
}

/// Human-readable verdict for operators and UIs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationSummary {
    pub agent_code: String,
    pub llm_inference: String,
    pub end_to_end_privacy: String,
    pub explanation: String,
}

impl AttestationSummary {
    fn describe(enclave: &FetchOutcome, inference: &FetchOutcome) -> Self {
        let agent_code = if enclave.is_verified() { "verified" } else { "unverified" };
        let llm_inference = match inference {
            FetchOutcome::Verified(_) => "verified",
            FetchOutcome::Partial(_) => "tls-only",
            FetchOutcome::Failed(_) => "unverified",
        };
        let (privacy, explanation) = match (enclave.is_verified(), inference.is_verified()) {
            (true, true) => (
                "guaranteed",
                "Agent code and LLM inference both run in attested TEEs. No party can see the credential or the prompts.",
            ),
            (true, false) => (
                "partial",
                "Agent code runs in an attested TEE. Inference attestation could not be fully verified.",
            ),
            (false, true) => (
                "partial",
                "LLM inference is attested but the agent enclave could not be verified.",
            ),
            (false, false) => (
                "unverified",
                "Neither the agent enclave nor the inference service could be attested.",
            ),
        };
        Self {
            agent_code: agent_code.to_string(),
            llm_inference: llm_inference.to_string(),
            end_to_end_privacy: privacy.to_string(),
            explanation: explanation.to_string(),
        }
    }
}

/// The part of a bundle that is hashed into a birth certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationSnapshot {
    pub enclave: Option<Measurement>,
    pub inference: Option<Measurement>,
    pub verified: bool,
    pub quality: Quality,
    pub binding: AttestationBinding,
}

impl AttestationSnapshot {
    /// Snapshot recorded when collection could not complete at all
    pub fn unavailable() -> Self {
        Self {
            enclave: None,
            inference: None,
            verified: false,
            quality: Quality::None,
            binding: AttestationBinding::create(None, None),
        }
    }

    pub fn verify_binding(&self) -> bool {
        self.binding
            .verify(self.enclave.as_ref(), self.inference.as_ref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationBundle {
    pub enclave: Option<Measurement>,
    pub inference: Option<Measurement>,
    /// True when the enclave quote was retrieved
    pub verified: bool,
    pub quality: Quality,
    pub binding: AttestationBinding,
    pub summary: AttestationSummary,
    /// Why a source is missing or degraded
    pub notes: Vec<String>,
}

impl AttestationBundle {
    /// Combine two fetch outcomes. Pure; no I/O.
    pub fn assemble(enclave: FetchOutcome, inference: FetchOutcome) -> Self {
        let quality = Quality::grade(
            enclave.is_verified(),
            inference.is_verified(),
            inference.is_partial(),
        );
        let summary = AttestationSummary::describe(&enclave, &inference);

        let mut notes = Vec::new();
        if let FetchOutcome::Failed(reason) = &enclave {
            notes.push(format!("enclave: {}", reason));
        }
        match &inference {
            FetchOutcome::Failed(reason) => notes.push(format!("inference: {}", reason)),
            FetchOutcome::Partial(_) => {
                notes.push("inference: quote unavailable, TLS fingerprint only".to_string())
            }
            FetchOutcome::Verified(_) => {}
        }

        let verified = enclave.is_verified();
        let enclave = enclave.into_measurement();
        let inference = inference.into_measurement();
        let binding = AttestationBinding::create(enclave.as_ref(), inference.as_ref());

        Self {
            enclave,
            inference,
            verified,
            quality,
            binding,
            summary,
            notes,
        }
    }

    pub fn snapshot(&self) -> AttestationSnapshot {
        AttestationSnapshot {
            enclave: self.enclave.clone(),
            inference: self.inference.clone(),
            verified: self.verified,
            quality: self.quality,
            binding: self.binding.clone(),
        }
    }
}

/// Source of attestation bundles
#[async_trait]
pub trait AttestationProvider: Send + Sync {
    async fn collect(&self) -> AttestationBundle;
}

/// Fetches both sources concurrently over HTTP
pub struct AttestationCollector {
    enclave: EnclaveSource,
    inference: InferenceSource,
}

impl AttestationCollector {
    pub fn new(attestation: &AttestationConfig, llm: &LlmConfig) -> Result<Self> {
        let enclave = EnclaveSource::new(&attestation.enclave_url, attestation.timeout_secs)
            .map_err(|e| AgentError::Config(format!("enclave attestation client: {}", e)))?;
        let inference = InferenceSource::new(attestation, llm)
            .map_err(|e| AgentError::Config(format!("inference attestation client: {}", e)))?;
        Ok(Self { enclave, inference })
    }
}

#[async_trait]
impl AttestationProvider for AttestationCollector {
    async fn collect(&self) -> AttestationBundle {
        let (enclave, inference) = tokio::join!(self.enclave.fetch(), self.inference.fetch());
        let bundle = AttestationBundle::assemble(enclave, inference);

        if bundle.quality == Quality::None {
            warn!(notes = ?bundle.notes, "No attestation evidence collected");
        } else {
            info!(
                quality = bundle.quality.as_str(),
                verified = bundle.verified,
                combined_hash = %bundle.binding.combined_hash,
                "Attestation collected"
            );
        }
        bundle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full(source: MeasurementSource) -> FetchOutcome {
        FetchOutcome::Verified(Measurement::new(source, ProofLevel::Full, "https://x/cpu.html"))
    }

    fn partial() -> FetchOutcome {
        let mut m = Measurement::new(MeasurementSource::Inference, ProofLevel::Partial, "https://x");
        m.tls_fingerprint = Some("ab".repeat(32));
        FetchOutcome::Partial(m)
    }

    fn failed() -> FetchOutcome {
        FetchOutcome::Failed("connection refused".into())
    }

    #[test]
    fn test_quality_truth_table() {
        assert_eq!(Quality::grade(true, true, false), Quality::High);
        assert_eq!(Quality::grade(true, false, true), Quality::Medium);
        assert_eq!(Quality::grade(true, false, false), Quality::Low);
        assert_eq!(Quality::grade(false, true, false), Quality::Low);
        assert_eq!(Quality::grade(false, false, true), Quality::None);
        assert_eq!(Quality::grade(false, false, false), Quality::None);
    }

    #[test]
    fn test_assemble_high() {
        let bundle = AttestationBundle::assemble(
            full(MeasurementSource::Enclave),
            full(MeasurementSource::Inference),
        );
        assert_eq!(bundle.quality, Quality::High);
        assert!(bundle.verified);
        assert_eq!(bundle.summary.end_to_end_privacy, "guaranteed");
        assert!(bundle.notes.is_empty());
        assert!(bundle.snapshot().verify_binding());
    }

    #[test]
    fn test_assemble_medium_keeps_partial_measurement() {
        let bundle = AttestationBundle::assemble(full(MeasurementSource::Enclave), partial());
        assert_eq!(bundle.quality, Quality::Medium);
        assert_eq!(
            bundle.inference.as_ref().map(|m| m.proof),
            Some(ProofLevel::Partial)
        );
        assert_eq!(bundle.summary.llm_inference, "tls-only");
    }

    #[test]
    fn test_assemble_partial_alone_is_none() {
        let bundle = AttestationBundle::assemble(failed(), partial());
        assert_eq!(bundle.quality, Quality::None);
        assert!(!bundle.verified);
        assert!(bundle.enclave.is_none());
        assert!(bundle.notes.iter().any(|n| n.contains("connection refused")));
    }

    #[test]
    fn test_assemble_nothing() {
        let bundle = AttestationBundle::assemble(failed(), failed());
        assert_eq!(bundle.quality, Quality::None);
        assert_eq!(bundle.notes.len(), 2);
        assert!(bundle.snapshot().verify_binding());
    }

    #[test]
    fn test_unavailable_snapshot_verifies() {
        let snapshot = AttestationSnapshot::unavailable();
        assert!(snapshot.enclave.is_none());
        assert!(snapshot.verify_binding());
    }

    #[test]
    fn test_quality_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Quality::Medium).unwrap(), "\"medium\"");
    }
}
