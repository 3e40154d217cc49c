//! Birth certificate: proof that a credential was minted inside an attested TEE.
//!
//! The certificate never contains the credential, only its SHA-256. The
//! digest is a hash chain over the ordered fields:
//!
//! ```text
//! acc = sha256(version)
//! acc = sha256(acc ":" agent_name)
//! acc = sha256(acc ":" credential_hash)
//! acc = sha256(acc ":" sha256(canonical_json(attestation)))
//! acc = sha256(acc ":" issued_at)
//! ```

use serde::{Deserialize, Serialize};

use super::Credential;
use crate::attestation::binding::now_rfc3339;
use crate::attestation::{canonical_json, sha256_hex, AttestationSnapshot};

pub const CERTIFICATE_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BirthCertificate {
    pub version: String,
    pub agent_name: String,
    pub credential_hash: String,
    pub attestation: AttestationSnapshot,
    pub issued_at: String,
    pub digest: String,
}

impl BirthCertificate {
    pub fn issue(agent_name: &str, credential: &Credential, attestation: AttestationSnapshot) -> Self {
        Self::issue_at(agent_name, credential, attestation, now_rfc3339())
    }

    pub fn issue_at(
        agent_name: &str,
        credential: &Credential,
        attestation: AttestationSnapshot,
        issued_at: String,
    ) -> Self {
        let mut certificate = Self {
            version: CERTIFICATE_VERSION.to_string(),
            agent_name: agent_name.to_string(),
            credential_hash: credential.fingerprint(),
            attestation,
            issued_at,
            digest: String::new(),
        };
        certificate.digest = certificate.compute_digest();
        certificate
    }

    pub fn attestation_hash(&self) -> String {
        sha256_hex(canonical_json(&self.attestation))
    }

    pub fn compute_digest(&self) -> String {
        let attestation_hash = self.attestation_hash();
        let fields = [
            self.agent_name.as_str(),
            self.credential_hash.as_str(),
            attestation_hash.as_str(),
            self.issued_at.as_str(),
        ];
        fields
            .iter()
            .fold(sha256_hex(&self.version), |acc, field| {
                sha256_hex(format!("{}:{}", acc, field))
            })
    }

    /// Digest and attestation binding both recompute
    pub fn verify(&self) -> bool {
        self.compute_digest() == self.digest && self.attestation.verify_binding()
    }

    pub fn matches_credential(&self, credential: &Credential) -> bool {
        credential.fingerprint() == self.credential_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::{
        AttestationBundle, FetchOutcome, Measurement, MeasurementSource, ProofLevel,
    };

    fn snapshot() -> AttestationSnapshot {
        let mut enclave = Measurement::new(
            MeasurementSource::Enclave,
            ProofLevel::Full,
            "http://localhost:29343/cpu.html",
        );
        enclave.registers.mrtd = "ab".repeat(48);
        AttestationBundle::assemble(
            FetchOutcome::Verified(enclave),
            FetchOutcome::Failed("unreachable".into()),
        )
        .snapshot()
    }

    #[test]
    fn test_round_trip_verifies() {
        let certificate = BirthCertificate::issue("reef-12", &Credential::new("tok_abc"), snapshot());
        assert!(certificate.verify());

        let json = serde_json::to_string(&certificate).unwrap();
        let back: BirthCertificate = serde_json::from_str(&json).unwrap();
        assert!(back.verify());
        assert_eq!(back, certificate);
    }

    #[test]
    fn test_credential_never_embedded() {
        let certificate = BirthCertificate::issue("reef-12", &Credential::new("tok_abc"), snapshot());
        let json = serde_json::to_string(&certificate).unwrap();
        assert!(!json.contains("tok_abc"));
        assert!(certificate.matches_credential(&Credential::new("tok_abc")));
        assert!(!certificate.matches_credential(&Credential::new("tok_xyz")));
    }

    #[test]
    fn test_hash_chain_order() {
        let certificate = BirthCertificate::issue_at(
            "reef-12",
            &Credential::new("tok_abc"),
            snapshot(),
            "2026-10-18T00:00:00.000000Z".into(),
        );
        let mut acc = sha256_hex("1.0");
        for field in [
            "reef-12".to_string(),
            sha256_hex("tok_abc"),
            certificate.attestation_hash(),
            "2026-10-18T00:00:00.000000Z".to_string(),
        ] {
            acc = sha256_hex(format!("{}:{}", acc, field));
        }
        assert_eq!(certificate.digest, acc);
    }

    #[test]
    fn test_single_field_mutation_detected() {
        let original = BirthCertificate::issue("reef-12", &Credential::new("tok_abc"), snapshot());

        let mut renamed = original.clone();
        renamed.agent_name = "reef-13".into();
        assert!(!renamed.verify());

        let mut redated = original.clone();
        redated.issued_at = "1999-01-01T00:00:00Z".into();
        assert!(!redated.verify());

        let mut rehashed = original.clone();
        rehashed.credential_hash = sha256_hex("tok_other");
        assert!(!rehashed.verify());

        let mut regraded = original.clone();
        regraded.attestation.quality = crate::attestation::Quality::High;
        assert!(!regraded.verify());

        let mut remeasured = original;
        if let Some(enclave) = remeasured.attestation.enclave.as_mut() {
            enclave.registers.rtmr0 = "ff".repeat(48);
        }
        assert!(!remeasured.verify());
    }

    #[test]
    fn test_unavailable_attestation_still_issues() {
        let certificate = BirthCertificate::issue(
            "reef-12",
            &Credential::new("tok_abc"),
            AttestationSnapshot::unavailable(),
        );
        assert!(certificate.verify());
        assert!(certificate.attestation.enclave.is_none());
    }
}
