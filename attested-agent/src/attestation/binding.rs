//! Cryptographic binding between the enclave and inference measurements.
//!
//! ```text
//! enclave_hash   = sha256(canonical_json(enclave   | null))
//! inference_hash = sha256(canonical_json(inference | null))
//! combined_hash  = sha256("{enclave_hash}:{inference_hash}:{timestamp}")
//! ```
//!
//! Canonical JSON means object keys sorted at every depth with no extra
//! whitespace, so the digest can be recomputed by anyone holding the snapshot.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::Measurement;

pub const BINDING_VERSION: &str = "1.0";
pub const BINDING_ALGORITHM: &str = "sha256";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationBinding {
    pub version: String,
    pub algorithm: String,
    pub enclave_hash: String,
    pub inference_hash: String,
    pub combined_hash: String,
    pub timestamp: String,
}

impl AttestationBinding {
    pub fn create(enclave: Option<&Measurement>, inference: Option<&Measurement>) -> Self {
        Self::create_at(enclave, inference, now_rfc3339())
    }

    pub fn create_at(
        enclave: Option<&Measurement>,
        inference: Option<&Measurement>,
        timestamp: String,
    ) -> Self {
        let enclave_hash = sha256_hex(canonical_json(&enclave));
        let inference_hash = sha256_hex(canonical_json(&inference));
        let combined_hash = combine(&enclave_hash, &inference_hash, &timestamp);

        Self {
            version: BINDING_VERSION.to_string(),
            algorithm: BINDING_ALGORITHM.to_string(),
            enclave_hash,
            inference_hash,
            combined_hash,
            timestamp,
        }
    }

    /// Recompute every digest from the given measurements
    pub fn verify(&self, enclave: Option<&Measurement>, inference: Option<&Measurement>) -> bool {
        if self.algorithm != BINDING_ALGORITHM {
            return false;
        }
        let enclave_hash = sha256_hex(canonical_json(&enclave));
        let inference_hash = sha256_hex(canonical_json(&inference));

        enclave_hash == self.enclave_hash
            && inference_hash == self.inference_hash
            && combine(&enclave_hash, &inference_hash, &self.timestamp) == self.combined_hash
    }
}

fn combine(enclave_hash: &str, inference_hash: &str, timestamp: &str) -> String {
    sha256_hex(format!("{}:{}:{}", enclave_hash, inference_hash, timestamp))
}

pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(data.as_ref()))
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Serialize with object keys sorted at every depth.
///
/// Sorting is done explicitly rather than relying on the map type behind
/// `serde_json::Value`, which changes when `preserve_order` is enabled
/// anywhere in the dependency graph.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> String {
    let value = serde_json::to_value(value).unwrap_or(Value::Null);
    sort_keys(value).to_string()
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, sort_keys(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
