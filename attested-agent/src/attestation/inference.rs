//! Attestation of the confidential inference service.
//!
//! Fallback order:
//! 1. `https://<llm host>:<port>/cpu.html`
//! 2. Each alternate path on the same host and port
//! 3. SHA-256 of the TLS certificate presented by the LLM API (partial proof)
//!
//! Inference hosts commonly serve attestation behind self-signed
//! certificates, so this client does not verify certificates. The evidence is
//! the quote itself, or the fingerprint that is recorded for later comparison.

use reqwest::tls::TlsInfo;
use reqwest::{Client, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::quote::{self, QUOTE_ELEMENT_ID};
use super::{sha256_hex, FetchOutcome, Measurement, MeasurementSource, ProofLevel};
use crate::config::{AttestationConfig, LlmConfig};

pub struct InferenceSource {
    client: Client,
    attestation_base: Option<String>,
    alternate_paths: Vec<String>,
    api_url: String,
    model: String,
    api_key: Option<String>,
}

impl InferenceSource {
    pub fn new(attestation: &AttestationConfig, llm: &LlmConfig) -> Result<Self, reqwest::Error> {
        let base = attestation_base(&llm.base_url, attestation.inference_port);
        Self::build(base, attestation, llm)
    }

    /// Use an explicit attestation base URL instead of deriving it from the LLM host
    pub fn with_attestation_base(
        base: &str,
        attestation: &AttestationConfig,
        llm: &LlmConfig,
    ) -> Result<Self, reqwest::Error> {
        Self::build(Some(base.trim_end_matches('/').to_string()), attestation, llm)
    }

    fn build(
        attestation_base: Option<String>,
        attestation: &AttestationConfig,
        llm: &LlmConfig,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(attestation.timeout_secs))
            .danger_accept_invalid_certs(true)
            .tls_info(true)
            .build()?;

        Ok(Self {
            client,
            attestation_base,
            alternate_paths: attestation.alternate_paths.clone(),
            api_url: llm.base_url.clone(),
            model: llm.model.clone(),
            api_key: llm.api_key.clone(),
        })
    }

    pub async fn fetch(&self) -> FetchOutcome {
        let mut attempts = Vec::new();

        if let Some(base) = &self.attestation_base {
            let paths = std::iter::once("/cpu.html").chain(self.alternate_paths.iter().map(String::as_str));
            for path in paths {
                let url = format!("{}{}", base, path);
                match self.fetch_quote(&url).await {
                    Ok(measurement) => {
                        info!(url = %url, "Inference attestation retrieved");
                        return FetchOutcome::Verified(measurement);
                    }
                    Err(reason) => {
                        debug!(url = %url, %reason, "Inference attestation endpoint failed");
                        attempts.push(reason);
                    }
                }
            }
        } else {
            attempts.push(format!("cannot derive attestation host from {}", self.api_url));
        }

        match self.fetch_tls_fingerprint().await {
            Ok(fingerprint) => {
                let mut measurement = Measurement::new(
                    MeasurementSource::Inference,
                    ProofLevel::Partial,
                    self.api_url.clone(),
                );
                measurement.tee_type = "unknown".to_string();
                measurement.tls_fingerprint = Some(fingerprint);
                measurement.model = Some(self.model.clone());
                FetchOutcome::Partial(measurement)
            }
            Err(reason) => {
                attempts.push(reason);
                warn!(attempts = ?attempts, "Inference attestation unavailable");
                FetchOutcome::Failed(attempts.join("; "))
            }
        }
    }

    async fn fetch_quote(&self, url: &str) -> Result<Measurement, String> {
        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key).header("X-API-Key", key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| format!("request to {} failed: {}", url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("{} returned HTTP {}", url, status.as_u16()));
        }
        let fingerprint = peer_fingerprint(&response);
        let body = response
            .text()
            .await
            .map_err(|e| format!("failed to read {}: {}", url, e))?;

        let raw_quote = raw_quote_from(&body);
        let registers = quote::extract_registers(&body, raw_quote.as_deref());
        if registers.is_empty() && raw_quote.is_none() {
            return Err(format!("{} returned no quote", url));
        }

        let mut measurement =
            Measurement::new(MeasurementSource::Inference, ProofLevel::Full, url.to_string());
        measurement.registers = registers;
        measurement.raw_quote = raw_quote.as_deref().map(quote::preview);
        measurement.tls_fingerprint = fingerprint;
        measurement.model = Some(self.model.clone());
        Ok(measurement)
    }

    async fn fetch_tls_fingerprint(&self) -> Result<String, String> {
        let response = self
            .client
            .get(&self.api_url)
            .send()
            .await
            .map_err(|e| format!("TLS probe of {} failed: {}", self.api_url, e))?;
        peer_fingerprint(&response)
            .ok_or_else(|| format!("{} presented no TLS certificate", self.api_url))
    }
}

/// `https://<host of api_url>:<port>`
pub fn attestation_base(api_url: &str, port: u16) -> Option<String> {
    let url = Url::parse(api_url).ok()?;
    let host = url.host_str()?;
    Some(format!("https://{}:{}", host, port))
}

fn peer_fingerprint(response: &reqwest::Response) -> Option<String> {
    response
        .extensions()
        .get::<TlsInfo>()
        .and_then(|info| info.peer_certificate())
        .map(sha256_hex)
}

/// Quote carried by an attestation response: an HTML quote block or a JSON field
fn raw_quote_from(body: &str) -> Option<String> {
    if let Some(text) = quote::extract_element_text(body, QUOTE_ELEMENT_ID) {
        return Some(text.to_string());
    }
    let json: Value = serde_json::from_str(body).ok()?;
    ["quote", "tdx_quote", "attestation"]
        .iter()
        .find_map(|key| json.get(key).and_then(Value::as_str))
        .map(str::to_string)
}
