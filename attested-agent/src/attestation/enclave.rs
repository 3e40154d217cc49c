//! Local enclave attestation.
//!
//! The TEE exposes a loopback attestation service:
//! - `/cpu.html`: the TDX quote of this VM
//! - `/self.html`: a self-report with the TLS fingerprint and container hash

use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use super::quote::{self, QUOTE_ELEMENT_ID};
use super::{FetchOutcome, Measurement, MeasurementSource, ProofLevel};

pub struct EnclaveSource {
    client: Client,
    base_url: String,
}

impl EnclaveSource {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn fetch(&self) -> FetchOutcome {
        let quote_url = format!("{}/cpu.html", self.base_url);
        let page = match self.get_text(&quote_url).await {
            Ok(page) => page,
            Err(reason) => {
                warn!(url = %quote_url, %reason, "Enclave attestation unavailable");
                return FetchOutcome::Failed(reason);
            }
        };

        let raw_quote = quote::extract_element_text(&page, QUOTE_ELEMENT_ID);
        let registers = quote::extract_registers(&page, raw_quote);
        if registers.is_empty() {
            return FetchOutcome::Failed(format!(
                "{} contained no measurement registers",
                quote_url
            ));
        }

        let mut measurement = Measurement::new(
            MeasurementSource::Enclave,
            ProofLevel::Full,
            quote_url.clone(),
        );
        measurement.registers = registers;
        measurement.raw_quote = raw_quote.map(quote::preview);

        // The self-report only enriches the measurement
        let report_url = format!("{}/self.html", self.base_url);
        match self.get_text(&report_url).await {
            Ok(report) => {
                measurement.tls_fingerprint = quote::scan_tls_fingerprint(&report);
                measurement.container_hash = quote::scan_container_hash(&report);
            }
            Err(reason) => debug!(url = %report_url, %reason, "Enclave self-report unavailable"),
        }

        FetchOutcome::Verified(measurement)
    }

    async fn get_text(&self, url: &str) -> Result<String, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("request to {} failed: {}", url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("{} returned HTTP {}", url, status.as_u16()));
        }
        response
            .text()
            .await
            .map_err(|e| format!("failed to read {}: {}", url, e))
    }
}
