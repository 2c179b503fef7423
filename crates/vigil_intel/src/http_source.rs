//! Generic HTTP-backed `ThreatIntelSource` (spec.md §4.3): one JSON-over-
//! HTTP lookup per configured source, grounded on the same
//! `reqwest::Client` + build-request/send/check-status/`.json()` shape the
//! example pack's Ollama embedding provider uses for its own outbound HTTP
//! calls. A deployment wires one of these per entry in
//! `ThreatIntelConfig::sources`; nothing about this type is specific to any
//! single named vendor.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;

use vigil_domain::{GeoMetadata, Indicator, NetworkMetadata, SourceResult};

use crate::source::{SourceError, ThreatIntelSource};

/// The JSON body a configured source is expected to return for
/// `GET {base_url}/indicators/{value}`. Fields absent from a given source's
/// real response are left at their `Default`.
#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    malicious: bool,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    asn: Option<u32>,
    #[serde(default)]
    asn_org: Option<String>,
    #[serde(default)]
    reverse_dns: Option<String>,
    #[serde(default)]
    open_ports: Vec<u16>,
    #[serde(default)]
    is_tor_exit_node: bool,
    #[serde(default)]
    is_known_vpn: bool,
}

fn default_confidence() -> f64 {
    0.5
}

pub struct HttpThreatIntelSource {
    name: String,
    base_url: String,
    api_key: Option<String>,
    reliability_weight: f64,
    max_concurrent_requests: usize,
    requests_per_minute: u32,
    client: Client,
}

impl HttpThreatIntelSource {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        reliability_weight: f64,
        max_concurrent_requests: usize,
        requests_per_minute: u32,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key,
            reliability_weight,
            max_concurrent_requests,
            requests_per_minute,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ThreatIntelSource for HttpThreatIntelSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn reliability_weight(&self) -> f64 {
        self.reliability_weight
    }

    fn max_concurrent_requests(&self) -> usize {
        self.max_concurrent_requests
    }

    fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    async fn lookup(&self, indicator: &Indicator) -> Result<SourceResult, SourceError> {
        let url = format!("{}/indicators/{}", self.base_url, indicator);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| SourceError::RequestFailed {
            source: self.name.clone(),
            reason: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(SourceError::RequestFailed {
                source: self.name.clone(),
                reason: format!("http status {}", response.status()),
            });
        }

        let body: LookupResponse =
            response.json().await.map_err(|_| SourceError::BadResponse { source: self.name.clone() })?;

        let geo = (body.country_code.is_some() || body.city.is_some() || body.asn.is_some() || body.asn_org.is_some())
            .then(|| GeoMetadata {
                country_code: body.country_code,
                city: body.city,
                asn: body.asn,
                asn_org: body.asn_org,
            });

        let network = (body.reverse_dns.is_some() || !body.open_ports.is_empty() || body.is_tor_exit_node || body.is_known_vpn)
            .then(|| NetworkMetadata {
                reverse_dns: body.reverse_dns,
                open_ports: body.open_ports,
                is_tor_exit_node: body.is_tor_exit_node,
                is_known_vpn: body.is_known_vpn,
            });

        Ok(SourceResult {
            source_name: self.name.clone(),
            confidence: body.confidence.clamp(0.0, 1.0),
            malicious: body.malicious,
            geo,
            network,
            tags: body.tags,
            retrieved_at: Utc::now(),
        })
    }
}
