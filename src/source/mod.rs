//! External value source
//!
//! One fetch per tick against the SushiBar GraphQL endpoint. Transport and
//! HTTP failures are `Unavailable` (tick skipped, gap tolerated); a response
//! that parses but carries no usable reading is an `Anomaly`.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::error::SourceError;

/// Anything that can produce one ratio reading per poll
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RatioSource: Send + Sync {
    async fn fetch_ratio(&self) -> Result<Decimal, SourceError>;
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<ResponseData>,
}

#[derive(Debug, Deserialize)]
struct ResponseData {
    #[serde(rename = "sushiBarStats")]
    sushi_bar_stats: Option<SushiBarStats>,
}

#[derive(Debug, Deserialize)]
struct SushiBarStats {
    #[serde(rename = "xSushiSushiRatio")]
    x_sushi_sushi_ratio: f64,
}

/// SushiBar stats endpoint client
pub struct SushiBarSource {
    client: Client,
    url: String,
}

impl SushiBarSource {
    pub fn new(url: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    fn query_body() -> serde_json::Value {
        json!({
            "operationName": "SushiBarStats",
            "query": "query SushiBarStats {\n  sushiBarStats {\n    xSushiSushiRatio\n  }\n}",
            "variables": {}
        })
    }
}

/// Quantize and validate a raw reading.
fn normalize_reading(raw: f64) -> Result<Decimal, SourceError> {
    let ratio = Decimal::from_f64(raw)
        .ok_or_else(|| SourceError::Anomaly(format!("unrepresentable ratio {raw}")))?
        .round_dp(4);

    if ratio <= Decimal::ZERO {
        return Err(SourceError::Anomaly(format!(
            "non-positive ratio {ratio}"
        )));
    }
    Ok(ratio)
}

#[async_trait]
impl RatioSource for SushiBarSource {
    async fn fetch_ratio(&self) -> Result<Decimal, SourceError> {
        let response = self
            .client
            .post(&self.url)
            .json(&Self::query_body())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceError::Unavailable(format!(
                "HTTP {} from {}",
                response.status(),
                self.url
            )));
        }

        let body: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Anomaly(format!("malformed response: {e}")))?;

        let stats = body
            .data
            .and_then(|d| d.sushi_bar_stats)
            .ok_or_else(|| SourceError::Anomaly("missing sushiBarStats field".to_string()))?;

        normalize_reading(stats.x_sushi_sushi_ratio)
    }
}
