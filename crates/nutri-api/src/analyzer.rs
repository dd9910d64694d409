use std::time::Duration;

use anyhow::{Result, bail};
use serde::Serialize;

use nutri_types::api::FoodAnalysis;

/// HTTP client for the upstream AI nutrition-analysis service. This is the
/// paid call the daily limiter protects; it runs only after the gate allows.
pub struct Analyzer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

impl Analyzer {
    pub fn new(base_url: String, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Analyze a base64-encoded meal photo, with an optional free-text hint.
    pub async fn analyze_image(&self, image: &str, hint: Option<&str>) -> Result<FoodAnalysis> {
        self.post(&AnalyzeRequest {
            image: Some(image),
            description: hint,
        })
        .await
    }

    /// Analyze a textual meal description without a photo.
    pub async fn analyze_description(&self, description: &str) -> Result<FoodAnalysis> {
        self.post(&AnalyzeRequest {
            image: None,
            description: Some(description),
        })
        .await
    }

    async fn post(&self, req: &AnalyzeRequest<'_>) -> Result<FoodAnalysis> {
        let resp = self
            .client
            .post(format!("{}/v1/analyze", self.base_url))
            .bearer_auth(&self.api_key)
            .json(req)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            bail!("analysis service returned {}", status);
        }

        Ok(resp.json().await?)
    }
}
