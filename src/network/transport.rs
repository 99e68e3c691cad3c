//! Transport collaborator: survey/settings download and file upload.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::multipart::{Form, Part};
use std::{
    path::Path,
    sync::{PoisonError, RwLock},
    time::Duration,
};

use crate::config::AppConfig;
use crate::models::{DeviceSettings, Survey};

use super::wire::{parse_device_settings, parse_surveys};

const SURVEYS_ENDPOINT: &str = "/download_surveys/ios/";
const SETTINGS_ENDPOINT: &str = "/download_settings/ios/";
const UPLOAD_ENDPOINT: &str = "/upload/ios/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMetadata {
    pub file_name: String,
    pub size_bytes: u64,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn upload_file(&self, metadata: &UploadMetadata, path: &Path) -> Result<()>;

    async fn fetch_surveys(&self) -> Result<Vec<Survey>>;

    async fn fetch_settings(&self) -> Result<DeviceSettings>;
}

/// Plain HTTP transport. Request signing is left to a wrapping layer.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    device_id: String,
    patient_id: RwLock<String>,
}

impl HttpTransport {
    pub fn new(config: &AppConfig, device_id: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            device_id: device_id.into(),
            patient_id: RwLock::new(String::new()),
        })
    }

    pub fn set_patient_id(&self, patient_id: &str) {
        *self
            .patient_id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = patient_id.to_string();
    }

    fn patient_id(&self) -> String {
        self.patient_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn identity_fields(&self) -> [(&'static str, String); 2] {
        [
            ("patient_id", self.patient_id()),
            ("device_id", self.device_id.clone()),
        ]
    }

    async fn post_form(&self, endpoint: &str) -> Result<String> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!("POST {url}");
        let response = self
            .client
            .post(&url)
            .form(&self.identity_fields())
            .send()
            .await
            .with_context(|| format!("request to {endpoint} failed"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("{endpoint} returned status {status}"));
        }

        response
            .text()
            .await
            .with_context(|| format!("failed to read body from {endpoint}"))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn upload_file(&self, metadata: &UploadMetadata, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;

        let part = Part::bytes(bytes)
            .file_name(metadata.file_name.clone())
            .mime_str("application/octet-stream")?;
        let mut form = Form::new().part("file", part);
        for (key, value) in self.identity_fields() {
            form = form.text(key, value);
        }
        form = form.text("file_name", metadata.file_name.clone());

        let url = format!("{}{}", self.base_url, UPLOAD_ENDPOINT);
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("upload of {} failed", metadata.file_name))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!(
                "upload of {} returned status {status}",
                metadata.file_name
            ));
        }

        info!(
            "Uploaded {} ({} bytes)",
            metadata.file_name, metadata.size_bytes
        );
        Ok(())
    }

    async fn fetch_surveys(&self) -> Result<Vec<Survey>> {
        let body = self.post_form(SURVEYS_ENDPOINT).await?;
        parse_surveys(&body)
    }

    async fn fetch_settings(&self) -> Result<DeviceSettings> {
        let body = self.post_form(SETTINGS_ENDPOINT).await?;
        parse_device_settings(&body)
    }
}
