use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

pub fn encode_body<T: Serialize>(value: &T, kind: &str) -> Result<String> {
    serde_json::to_string(value).with_context(|| format!("failed to encode {kind} record"))
}

pub fn decode_body<T: DeserializeOwned>(body: &str, kind: &str) -> Result<T> {
    serde_json::from_str(body).with_context(|| format!("failed to decode {kind} record"))
}

pub fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339()
}
