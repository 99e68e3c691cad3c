//! Server JSON shapes and their conversion into domain types.

use anyhow::{Context, Result};
use log::warn;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::models::{DataStream, DevicePermission, DeviceSettings, Survey, SurveyType, DAYS_PER_WEEK};

#[derive(Debug, Deserialize)]
struct SurveyWire {
    #[serde(rename = "_id")]
    id: String,
    survey_type: String,
    #[serde(default)]
    timings: Vec<Vec<u32>>,
    #[serde(default)]
    settings: SurveySettingsWire,
}

#[derive(Debug, Default, Deserialize)]
struct SurveySettingsWire {
    #[serde(default)]
    trigger_on_first_download: bool,
    #[serde(default)]
    always_available: bool,
}

fn survey_type_from_wire(value: &str) -> Option<SurveyType> {
    match value {
        "tracking_survey" => Some(SurveyType::Tracking),
        "audio_survey" => Some(SurveyType::Audio),
        _ => None,
    }
}

/// Parse a survey list, dropping entries with an unknown type.
pub fn parse_surveys(body: &str) -> Result<Vec<Survey>> {
    let wire: Vec<SurveyWire> =
        serde_json::from_str(body).context("survey list is not valid JSON")?;

    Ok(wire
        .into_iter()
        .filter_map(|entry| {
            let Some(survey_type) = survey_type_from_wire(&entry.survey_type) else {
                warn!(
                    "Skipping survey {} with unknown type '{}'",
                    entry.id, entry.survey_type
                );
                return None;
            };
            let mut timings = entry.timings;
            timings.resize(DAYS_PER_WEEK, Vec::new());
            for day in timings.iter_mut() {
                day.sort_unstable();
            }
            Some(Survey {
                survey_id: entry.id,
                survey_type,
                timings,
                always_available: entry.settings.always_available,
                trigger_on_first_download: entry.settings.trigger_on_first_download,
            })
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct DeviceSettingsEnvelope {
    #[serde(default)]
    device_settings: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    check_for_new_settings_freq_seconds: Option<u64>,
}

fn stream_from_wire(key: &str) -> Option<DataStream> {
    match key {
        "gps" => Some(DataStream::Gps),
        "accelerometer" => Some(DataStream::Accelerometer),
        "gyro" => Some(DataStream::Gyro),
        "magnetometer" => Some(DataStream::Magnetometer),
        "devicemotion" => Some(DataStream::Motion),
        "power_state" => Some(DataStream::PowerState),
        "proximity" => Some(DataStream::Proximity),
        "reachability" => Some(DataStream::Reachability),
        _ => None,
    }
}

fn permission_from_wire(value: &str) -> Option<DevicePermission> {
    match value {
        "requested" => Some(DevicePermission::Requested),
        "denied" => Some(DevicePermission::Denied),
        "enabled" => Some(DevicePermission::Enabled),
        "disabled" => Some(DevicePermission::Disabled),
        _ => None,
    }
}

pub fn parse_device_settings(body: &str) -> Result<DeviceSettings> {
    let envelope: DeviceSettingsEnvelope =
        serde_json::from_str(body).context("device settings are not valid JSON")?;

    let mut settings = DeviceSettings::default();
    if let Some(freq) = envelope.check_for_new_settings_freq_seconds.or_else(|| {
        envelope
            .device_settings
            .get("check_for_new_settings_freq_seconds")
            .and_then(|value| value.as_u64())
    }) {
        settings.check_for_new_settings_freq_seconds = freq;
    }

    for (key, value) in &envelope.device_settings {
        let Some(stream) = stream_from_wire(key) else {
            continue;
        };
        match value.as_str().and_then(permission_from_wire) {
            Some(permission) => {
                settings.permissions.insert(stream, permission);
            }
            None => warn!("Ignoring unknown permission {value} for {key}"),
        }
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_survey_list() {
        let body = r#"[
            {"_id": "s1", "survey_type": "tracking_survey",
             "timings": [[], [7200, 3600], [], [], [], [], []],
             "settings": {"trigger_on_first_download": true}},
            {"_id": "s2", "survey_type": "audio_survey", "timings": [],
             "settings": {"always_available": true}},
            {"_id": "s3", "survey_type": "image_survey"}
        ]"#;

        let surveys = parse_surveys(body).unwrap();
        assert_eq!(surveys.len(), 2);
        assert_eq!(surveys[0].survey_type, SurveyType::Tracking);
        assert_eq!(surveys[0].timings[1], vec![3600, 7200]);
        assert!(surveys[0].trigger_on_first_download);
        assert!(surveys[1].always_available);
        assert_eq!(surveys[1].timings.len(), DAYS_PER_WEEK);
    }

    #[test]
    fn parses_device_settings_permissions() {
        let body = r#"{"device_settings": {
            "gps": "enabled", "accelerometer": "denied", "devicemotion": "disabled",
            "texts": "requested", "gyro": "bogus",
            "check_for_new_settings_freq_seconds": 900
        }}"#;

        let settings = parse_device_settings(body).unwrap();
        assert_eq!(settings.check_for_new_settings_freq_seconds, 900);
        assert_eq!(settings.permission(DataStream::Gps), DevicePermission::Enabled);
        assert_eq!(
            settings.permission(DataStream::Accelerometer),
            DevicePermission::Denied
        );
        assert_eq!(settings.permission(DataStream::Motion), DevicePermission::Disabled);
        assert_eq!(settings.permission(DataStream::Gyro), DevicePermission::Requested);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(parse_surveys("{").is_err());
        assert!(parse_device_settings("[").is_err());
    }
}
