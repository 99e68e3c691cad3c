//! Per-stream collection settings: the study's registration-time snapshot and
//! the server's permission-state overrides.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DataStream {
    Gps,
    Accelerometer,
    Gyro,
    Magnetometer,
    Motion,
    PowerState,
    Proximity,
    Reachability,
}

impl DataStream {
    pub const ALL: [DataStream; 8] = [
        DataStream::Gps,
        DataStream::Accelerometer,
        DataStream::Gyro,
        DataStream::Magnetometer,
        DataStream::Motion,
        DataStream::PowerState,
        DataStream::Proximity,
        DataStream::Reachability,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataStream::Gps => "gps",
            DataStream::Accelerometer => "accel",
            DataStream::Gyro => "gyro",
            DataStream::Magnetometer => "magnetometer",
            DataStream::Motion => "devicemotion",
            DataStream::PowerState => "power_state",
            DataStream::Proximity => "proximity",
            DataStream::Reachability => "reachability",
        }
    }

    /// Event streams run continuously; the rest alternate on/off.
    pub fn is_duty_cycled(&self) -> bool {
        matches!(
            self,
            DataStream::Gps
                | DataStream::Accelerometer
                | DataStream::Gyro
                | DataStream::Magnetometer
                | DataStream::Motion
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StreamSettings {
    pub enabled: bool,
    pub on_duration_seconds: u64,
    pub off_duration_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudySettings {
    pub upload_data_file_frequency_seconds: u64,
    pub check_for_new_surveys_freq_seconds: u64,
    pub upload_over_cellular: bool,
    pub streams: BTreeMap<DataStream, StreamSettings>,
}

impl Default for StudySettings {
    fn default() -> Self {
        Self {
            upload_data_file_frequency_seconds: 3600,
            check_for_new_surveys_freq_seconds: 21600,
            upload_over_cellular: false,
            streams: BTreeMap::new(),
        }
    }
}

impl StudySettings {
    pub fn stream(&self, stream: DataStream) -> StreamSettings {
        self.streams.get(&stream).copied().unwrap_or_default()
    }

    pub fn set_enabled(&mut self, stream: DataStream, enabled: bool) {
        self.streams.entry(stream).or_default().enabled = enabled;
    }
}

/// Server-side state of a data stream's permission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DevicePermission {
    /// Initial state, also used while the OS prompt is undecided.
    #[default]
    Requested,
    Denied,
    Enabled,
    /// Stream unused or no longer needed.
    Disabled,
}

impl DevicePermission {
    pub fn allows_collection(&self) -> bool {
        matches!(self, DevicePermission::Requested | DevicePermission::Enabled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSettings {
    pub check_for_new_settings_freq_seconds: u64,
    pub permissions: BTreeMap<DataStream, DevicePermission>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            check_for_new_settings_freq_seconds: 60,
            permissions: BTreeMap::new(),
        }
    }
}

impl DeviceSettings {
    pub fn permission(&self, stream: DataStream) -> DevicePermission {
        self.permissions.get(&stream).copied().unwrap_or_default()
    }
}
