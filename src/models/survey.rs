//! Survey definitions delivered by the server and the local runtime record
//! tracking each one.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DAYS_PER_WEEK: usize = 7;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SurveyType {
    Tracking,
    Audio,
}

impl SurveyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SurveyType::Tracking => "tracking_survey",
            SurveyType::Audio => "audio_survey",
        }
    }
}

/// Immutable server definition. Replaced wholesale on every sync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Survey {
    pub survey_id: String,
    pub survey_type: SurveyType,
    /// Seconds since local midnight per weekday, Sunday first.
    pub timings: Vec<Vec<u32>>,
    pub always_available: bool,
    pub trigger_on_first_download: bool,
}

impl Survey {
    pub fn new(survey_id: impl Into<String>, survey_type: SurveyType) -> Self {
        Self {
            survey_id: survey_id.into(),
            survey_type,
            timings: vec![Vec::new(); DAYS_PER_WEEK],
            always_available: false,
            trigger_on_first_download: false,
        }
    }

    /// Offsets for `weekday` (0 = Sunday), ascending.
    pub fn day_timings(&self, weekday: usize) -> Vec<u32> {
        let mut offsets = self.timings.get(weekday).cloned().unwrap_or_default();
        offsets.sort_unstable();
        offsets
    }

    pub fn with_timing(mut self, weekday: usize, offset_secs: u32) -> Self {
        if self.timings.len() < DAYS_PER_WEEK {
            self.timings.resize(DAYS_PER_WEEK, Vec::new());
        }
        if let Some(day) = self.timings.get_mut(weekday) {
            day.push(offset_secs);
        }
        self
    }

    pub fn always_available(mut self) -> Self {
        self.always_available = true;
        self
    }

    pub fn trigger_on_first_download(mut self) -> Self {
        self.trigger_on_first_download = true;
        self
    }
}

/// Opaque handle minted when a survey is delivered; the UI collaborator maps
/// it to a platform notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NotificationHandle(pub Uuid);

impl NotificationHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NotificationHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSurvey {
    /// Looked up in `Study::surveys`; never owns the definition.
    pub survey_id: String,
    pub is_complete: bool,
    /// Epoch seconds. 0 means always pending.
    pub expires: i64,
    pub received: i64,
    pub pending_answers: u32,
    pub notification: Option<NotificationHandle>,
}

impl ActiveSurvey {
    pub fn new(survey_id: impl Into<String>) -> Self {
        Self {
            survey_id: survey_id.into(),
            is_complete: false,
            expires: 0,
            received: 0,
            pending_answers: 0,
            notification: None,
        }
    }

    /// Back to a fresh, unanswered state. Expiry is left to the caller.
    pub fn reset(&mut self) {
        self.is_complete = false;
        self.pending_answers = 0;
        self.notification = None;
    }
}
