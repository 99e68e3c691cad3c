//! The per-installation aggregate root.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::db::Record;

use super::{ActiveSurvey, DeviceSettings, Survey, SurveyType, StudySettings};

/// Default settings poll interval until the server says otherwise.
pub const DEFAULT_SETTINGS_CHECK_SECONDS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Study {
    pub patient_id: String,
    pub participant_consented: bool,
    pub study_settings: Option<StudySettings>,
    pub device_settings: Option<DeviceSettings>,
    pub settings_check_frequency: u64,
    pub surveys: Vec<Survey>,
    pub active_surveys: BTreeMap<String, ActiveSurvey>,
    pub next_upload_check: Option<i64>,
    pub next_survey_check: Option<i64>,
    pub next_settings_check: Option<i64>,
    pub missed_upload_check: bool,
    pub missed_survey_check: bool,
    pub last_upload_success: Option<i64>,
    pub submitted_tracking_surveys: u32,
    pub submitted_audio_surveys: u32,
    pub received_tracking_surveys: u32,
    pub received_audio_surveys: u32,
}

impl Study {
    pub fn new(patient_id: impl Into<String>, settings: StudySettings) -> Self {
        Self {
            patient_id: patient_id.into(),
            participant_consented: false,
            study_settings: Some(settings),
            device_settings: None,
            settings_check_frequency: DEFAULT_SETTINGS_CHECK_SECONDS,
            surveys: Vec::new(),
            active_surveys: BTreeMap::new(),
            next_upload_check: None,
            next_survey_check: None,
            next_settings_check: None,
            missed_upload_check: false,
            missed_survey_check: false,
            last_upload_success: None,
            submitted_tracking_surveys: 0,
            submitted_audio_surveys: 0,
            received_tracking_surveys: 0,
            received_audio_surveys: 0,
        }
    }

    pub fn survey(&self, survey_id: &str) -> Option<&Survey> {
        self.surveys.iter().find(|survey| survey.survey_id == survey_id)
    }

    pub fn record_submitted(&mut self, survey_type: SurveyType) {
        match survey_type {
            SurveyType::Tracking => self.submitted_tracking_surveys += 1,
            SurveyType::Audio => self.submitted_audio_surveys += 1,
        }
    }

    pub fn record_received(&mut self, survey_type: SurveyType) {
        match survey_type {
            SurveyType::Tracking => self.received_tracking_surveys += 1,
            SurveyType::Audio => self.received_audio_surveys += 1,
        }
    }

    pub fn upload_over_cellular(&self) -> bool {
        self.study_settings
            .as_ref()
            .map(|settings| settings.upload_over_cellular)
            .unwrap_or(false)
    }

    /// Arm all three periodic checks relative to `now`.
    pub fn schedule_checks(&mut self, now: i64) {
        self.advance_upload_check(now);
        self.advance_survey_check(now);
        self.advance_settings_check(now);
    }

    pub fn advance_upload_check(&mut self, now: i64) {
        if let Some(settings) = &self.study_settings {
            self.next_upload_check =
                Some(now + settings.upload_data_file_frequency_seconds as i64);
        }
    }

    pub fn advance_survey_check(&mut self, now: i64) {
        if let Some(settings) = &self.study_settings {
            self.next_survey_check =
                Some(now + settings.check_for_new_surveys_freq_seconds as i64);
        }
    }

    pub fn advance_settings_check(&mut self, now: i64) {
        if self.study_settings.is_some() {
            self.next_settings_check = Some(now + self.settings_check_frequency as i64);
        }
    }
}

impl Record for Study {
    const KIND: &'static str = "study";

    fn record_id(&self) -> String {
        self.patient_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_checks_uses_each_frequency() {
        let settings = StudySettings {
            upload_data_file_frequency_seconds: 100,
            check_for_new_surveys_freq_seconds: 200,
            ..StudySettings::default()
        };
        let mut study = Study::new("p1", settings);
        study.settings_check_frequency = 300;

        study.schedule_checks(1_000);

        assert_eq!(study.next_upload_check, Some(1_100));
        assert_eq!(study.next_survey_check, Some(1_200));
        assert_eq!(study.next_settings_check, Some(1_300));
    }

    #[test]
    fn checks_stay_unset_without_settings() {
        let mut study = Study::new("p1", StudySettings::default());
        study.study_settings = None;
        study.schedule_checks(1_000);
        assert_eq!(study.next_upload_check, None);
        assert_eq!(study.next_settings_check, None);
    }
}
