//! Reconciles the server's survey definitions with local active-survey state.
//!
//! One pass:
//! 1. finalise expired incomplete surveys and reopen completed
//!    always-available ones,
//! 2. create, deliver and re-time an active survey per definition,
//! 3. drop completed surveys the server no longer lists,
//! 4. report the closest upcoming deadline and the badge count.
//!
//! Incomplete surveys are never dropped, so answers in progress survive a
//! retraction. Running the same pass twice at the same instant changes
//! nothing the second time.

use chrono::TimeZone;
use std::collections::{BTreeMap, HashSet};

use crate::models::{ActiveSurvey, NotificationHandle, Survey, SurveyType};

use super::events::{SurveyEvent, SurveyEventKind};
use super::schedule::next_occurrence;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

pub const DEFAULT_HORIZON_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub events: Vec<SurveyEvent>,
    /// Closest survey deadline; the scheduler wakes no later than this.
    pub next_wake: i64,
    /// Whether the active map changed and the study needs saving.
    pub modified: bool,
    pub badge_count: usize,
}

#[derive(Debug, Clone)]
pub struct SurveyReconciler {
    horizon_secs: i64,
}

impl Default for SurveyReconciler {
    fn default() -> Self {
        Self {
            horizon_secs: DEFAULT_HORIZON_SECS,
        }
    }
}

fn event(
    survey_id: &str,
    survey_type: Option<SurveyType>,
    kind: SurveyEventKind,
    notification: Option<NotificationHandle>,
) -> SurveyEvent {
    SurveyEvent {
        survey_id: survey_id.to_string(),
        survey_type,
        kind,
        notification,
    }
}

impl SurveyReconciler {
    pub fn reconcile<Tz: TimeZone>(
        &self,
        surveys: &[Survey],
        active: &mut BTreeMap<String, ActiveSurvey>,
        now: i64,
        tz: &Tz,
    ) -> ReconcileOutcome {
        let definitions: BTreeMap<&str, &Survey> = surveys
            .iter()
            .map(|survey| (survey.survey_id.as_str(), survey))
            .collect();
        let survey_type = |id: &str| definitions.get(id).map(|survey| survey.survey_type);

        let mut events = Vec::new();
        let mut modified = false;
        let mut closest = now + self.horizon_secs;

        for (id, tracked) in active.iter_mut() {
            let always_available = definitions
                .get(id.as_str())
                .map(|survey| survey.always_available)
                .unwrap_or(false);

            if always_available && tracked.is_complete {
                log_info!("Reopening always-available survey {id}");
                tracked.reset();
                events.push(event(id, survey_type(id.as_str()), SurveyEventKind::Reset, None));
                modified = true;
            } else if !tracked.is_complete && tracked.expires > 0 && tracked.expires <= now {
                log_info!("Active survey {id} expired, submitting");
                tracked.is_complete = true;
                events.push(event(
                    id,
                    survey_type(id.as_str()),
                    SurveyEventKind::Submitted {
                        pending_answers: tracked.pending_answers,
                    },
                    tracked.notification.take(),
                ));
                modified = true;
            }
        }

        let mut listed: HashSet<&str> = HashSet::new();
        for survey in surveys {
            let id = survey.survey_id.as_str();
            listed.insert(id);

            let next = next_occurrence(survey, now, tz);
            if let Some(at) = next {
                closest = closest.min(at);
            }

            if !active.contains_key(id)
                && (survey.trigger_on_first_download || next.is_some() || survey.always_available)
            {
                let mut created = ActiveSurvey::new(id);
                created.is_complete = true;
                // Unscheduled always-available surveys are handed out right away.
                created.expires = if survey.trigger_on_first_download {
                    now
                } else {
                    next.unwrap_or(now)
                };
                log_info!("Adding survey {id} to active surveys, expires {}", created.expires);
                active.insert(id.to_string(), created);
                modified = true;
            }

            let Some(tracked) = active.get_mut(id) else {
                continue;
            };

            if tracked.is_complete && tracked.expires > 0 && tracked.expires <= now {
                tracked.reset();
                tracked.received = tracked.expires;
                let handle = NotificationHandle::new();
                tracked.notification = Some(handle);
                log_info!("Delivering survey {id}");
                events.push(event(
                    id,
                    Some(survey.survey_type),
                    SurveyEventKind::Notified,
                    Some(handle),
                ));
                modified = true;
            }

            let scheduled = next.unwrap_or(0);
            if tracked.expires != scheduled {
                log_debug!("Re-timing survey {id}: {} -> {scheduled}", tracked.expires);
                tracked.expires = scheduled;
                modified = true;
            }
        }

        let retracted: Vec<String> = active
            .iter()
            .filter(|(id, tracked)| tracked.is_complete && !listed.contains(id.as_str()))
            .map(|(id, _)| id.clone())
            .collect();
        for id in retracted {
            if let Some(mut removed) = active.remove(&id) {
                log_info!("Removing retracted survey {id}");
                events.push(event(
                    &id,
                    None,
                    SurveyEventKind::Removed,
                    removed.notification.take(),
                ));
                modified = true;
            }
        }

        let mut badge_count = 0;
        for tracked in active.values().filter(|tracked| !tracked.is_complete) {
            if tracked.expires > 0 {
                closest = closest.min(tracked.expires);
            }
            badge_count += 1;
        }
        log_info!("Badge count: {badge_count}");

        ReconcileOutcome {
            events,
            next_wake: closest,
            modified,
            badge_count,
        }
    }
}
