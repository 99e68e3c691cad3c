use crate::models::Study;

/// Network work due on this wake, decided from the study's check times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferPlan {
    pub check_settings: bool,
    pub check_surveys: bool,
    /// `Some(process_only)` when an upload pass should run.
    pub upload: Option<bool>,
}

/// Decide and book-keep the periodic transfers for `now`.
///
/// Due checks have their next time advanced here. A survey or upload check
/// that comes due while unreachable is flagged as missed so the next
/// reachability change retries it before its timer would. Survey checks
/// take precedence over uploads on the same wake.
pub fn plan_transfers(study: &mut Study, now: i64, reachable: bool) -> TransferPlan {
    let mut plan = TransferPlan::default();
    if study.study_settings.is_none() {
        return plan;
    }

    if now > study.next_settings_check.unwrap_or(0) {
        study.advance_settings_check(now);
        plan.check_settings = reachable;
    }

    if now > study.next_survey_check.unwrap_or(0) || (reachable && study.missed_survey_check) {
        study.missed_survey_check = !reachable;
        study.advance_survey_check(now);
        plan.check_surveys = reachable;
    } else if now > study.next_upload_check.unwrap_or(0)
        || (reachable && study.missed_upload_check)
    {
        study.missed_upload_check = !reachable;
        study.advance_upload_check(now);
        plan.upload = Some(!reachable);
    }

    plan
}
