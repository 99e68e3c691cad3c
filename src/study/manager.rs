use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Local;
use log::{error, info, warn};
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
    time::Duration,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::AppConfig,
    db::{delete_record, query_all, save_record, RecordStore},
    models::{DataStream, Study},
    network::{NetworkGate, Reachability, Transport},
    scheduler::{duty_cycle_loop, Scheduler, ServiceFactory, WakeHandler},
    storage::{AppEventLog, StorageLayout},
    surveys::{EventBus, LifecycleEvent, SurveyEvent, SurveyEventKind, SurveyReconciler},
    upload::{QuotaEvictor, UploadPipeline, UploadReport},
};

use super::settings_sync::reconcile_settings;
use super::transfers::plan_transfers;

/// Retry interval for survey updates while no study is loaded.
const NO_STUDY_RETRY_SECS: i64 = 15 * 60;

struct DutyLoop {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Top-level orchestrator. One instance per process, shared as `Arc`.
///
/// Lock order: `study` before `scheduler`, never the reverse.
pub struct StudyManager {
    config: AppConfig,
    store: Arc<dyn RecordStore>,
    transport: Arc<dyn Transport>,
    storage: Arc<StorageLayout>,
    factory: Arc<dyn ServiceFactory>,
    study: Mutex<Option<Study>>,
    scheduler: Mutex<Scheduler>,
    uploader: UploadPipeline,
    reconciler: SurveyReconciler,
    events: EventBus,
    app_log: AppEventLog,
    reachability: watch::Receiver<Reachability>,
    services_running: AtomicBool,
    duty_loop: Mutex<Option<DutyLoop>>,
}

impl StudyManager {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn RecordStore>,
        transport: Arc<dyn Transport>,
        storage: Arc<StorageLayout>,
        factory: Arc<dyn ServiceFactory>,
        reachability: watch::Receiver<Reachability>,
    ) -> Self {
        let app_log = AppEventLog::new(storage.clone());
        let uploader = UploadPipeline::new(
            store.clone(),
            storage.clone(),
            transport.clone(),
            QuotaEvictor::new(config.max_upload_bytes, config.evictable_extension.clone()),
            app_log.clone(),
        );
        let idle_wake_secs = i64::try_from(config.idle_wake_seconds).unwrap_or(i64::MAX);

        Self {
            config,
            store,
            transport,
            storage,
            factory,
            study: Mutex::new(None),
            scheduler: Mutex::new(Scheduler::new(idle_wake_secs)),
            uploader,
            reconciler: SurveyReconciler::default(),
            events: EventBus::new(),
            app_log,
            reachability,
            services_running: AtomicBool::new(false),
            duty_loop: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub fn services_running(&self) -> bool {
        self.services_running.load(Ordering::Acquire)
    }

    pub async fn study_snapshot(&self) -> Option<Study> {
        self.study.lock().await.clone()
    }

    pub async fn is_study_loaded(&self) -> bool {
        self.study.lock().await.is_some()
    }

    async fn save(&self, study: &Study) -> Result<()> {
        save_record(self.store.as_ref(), study)
            .await
            .with_context(|| format!("failed to save study {}", study.patient_id))
    }

    /// Load the persisted study, if any. More than one is an error condition;
    /// the first is used.
    pub async fn load_default_study(&self) -> Result<bool> {
        let studies: Vec<Study> = query_all(self.store.as_ref())
            .await
            .context("failed to load studies")?;
        if studies.len() > 1 {
            error!("Multiple studies persisted ({}), using the first", studies.len());
        }

        let loaded = studies.into_iter().next();
        if let Some(study) = &loaded {
            info!("Loaded study for {}", study.patient_id);
            self.app_log.bind_patient(&study.patient_id);
        }
        let found = loaded.is_some();
        *self.study.lock().await = loaded;
        Ok(found)
    }

    /// Persist and load a freshly registered study.
    pub async fn install_study(&self, study: Study) -> Result<()> {
        self.save(&study).await?;
        self.app_log.bind_patient(&study.patient_id);
        *self.study.lock().await = Some(study);
        Ok(())
    }

    /// Record consent, arm all periodic checks, and fetch surveys.
    pub async fn set_consented(&self, now: i64) -> Result<bool> {
        {
            let mut guard = self.study.lock().await;
            let Some(study) = guard.as_mut() else {
                return Ok(false);
            };
            if study.study_settings.is_none() {
                return Ok(false);
            }
            study.schedule_checks(now);
            study.participant_consented = true;
            self.storage.create_directories()?;
            self.save(study).await?;
        }
        Ok(self.check_surveys(now).await)
    }

    /// Register every enabled stream and start the duty-cycle loop. Calling
    /// again while services run does nothing.
    pub async fn start_study_data_services(self: &Arc<Self>) -> Result<()> {
        if self.services_running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let Some(study) = self.study_snapshot().await else {
            self.services_running.store(false, Ordering::Release);
            bail!("no study loaded");
        };

        self.storage.create_directories()?;
        if let Err(err) = self.storage.prepare_for_upload() {
            warn!("Could not rotate leftover files: {err:?}");
        }

        {
            let mut scheduler = self.scheduler.lock().await;
            self.register_services(&mut scheduler, &study);
        }

        let cancel = CancellationToken::new();
        let min_delay = Duration::from_secs(self.config.min_timer_seconds.max(1));
        let handle = tokio::spawn(duty_cycle_loop(
            self.clone(),
            self.reachability.clone(),
            cancel.clone(),
            min_delay,
        ));
        *self.duty_loop.lock().await = Some(DutyLoop { handle, cancel });
        info!("Study data services started for {}", study.patient_id);
        Ok(())
    }

    fn register_services(&self, scheduler: &mut Scheduler, study: &Study) {
        let Some(settings) = &study.study_settings else {
            return;
        };

        self.app_log.bind_patient(&study.patient_id);
        scheduler.register_service(1, 0, Box::new(self.app_log.clone()));

        for stream in DataStream::ALL {
            let stream_settings = settings.stream(stream);
            if !stream_settings.enabled {
                continue;
            }
            let (on, off) = if stream.is_duty_cycled() {
                if stream_settings.on_duration_seconds == 0 {
                    continue;
                }
                (
                    stream_settings.on_duration_seconds,
                    stream_settings.off_duration_seconds,
                )
            } else {
                (1, 0)
            };

            match self.factory.create(stream, &self.storage, &study.patient_id) {
                Some(service) => {
                    info!("Preparing {} for data collection", stream.as_str());
                    scheduler.register_service(on, off, service);
                }
                None => warn!("No collector available for {}", stream.as_str()),
            }
        }
    }

    async fn stop_duty_loop(&self) -> Result<()> {
        let Some(duty_loop) = self.duty_loop.lock().await.take() else {
            return Ok(());
        };
        duty_loop.cancel.cancel();
        duty_loop
            .handle
            .await
            .context("duty cycle loop failed to join")
    }

    async fn stop_services(&self) -> Result<()> {
        self.stop_duty_loop().await?;
        self.scheduler.lock().await.stop_all().await;
        self.services_running.store(false, Ordering::Release);
        Ok(())
    }

    /// Stop collection and unload the study. Persisted state is kept.
    pub async fn stop(&self) -> Result<()> {
        self.stop_services().await?;
        *self.study.lock().await = None;
        info!("Study stopped");
        Ok(())
    }

    /// Stop collection, wait for every service to finish, then delete all
    /// persisted studies and study files.
    pub async fn leave_study(&self) -> Result<()> {
        self.stop_services().await?;

        let studies: Vec<Study> = query_all(self.store.as_ref()).await?;
        for study in &studies {
            delete_record(self.store.as_ref(), study)
                .await
                .with_context(|| format!("failed to delete study {}", study.patient_id))?;
        }
        let removed = self.storage.remove_all_study_files().await?;
        *self.study.lock().await = None;
        info!(
            "Left study: {} records and {removed} files removed",
            studies.len()
        );
        Ok(())
    }

    /// Hook for the survey UI: finalise `survey_id` with `answers` entered.
    pub async fn complete_survey(&self, survey_id: &str, answers: u32, now: i64) -> Result<bool> {
        {
            let mut guard = self.study.lock().await;
            let Some(study) = guard.as_mut() else {
                return Ok(false);
            };
            let survey_type = study.survey(survey_id).map(|survey| survey.survey_type);
            let Some(active) = study.active_surveys.get_mut(survey_id) else {
                return Ok(false);
            };
            if active.is_complete {
                return Ok(false);
            }

            active.is_complete = true;
            active.pending_answers = answers;
            let event = SurveyEvent {
                survey_id: survey_id.to_string(),
                survey_type,
                kind: SurveyEventKind::Submitted {
                    pending_answers: answers,
                },
                notification: active.notification.take(),
            };
            apply_counters(study, &event);
            self.events.publish(LifecycleEvent::Survey(event));
            self.save(study).await?;
        }

        self.update_active_surveys(now).await;
        Ok(true)
    }

    /// Run the due settings/survey/upload work for `now`.
    pub async fn periodic_network_transfers(&self, now: i64) {
        let reachability = *self.reachability.borrow();

        let plan = {
            let mut guard = self.study.lock().await;
            let Some(study) = guard.as_mut() else {
                return;
            };
            let reachable = NetworkGate::should_proceed(reachability, study.upload_over_cellular());
            let before = study.clone();
            let plan = plan_transfers(study, now, reachable);
            if *study != before {
                if let Err(err) = self.save(study).await {
                    error!("{err:?}");
                }
            }
            plan
        };

        if plan.check_settings {
            self.check_settings(now).await;
        }
        if plan.check_surveys {
            self.check_surveys(now).await;
        }
        if let Some(process_only) = plan.upload {
            let report = self.uploader.upload(process_only).await;
            self.record_upload(&report, now).await;
        }
    }

    async fn record_upload(&self, report: &UploadReport, now: i64) {
        if report.skipped || !report.completed {
            return;
        }
        for failure in &report.failures {
            warn!("Upload pass: {failure}");
        }
        let mut guard = self.study.lock().await;
        if let Some(study) = guard.as_mut() {
            study.last_upload_success = Some(now);
            if let Err(err) = self.save(study).await {
                error!("{err:?}");
            }
        }
    }

    /// Fetch survey definitions, replace the study's list, and reconcile.
    /// Returns `false` and leaves state untouched when the fetch fails.
    pub async fn check_surveys(&self, now: i64) -> bool {
        {
            let guard = self.study.lock().await;
            let Some(study) = guard.as_ref().filter(|study| study.study_settings.is_some()) else {
                return false;
            };
            if let Err(err) = self.save(study).await {
                error!("{err:?}");
                return false;
            }
        }

        info!("Checking for surveys");
        let surveys = match self.transport.fetch_surveys().await {
            Ok(surveys) => surveys,
            Err(err) => {
                warn!("Survey download failed: {err:#}");
                return false;
            }
        };

        {
            let mut guard = self.study.lock().await;
            let Some(study) = guard.as_mut() else {
                return false;
            };
            info!("Received {} surveys", surveys.len());
            study.surveys = surveys;
            if let Err(err) = self.save(study).await {
                error!("{err:?}");
                return false;
            }
        }

        self.update_active_surveys(now).await;
        true
    }

    /// Fetch device settings and apply permission changes. Running services
    /// are re-registered when a stream flipped.
    pub async fn check_settings(&self, now: i64) -> bool {
        {
            let guard = self.study.lock().await;
            let Some(study) = guard.as_ref().filter(|study| study.study_settings.is_some()) else {
                return false;
            };
            if let Err(err) = self.save(study).await {
                error!("{err:?}");
                return false;
            }
        }

        info!("Checking settings");
        let device = match self.transport.fetch_settings().await {
            Ok(device) => device,
            Err(err) => {
                warn!("Settings download failed: {err:#}");
                return false;
            }
        };

        let changes = {
            let mut guard = self.study.lock().await;
            let Some(study) = guard.as_mut() else {
                return false;
            };
            let changes = reconcile_settings(study, device);
            study.advance_settings_check(now);
            if let Err(err) = self.save(study).await {
                error!("{err:?}");
                return false;
            }
            changes
        };

        if !changes.is_empty() && self.services_running() {
            info!("{} stream settings changed, restarting services", changes.len());
            self.restart_services().await;
        }
        true
    }

    async fn restart_services(&self) {
        let Some(study) = self.study_snapshot().await else {
            return;
        };
        let mut scheduler = self.scheduler.lock().await;
        scheduler.stop_all().await;
        self.register_services(&mut scheduler, &study);
    }

    /// Reconcile active surveys, publish lifecycle events and the badge, and
    /// return the next survey deadline.
    pub async fn update_active_surveys(&self, now: i64) -> i64 {
        let mut guard = self.study.lock().await;
        let Some(study) = guard.as_mut() else {
            return now + NO_STUDY_RETRY_SECS;
        };

        let outcome =
            self.reconciler
                .reconcile(&study.surveys, &mut study.active_surveys, now, &Local);
        for event in outcome.events {
            apply_counters(study, &event);
            self.events.publish(LifecycleEvent::Survey(event));
        }
        self.events
            .publish(LifecycleEvent::BadgeChanged(outcome.badge_count));

        if outcome.modified {
            if let Err(err) = self.save(study).await {
                error!("{err:?}");
            }
        }

        self.scheduler
            .lock()
            .await
            .set_survey_update(outcome.next_wake);
        outcome.next_wake
    }

    /// Copy the study's check times into the scheduler and compute the wake.
    async fn rearm(&self, now: i64) -> i64 {
        let guard = self.study.lock().await;
        let mut scheduler = self.scheduler.lock().await;
        if let Some(study) = guard.as_ref() {
            scheduler.set_check_times(
                study.next_survey_check,
                study.next_upload_check,
                study.next_settings_check,
            );
        }
        let next = scheduler.next_wake(now);
        let seconds = (next - now).to_string();
        self.app_log
            .log_event("set_timer", &format!("Set timer for {seconds} seconds"), &seconds);
        next
    }
}

fn apply_counters(study: &mut Study, event: &SurveyEvent) {
    let Some(survey_type) = event.survey_type else {
        return;
    };
    match event.kind {
        SurveyEventKind::Submitted { pending_answers } if pending_answers > 0 => {
            study.record_submitted(survey_type)
        }
        SurveyEventKind::Notified => study.record_received(survey_type),
        _ => {}
    }
}

#[async_trait]
impl WakeHandler for StudyManager {
    async fn on_wake(&self, now: i64) -> i64 {
        self.app_log.log_event("poll_service", "Polling service", "");
        self.scheduler.lock().await.tick(now);

        self.periodic_network_transfers(now).await;

        let survey_update = self.scheduler.lock().await.deadlines().survey_update;
        if now > survey_update.unwrap_or(0) {
            self.update_active_surveys(now).await;
        }

        self.rearm(now).await
    }

    async fn on_reachability_changed(&self, now: i64) -> i64 {
        info!("Reachability changed, running periodic transfers");
        self.periodic_network_transfers(now).await;
        self.rearm(now).await
    }
}

impl std::fmt::Debug for StudyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StudyManager")
            .field("services_running", &self.services_running())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActiveSurvey, StudySettings, Survey, SurveyType};

    #[test]
    fn counters_follow_submitted_and_notified_events() {
        let mut study = Study::new("p1", StudySettings::default());
        let event = |kind| SurveyEvent {
            survey_id: "s".into(),
            survey_type: Some(SurveyType::Audio),
            kind,
            notification: None,
        };

        apply_counters(&mut study, &event(SurveyEventKind::Notified));
        apply_counters(&mut study, &event(SurveyEventKind::Submitted { pending_answers: 0 }));
        apply_counters(&mut study, &event(SurveyEventKind::Submitted { pending_answers: 3 }));
        apply_counters(&mut study, &event(SurveyEventKind::Removed));

        assert_eq!(study.received_audio_surveys, 1);
        assert_eq!(study.submitted_audio_surveys, 1);
        assert_eq!(study.received_tracking_surveys, 0);
    }

    #[test]
    fn unknown_survey_type_leaves_counters_alone() {
        let mut study = Study::new("p1", StudySettings::default());
        study.surveys.push(Survey::new("s", SurveyType::Tracking));
        study.active_surveys.insert("s".into(), ActiveSurvey::new("s"));

        apply_counters(
            &mut study,
            &SurveyEvent {
                survey_id: "gone".into(),
                survey_type: None,
                kind: SurveyEventKind::Notified,
                notification: None,
            },
        );

        assert_eq!(study.received_tracking_surveys, 0);
    }
}
