//! Cooperative duty-cycle scheduler.
//!
//! Owns every [`ServiceSlot`] plus the survey/upload/settings deadlines and
//! reduces them to a single next wake time. [`runner`] turns that wake time
//! into the one outstanding timer.

pub mod runner;
pub mod service;
pub mod slot;

pub use runner::{duty_cycle_loop, WakeHandler};
pub use service::{DutyCycleService, ServiceFactory};
pub use slot::ServiceSlot;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::error::StudyError;
use crate::{log_error, log_info, log_warn};

pub const DEFAULT_IDLE_WAKE_SECS: i64 = 60 * 60;

/// Non-slot deadlines the wake time must never overshoot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckDeadlines {
    /// Closest survey delivery/expiry computed by the reconciler.
    pub survey_update: Option<i64>,
    pub survey_check: Option<i64>,
    pub upload_check: Option<i64>,
    pub settings_check: Option<i64>,
}

impl CheckDeadlines {
    fn earliest(&self) -> Option<i64> {
        [
            self.survey_update,
            self.survey_check,
            self.upload_check,
            self.settings_check,
        ]
        .into_iter()
        .flatten()
        .min()
    }
}

pub struct Scheduler {
    slots: Vec<ServiceSlot>,
    deadlines: CheckDeadlines,
    idle_wake_secs: i64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_WAKE_SECS)
    }
}

impl Scheduler {
    pub fn new(idle_wake_secs: i64) -> Self {
        Self {
            slots: Vec::new(),
            deadlines: CheckDeadlines::default(),
            idle_wake_secs: idle_wake_secs.max(1),
        }
    }

    /// Register a service. Returns `false`, and drops it, when `init` fails.
    pub fn register_service(
        &mut self,
        on_duration_secs: u64,
        off_duration_secs: u64,
        mut service: Box<dyn DutyCycleService>,
    ) -> bool {
        if !service.init() {
            let err = StudyError::ServiceInit {
                service: service.name().to_string(),
                reason: "init check failed".into(),
            };
            log_warn!("{err}; not scheduling it");
            return false;
        }
        log_info!(
            "Registered {} (on {}s, off {}s)",
            service.name(),
            on_duration_secs,
            off_duration_secs
        );
        self.slots
            .push(ServiceSlot::new(on_duration_secs, off_duration_secs, service));
        true
    }

    pub fn slots(&self) -> &[ServiceSlot] {
        &self.slots
    }

    pub fn deadlines(&self) -> CheckDeadlines {
        self.deadlines
    }

    pub fn set_survey_update(&mut self, at: i64) {
        self.deadlines.survey_update = Some(at);
    }

    pub fn set_check_times(
        &mut self,
        survey_check: Option<i64>,
        upload_check: Option<i64>,
        settings_check: Option<i64>,
    ) {
        self.deadlines.survey_check = survey_check;
        self.deadlines.upload_check = upload_check;
        self.deadlines.settings_check = settings_check;
    }

    /// Toggle every due slot, then return the next wake time.
    pub fn tick(&mut self, now: i64) -> i64 {
        for slot in self.slots.iter_mut().filter(|slot| slot.is_due(now)) {
            slot.toggle(now);
        }
        self.next_wake(now)
    }

    /// Earliest pending deadline, never before `now`. Falls back to the idle
    /// interval when nothing is pending.
    pub fn next_wake(&self, now: i64) -> i64 {
        let slot_min = self
            .slots
            .iter()
            .filter_map(ServiceSlot::next_toggle_time)
            .min();

        let earliest = [slot_min, self.deadlines.earliest()]
            .into_iter()
            .flatten()
            .fold(now + self.idle_wake_secs, i64::min);

        earliest.max(now)
    }

    /// Pause every running slot, then finish each one in registration order,
    /// then drop them all.
    pub async fn stop_all(&mut self) {
        for slot in self.slots.iter_mut().filter(|slot| slot.currently_on()) {
            if let Err(err) = slot.service_mut().pause() {
                log_error!("Pausing {} during shutdown failed: {err:?}", slot.name());
            }
        }

        for slot in self.slots.iter_mut() {
            let name = slot.name().to_string();
            match slot.service_mut().finish().await {
                Ok(()) => log_info!("Finished {name}"),
                Err(err) => log_error!("Finishing {name} failed: {err:?}"),
            }
        }

        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Journal(Arc<Mutex<Vec<String>>>);

    impl Journal {
        fn push(&self, entry: String) {
            self.0.lock().unwrap().push(entry);
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct FakeService {
        name: String,
        init_ok: bool,
        fail_start: bool,
        fail_pause: bool,
        journal: Journal,
    }

    impl FakeService {
        fn boxed(name: &str, journal: &Journal) -> Box<dyn DutyCycleService> {
            Box::new(Self {
                name: name.into(),
                init_ok: true,
                fail_start: false,
                fail_pause: false,
                journal: journal.clone(),
            })
        }
    }

    #[async_trait]
    impl DutyCycleService for FakeService {
        fn name(&self) -> &str {
            &self.name
        }

        fn init(&mut self) -> bool {
            self.init_ok
        }

        fn start(&mut self) -> Result<()> {
            self.journal.push(format!("start {}", self.name));
            if self.fail_start {
                return Err(anyhow!("sensor unavailable"));
            }
            Ok(())
        }

        fn pause(&mut self) -> Result<()> {
            self.journal.push(format!("pause {}", self.name));
            if self.fail_pause {
                return Err(anyhow!("sensor stuck"));
            }
            Ok(())
        }

        async fn finish(&mut self) -> Result<()> {
            tokio::task::yield_now().await;
            self.journal.push(format!("finish {}", self.name));
            Ok(())
        }
    }

    #[test]
    fn duty_cycle_alternates_on_and_off() {
        let journal = Journal::default();
        let mut scheduler = Scheduler::default();
        assert!(scheduler.register_service(10, 20, FakeService::boxed("accel", &journal)));

        assert_eq!(scheduler.tick(0), 10);
        assert!(scheduler.slots()[0].currently_on());

        assert_eq!(scheduler.tick(10), 30);
        assert!(!scheduler.slots()[0].currently_on());

        assert_eq!(scheduler.tick(30), 40);
        assert!(scheduler.slots()[0].currently_on());

        assert_eq!(
            journal.entries(),
            vec!["start accel", "pause accel", "start accel"]
        );
    }

    #[test]
    fn zero_off_duration_runs_forever() {
        let journal = Journal::default();
        let mut scheduler = Scheduler::new(3600);
        scheduler.register_service(1, 0, FakeService::boxed("power", &journal));

        let wake = scheduler.tick(100);

        let slot = &scheduler.slots()[0];
        assert!(slot.currently_on());
        assert_eq!(slot.next_toggle_time(), None);
        assert_eq!(wake, 100 + 3600);

        scheduler.tick(100_000);
        assert!(scheduler.slots()[0].currently_on());
        assert_eq!(journal.entries(), vec!["start power"]);
    }

    #[test]
    fn failed_init_is_not_registered() {
        let journal = Journal::default();
        let mut scheduler = Scheduler::default();
        let service = Box::new(FakeService {
            name: "gps".into(),
            init_ok: false,
            fail_start: false,
            fail_pause: false,
            journal,
        });
        assert!(!scheduler.register_service(60, 60, service));
        assert!(scheduler.slots().is_empty());
    }

    #[test]
    fn failing_start_still_advances_the_slot() {
        let journal = Journal::default();
        let mut scheduler = Scheduler::default();
        scheduler.register_service(
            5,
            5,
            Box::new(FakeService {
                name: "gyro".into(),
                init_ok: true,
                fail_start: true,
                fail_pause: false,
                journal: journal.clone(),
            }),
        );
        scheduler.register_service(7, 7, FakeService::boxed("mag", &journal));

        let wake = scheduler.tick(0);

        assert_eq!(wake, 5);
        assert_eq!(scheduler.slots()[0].next_toggle_time(), Some(5));
        assert_eq!(scheduler.slots()[1].next_toggle_time(), Some(7));
        assert!(scheduler.slots()[1].currently_on());
    }

    #[test]
    fn failing_pause_still_switches_the_slot_off() {
        let journal = Journal::default();
        let mut scheduler = Scheduler::default();
        scheduler.register_service(
            10,
            20,
            Box::new(FakeService {
                name: "accel".into(),
                init_ok: true,
                fail_start: false,
                fail_pause: true,
                journal: journal.clone(),
            }),
        );
        scheduler.tick(0);

        let wake = scheduler.tick(10);

        let slot = &scheduler.slots()[0];
        assert!(!slot.currently_on());
        assert_eq!(slot.next_toggle_time(), Some(30));
        assert_eq!(wake, 30);
        assert_eq!(journal.entries(), vec!["start accel", "pause accel"]);
    }

    #[test]
    fn due_slots_end_strictly_after_now() {
        let journal = Journal::default();
        let mut scheduler = Scheduler::default();
        scheduler.register_service(3, 9, FakeService::boxed("a", &journal));
        scheduler.register_service(4, 0, FakeService::boxed("b", &journal));
        scheduler.register_service(0, 2, FakeService::boxed("c", &journal));

        for now in [0, 3, 4, 12, 13, 50] {
            let due: Vec<bool> = scheduler.slots().iter().map(|s| s.is_due(now)).collect();
            let before: Vec<bool> = scheduler.slots().iter().map(|s| s.currently_on()).collect();
            scheduler.tick(now);
            for (idx, slot) in scheduler.slots().iter().enumerate() {
                if !due[idx] {
                    continue;
                }
                assert_ne!(slot.currently_on(), before[idx]);
                match slot.next_toggle_time() {
                    Some(at) => assert!(at > now),
                    None => assert!(slot.currently_on()),
                }
            }
        }
    }

    #[test]
    fn wake_is_floored_by_check_deadlines() {
        let journal = Journal::default();
        let mut scheduler = Scheduler::new(3600);
        scheduler.register_service(100, 100, FakeService::boxed("gps", &journal));
        scheduler.set_survey_update(1_050);
        scheduler.set_check_times(Some(2_000), Some(1_020), None);

        assert_eq!(scheduler.tick(1_000), 1_020);

        scheduler.set_check_times(Some(2_000), None, None);
        assert_eq!(scheduler.next_wake(1_000), 1_050);
    }

    #[test]
    fn wake_never_precedes_now() {
        let mut scheduler = Scheduler::new(3600);
        scheduler.set_check_times(Some(10), Some(20), Some(30));
        assert_eq!(scheduler.next_wake(500), 500);
        assert_eq!(Scheduler::new(60).next_wake(500), 560);
    }

    #[tokio::test]
    async fn stop_all_pauses_then_finishes_in_order() {
        let journal = Journal::default();
        let mut scheduler = Scheduler::default();
        scheduler.register_service(10, 10, FakeService::boxed("first", &journal));
        scheduler.register_service(10, 10, FakeService::boxed("second", &journal));
        scheduler.tick(0);

        scheduler.stop_all().await;

        assert!(scheduler.slots().is_empty());
        assert_eq!(
            journal.entries(),
            vec![
                "start first",
                "start second",
                "pause first",
                "pause second",
                "finish first",
                "finish second"
            ]
        );
    }

    #[tokio::test]
    async fn stop_all_skips_pausing_slots_that_are_off() {
        let journal = Journal::default();
        let mut scheduler = Scheduler::default();
        scheduler.register_service(10, 20, FakeService::boxed("cycled", &journal));
        scheduler.tick(0);
        scheduler.tick(10);
        scheduler.register_service(10, 20, FakeService::boxed("fresh", &journal));

        scheduler.stop_all().await;

        assert_eq!(
            journal.entries(),
            vec!["start cycled", "pause cycled", "finish cycled", "finish fresh"]
        );
    }
}
