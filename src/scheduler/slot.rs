use super::DutyCycleService;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error};

/// A registered service plus its duty cycle.
pub struct ServiceSlot {
    on_duration_secs: u64,
    /// 0 means the slot stays on once started.
    off_duration_secs: u64,
    currently_on: bool,
    /// `None` means the slot never toggles again.
    next_toggle_time: Option<i64>,
    service: Box<dyn DutyCycleService>,
}

impl ServiceSlot {
    /// New slots start off and are due on the first tick.
    pub fn new(on_duration_secs: u64, off_duration_secs: u64, service: Box<dyn DutyCycleService>) -> Self {
        Self {
            // A zero-length on phase would make the slot due again immediately.
            on_duration_secs: on_duration_secs.max(1),
            off_duration_secs,
            currently_on: false,
            next_toggle_time: Some(i64::MIN),
            service,
        }
    }

    pub fn name(&self) -> &str {
        self.service.name()
    }

    pub fn currently_on(&self) -> bool {
        self.currently_on
    }

    pub fn next_toggle_time(&self) -> Option<i64> {
        self.next_toggle_time
    }

    pub fn is_due(&self, now: i64) -> bool {
        matches!(self.next_toggle_time, Some(at) if at <= now)
    }

    /// Flip the slot and compute its next toggle. A failing `start`/`pause`
    /// is logged; the schedule advances regardless.
    pub fn toggle(&mut self, now: i64) {
        if self.currently_on {
            if let Err(err) = self.service.pause() {
                log_error!("Pausing {} failed, skipping this tick: {err:?}", self.name());
            }
            self.currently_on = false;
            self.next_toggle_time = Some(now + self.off_duration_secs as i64);
        } else {
            if let Err(err) = self.service.start() {
                log_error!("Starting {} failed, skipping this tick: {err:?}", self.name());
            }
            self.currently_on = true;
            self.next_toggle_time = if self.off_duration_secs == 0 {
                None
            } else {
                Some(now + self.on_duration_secs as i64)
            };
        }
        log_debug!(
            "{} is now {}, next toggle {:?}",
            self.name(),
            if self.currently_on { "on" } else { "off" },
            self.next_toggle_time
        );
    }

    pub(super) fn service_mut(&mut self) -> &mut dyn DutyCycleService {
        self.service.as_mut()
    }
}
