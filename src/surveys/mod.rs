pub mod events;
pub mod reconciler;
pub mod schedule;

pub use events::{EventBus, LifecycleEvent, SurveyEvent, SurveyEventKind};
pub use reconciler::{ReconcileOutcome, SurveyReconciler, DEFAULT_HORIZON_SECS};
pub use schedule::next_occurrence;
