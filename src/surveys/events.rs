//! Observer channel for survey lifecycle changes. The UI collaborator
//! subscribes; the core never depends on who listens.

use tokio::sync::broadcast;

use crate::models::{NotificationHandle, SurveyType};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurveyEventKind {
    /// An incomplete survey passed its deadline and was finalised.
    Submitted { pending_answers: u32 },
    /// A new occurrence became due and was delivered.
    Notified,
    /// An always-available survey was reopened after completion.
    Reset,
    /// The server no longer lists this survey and it was already complete.
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurveyEvent {
    pub survey_id: String,
    /// `None` when the definition is gone (retracted surveys).
    pub survey_type: Option<SurveyType>,
    pub kind: SurveyEventKind,
    pub notification: Option<NotificationHandle>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Survey(SurveyEvent),
    BadgeChanged(usize),
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Fan out to current subscribers. Having none is not an error.
    pub fn publish(&self, event: LifecycleEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(LifecycleEvent::BadgeChanged(2));

        assert_eq!(rx.recv().await.unwrap(), LifecycleEvent::BadgeChanged(2));
    }

    #[test]
    fn publishing_without_subscribers_is_silent() {
        EventBus::new().publish(LifecycleEvent::BadgeChanged(0));
    }
}
