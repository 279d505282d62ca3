/*!
 * Engine event publisher for front-end consumption
 *
 * The orchestrator emits progress, status-line, pause-state and completion
 * events through a publish-subscribe channel; any consumer (CLI renderer,
 * GUI, tests) drains them from the subscriber side. A no-op publisher is
 * available for headless runs.
 */

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Terminal result of a backup or validation run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    Error,
    Canceled,
}

impl ExitCode {
    /// Numeric code reported to the operating system
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Error => 1,
            Self::Canceled => 2,
        }
    }
}

/// Events the engine publishes between and during stages
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Overall progress in percent (0–100)
    Progress(u8),
    /// Compact statistics line for a status bar
    Status(String),
    /// Pause state transition
    PauseChanged(bool),
    /// Run finished with the given exit code
    Finished(ExitCode),
}

/// Event publisher handed to the engine
#[derive(Clone)]
pub struct EventPublisher {
    sender: Option<Sender<EngineEvent>>,
}

impl EventPublisher {
    /// Create a connected publisher/subscriber pair
    pub fn channel() -> (Self, EventSubscriber) {
        let (tx, rx) = unbounded();
        (
            EventPublisher { sender: Some(tx) },
            EventSubscriber { receiver: rx },
        )
    }

    /// Publisher that drops every event
    pub fn noop() -> Self {
        EventPublisher { sender: None }
    }

    pub fn publish(&self, event: EngineEvent) {
        if let Some(ref tx) = self.sender {
            // Subscriber may have gone away; events are advisory
            let _ = tx.send(event);
        }
    }

    pub fn progress(&self, percent: u8) {
        self.publish(EngineEvent::Progress(percent.min(100)));
    }

    pub fn status(&self, line: String) {
        self.publish(EngineEvent::Status(line));
    }

    pub fn pause_changed(&self, paused: bool) {
        self.publish(EngineEvent::PauseChanged(paused));
    }

    pub fn finished(&self, code: ExitCode) {
        self.publish(EngineEvent::Finished(code));
    }
}

/// Receiving side for front-ends
pub struct EventSubscriber {
    receiver: Receiver<EngineEvent>,
}

impl EventSubscriber {
    pub fn receiver(&self) -> &Receiver<EngineEvent> {
        &self.receiver
    }

    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn recv(&self) -> Option<EngineEvent> {
        self.receiver.recv().ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = EngineEvent> + '_ {
        self.receiver.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::Error.code(), 1);
        assert_eq!(ExitCode::Canceled.code(), 2);
    }

    #[test]
    fn test_publish_and_receive() {
        let (publisher, subscriber) = EventPublisher::channel();

        publisher.progress(42);
        publisher.status("stage 1/5".to_string());
        publisher.pause_changed(true);
        publisher.finished(ExitCode::Success);

        let events: Vec<_> = subscriber.receiver().try_iter().collect();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], EngineEvent::Progress(42)));
        assert!(matches!(events[1], EngineEvent::Status(ref s) if s == "stage 1/5"));
        assert!(matches!(events[2], EngineEvent::PauseChanged(true)));
        assert!(matches!(events[3], EngineEvent::Finished(ExitCode::Success)));
    }

    #[test]
    fn test_progress_clamped_to_100() {
        let (publisher, subscriber) = EventPublisher::channel();
        publisher.progress(250);
        assert!(matches!(
            subscriber.try_recv().unwrap(),
            EngineEvent::Progress(100)
        ));
    }

    #[test]
    fn test_noop_publisher_never_panics() {
        let publisher = EventPublisher::noop();
        publisher.progress(10);
        publisher.finished(ExitCode::Error);
    }

    #[test]
    fn test_publish_after_subscriber_dropped() {
        let (publisher, subscriber) = EventPublisher::channel();
        drop(subscriber);
        publisher.progress(10);
    }
}
