//! The fuzzer's synchronous event bus (§4.10, §5 "Events bus"):
//! subscriptions are fixed before workers start; publish calls every
//! subscriber in the publishing thread, and a subscriber error fails the
//! whole campaign rather than being swallowed.

use primitive_types::H160;

use crate::error::{ProviderError, Result};
use crate::providers::TestCase;

#[derive(Debug, Clone)]
pub enum Event {
    FuzzerStarting,
    FuzzerStopping,
    WorkerCreated { worker_id: usize },
    WorkerDestroyed { worker_id: usize },
    ContractDeploymentAdded { address: H160, name: String },
    ContractDeploymentRemoved { address: H160 },
    TestResultRecorded { test_case: TestCase },
}

pub trait EventSubscriber: Send {
    fn handle(&mut self, event: &Event) -> Result<()>;
}

#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Box<dyn EventSubscriber>>,
    started: bool,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber. Per §5, this must happen before the
    /// campaign starts; calling it afterwards is a programming error.
    pub fn subscribe(&mut self, subscriber: Box<dyn EventSubscriber>) {
        assert!(!self.started, "subscribers must be registered before the campaign starts");
        self.subscribers.push(subscriber);
    }

    pub fn mark_started(&mut self) {
        self.started = true;
    }

    /// Publishes `event` to every subscriber in registration order. The
    /// first subscriber error aborts delivery to the rest and propagates
    /// to the caller, per §4.10's "subscriber errors propagate up and fail
    /// the campaign".
    pub fn publish(&mut self, event: Event) -> Result<()> {
        for subscriber in &mut self.subscribers {
            subscriber
                .handle(&event)
                .map_err(|e| ProviderError::Fatal("event subscriber".into(), e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingSubscriber {
        count: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    impl EventSubscriber for CountingSubscriber {
        fn handle(&mut self, _event: &Event) -> Result<()> {
            self.count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn publish_reaches_every_subscriber() {
        let mut bus = EventBus::new();
        let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        bus.subscribe(Box::new(CountingSubscriber { count: count.clone() }));
        bus.subscribe(Box::new(CountingSubscriber { count: count.clone() }));
        bus.publish(Event::FuzzerStarting).unwrap();
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    struct FailingSubscriber;
    impl EventSubscriber for FailingSubscriber {
        fn handle(&mut self, _event: &Event) -> Result<()> {
            Err(ProviderError::Fatal("test".into(), "boom".into()).into())
        }
    }

    #[test]
    fn a_failing_subscriber_propagates_the_error() {
        let mut bus = EventBus::new();
        bus.subscribe(Box::new(FailingSubscriber));
        assert!(bus.publish(Event::FuzzerStopping).is_err());
    }
}
