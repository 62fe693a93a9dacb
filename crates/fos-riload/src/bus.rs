//! Event Bus
//!
//! Minimal topic-keyed publish/subscribe registry. Delivery is synchronous,
//! on the publisher's turn, in subscription order.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::error::Error;
use std::rc::Rc;

use crate::error::BusError;

/// Result returned by a subscriber
pub type SubscriberResult = Result<(), Box<dyn Error>>;

/// Zero-argument topic subscriber
pub type Subscriber = Rc<dyn Fn() -> SubscriberResult>;

/// What `publish` does when a subscriber fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Swallow the failure and keep delivering to the remaining subscribers.
    #[default]
    Isolate,
    /// Stop at the first failure and return it to the publisher.
    Propagate,
}

/// Topic registry
#[derive(Default)]
pub struct EventBus {
    topics: RefCell<HashMap<String, Vec<Subscriber>>>,
    policy: Cell<ErrorPolicy>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: ErrorPolicy) -> Self {
        Self {
            topics: RefCell::default(),
            policy: Cell::new(policy),
        }
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.policy.get()
    }

    pub fn set_policy(&self, policy: ErrorPolicy) {
        self.policy.set(policy);
    }

    /// Register `subscriber` for `topic`. Subscriptions accumulate; the same
    /// callback registered twice runs twice.
    pub fn subscribe<F>(&self, topic: &str, subscriber: F)
    where
        F: Fn() -> SubscriberResult + 'static,
    {
        self.topics
            .borrow_mut()
            .entry(topic.to_string())
            .or_default()
            .push(Rc::new(subscriber));
    }

    /// Number of subscribers registered for `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.borrow().get(topic).map_or(0, Vec::len)
    }

    /// Invoke every subscriber registered for `topic` when the call starts.
    ///
    /// Returns how many subscribers ran. Subscribers added during delivery
    /// are only seen by later publishes.
    pub fn publish(&self, topic: &str) -> Result<usize, BusError> {
        // Snapshot so subscribers may subscribe/publish re-entrantly.
        let subscribers = match self.topics.borrow().get(topic) {
            Some(list) => list.clone(),
            None => return Ok(0),
        };

        let mut delivered = 0;
        for subscriber in subscribers {
            delivered += 1;
            if let Err(err) = subscriber() {
                match self.policy.get() {
                    ErrorPolicy::Isolate => {
                        tracing::trace!("Subscriber of '{}' failed: {}", topic, err);
                    }
                    ErrorPolicy::Propagate => {
                        return Err(BusError::Subscriber {
                            topic: topic.to_string(),
                            message: err.to_string(),
                        });
                    }
                }
            }
        }

        Ok(delivered)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics = self.topics.borrow();
        let mut counts: Vec<(&str, usize)> =
            topics.iter().map(|(topic, subs)| (topic.as_str(), subs.len())).collect();
        counts.sort_unstable();
        f.debug_struct("EventBus")
            .field("topics", &counts)
            .field("policy", &self.policy.get())
            .finish()
    }
}
