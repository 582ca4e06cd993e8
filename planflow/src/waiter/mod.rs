//! Wait/notify: completion correlation between asynchronous units of work.
//!
//! A waiter registers a callback on a set of correlation ids; publishers
//! call [`WaitNotifyEngine::done_with`] once per id. The callback fires
//! exactly once, after every id has a response, whatever the arrival order.
//! Responses are recorded before waits are checked, so a wait registered
//! after its ids completed fires immediately. A second `done_with` for the
//! same id is a no-op.
//!
//! Waits registered under a scope (the engine uses the plan execution id)
//! can be released together once the scope ends, which cancels the waits
//! that never fired and forgets every response recorded for their ids.

mod response;

pub use response::{ResponseData, StepResponseNotifyData};

use crate::events::{EngineEvent, EventSink, NoOpEventSink};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Continuation invoked with the responses of every awaited id.
///
/// Runs on the thread that delivered the last response and must not block;
/// the engine's callbacks only hand work to the worker pool.
pub type NotifyCallback = Box<dyn FnOnce(HashMap<String, ResponseData>) + Send + 'static>;

struct WaitInstance {
    correlation_ids: Vec<String>,
    callback: Mutex<Option<NotifyCallback>>,
}

#[derive(Default)]
struct WaitScope {
    wait_ids: Vec<String>,
    correlation_ids: HashSet<String>,
}

/// In-process wait/notify engine.
pub struct WaitNotifyEngine {
    responses: DashMap<String, ResponseData>,
    waits: DashMap<String, Arc<WaitInstance>>,
    index: DashMap<String, Vec<String>>,
    listeners: DashMap<String, Vec<oneshot::Sender<ResponseData>>>,
    scopes: DashMap<String, WaitScope>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for WaitNotifyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitNotifyEngine")
            .field("responses", &self.responses.len())
            .field("pending_waits", &self.waits.len())
            .field("scopes", &self.scopes.len())
            .finish_non_exhaustive()
    }
}

impl Default for WaitNotifyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitNotifyEngine {
    /// Creates an engine that reports anomalies to nobody.
    #[must_use]
    pub fn new() -> Self {
        Self::with_event_sink(Arc::new(NoOpEventSink))
    }

    /// Creates an engine that reports dropped notifications to `events`.
    #[must_use]
    pub fn with_event_sink(events: Arc<dyn EventSink>) -> Self {
        Self {
            responses: DashMap::new(),
            waits: DashMap::new(),
            index: DashMap::new(),
            listeners: DashMap::new(),
            scopes: DashMap::new(),
            events,
        }
    }

    /// Registers `callback` to run once every id in `correlation_ids` has
    /// a response. Returns the wait id.
    pub fn register_wait(&self, correlation_ids: Vec<String>, callback: NotifyCallback) -> String {
        let wait_id = Uuid::now_v7().to_string();
        let instance = Arc::new(WaitInstance {
            correlation_ids: correlation_ids.clone(),
            callback: Mutex::new(Some(callback)),
        });

        self.waits.insert(wait_id.clone(), instance);
        for id in correlation_ids {
            self.index.entry(id).or_default().push(wait_id.clone());
        }
        tracing::debug!(wait_id = %wait_id, "Registered wait");

        self.check_wait(&wait_id);
        wait_id
    }

    /// Registers a wait that is released with `scope`.
    pub fn register_scoped_wait(
        &self,
        scope: &str,
        correlation_ids: Vec<String>,
        callback: NotifyCallback,
    ) -> String {
        self.scopes
            .entry(scope.to_string())
            .or_default()
            .correlation_ids
            .extend(correlation_ids.iter().cloned());
        let wait_id = self.register_wait(correlation_ids, callback);
        if self.is_pending(&wait_id) {
            if let Some(mut entry) = self.scopes.get_mut(scope) {
                entry.wait_ids.push(wait_id.clone());
            }
        }
        wait_id
    }

    /// Drops a wait without running its callback. Returns false if it had
    /// already fired or been cancelled.
    pub fn cancel_wait(&self, wait_id: &str) -> bool {
        let Some((_, instance)) = self.waits.remove(wait_id) else {
            return false;
        };
        self.unindex(wait_id, &instance.correlation_ids);
        instance.callback.lock().take();
        tracing::debug!(wait_id, "Cancelled wait");
        true
    }

    /// Cancels the pending waits of `scope` and forgets the responses of
    /// every id they covered. Returns how many waits were cancelled.
    ///
    /// A notification for one of those ids arriving later is recorded as
    /// new.
    pub fn release_scope(&self, scope: &str) -> usize {
        let Some((_, released)) = self.scopes.remove(scope) else {
            return 0;
        };
        let cancelled = released
            .wait_ids
            .iter()
            .filter(|wait_id| self.cancel_wait(wait_id))
            .count();
        for id in &released.correlation_ids {
            self.forget(id);
        }
        tracing::debug!(
            scope,
            cancelled,
            ids = released.correlation_ids.len(),
            "Released wait scope"
        );
        cancelled
    }

    /// Forgets the response and listeners of `correlation_id`. Pending
    /// listeners see their channel close.
    pub fn forget(&self, correlation_id: &str) {
        self.responses.remove(correlation_id);
        self.listeners.remove(correlation_id);
    }

    /// Publishes the response for `correlation_id`.
    ///
    /// Returns false and drops the payload if the id already has one.
    pub fn done_with(&self, correlation_id: &str, payload: ResponseData) -> bool {
        match self.responses.entry(correlation_id.to_string()) {
            Entry::Occupied(_) => {
                tracing::warn!(correlation_id, "Dropping duplicate notification");
                self.events.try_emit(&EngineEvent::CorrelationDropped {
                    correlation_id: correlation_id.to_string(),
                    reason: "duplicate notification".to_string(),
                });
                return false;
            }
            Entry::Vacant(slot) => {
                slot.insert(payload.clone());
            }
        }

        if let Some((_, senders)) = self.listeners.remove(correlation_id) {
            for sender in senders {
                let _ = sender.send(payload.clone());
            }
        }

        let wait_ids = self
            .index
            .get(correlation_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();
        for wait_id in wait_ids {
            self.check_wait(&wait_id);
        }
        true
    }

    /// Resolves with the response for `correlation_id`, immediately if it
    /// is already known.
    pub fn on_notify(&self, correlation_id: &str) -> oneshot::Receiver<ResponseData> {
        let (sender, receiver) = oneshot::channel();
        let mut listeners = self.listeners.entry(correlation_id.to_string()).or_default();
        // Checked under the listener entry lock so a concurrent done_with
        // either sees this sender or has already stored its response.
        if let Some(response) = self.responses.get(correlation_id) {
            let _ = sender.send(response.value().clone());
        } else {
            listeners.push(sender);
        }
        receiver
    }

    /// The response recorded for `correlation_id`.
    #[must_use]
    pub fn response(&self, correlation_id: &str) -> Option<ResponseData> {
        self.responses.get(correlation_id).map(|r| r.value().clone())
    }

    /// True if `correlation_id` has a response.
    #[must_use]
    pub fn is_done(&self, correlation_id: &str) -> bool {
        self.responses.contains_key(correlation_id)
    }

    /// Whether `wait_id` has neither fired nor been cancelled.
    #[must_use]
    pub fn is_pending(&self, wait_id: &str) -> bool {
        self.waits.contains_key(wait_id)
    }

    /// Number of waits that have not fired.
    #[must_use]
    pub fn pending_waits(&self) -> usize {
        self.waits.len()
    }

    fn check_wait(&self, wait_id: &str) {
        let Some(instance) = self.waits.get(wait_id).map(|w| Arc::clone(w.value())) else {
            return;
        };
        if !instance
            .correlation_ids
            .iter()
            .all(|id| self.responses.contains_key(id))
        {
            return;
        }

        // Removing the wait is the claim: only one caller gets it.
        if self.waits.remove(wait_id).is_none() {
            return;
        }

        let responses: HashMap<String, ResponseData> = instance
            .correlation_ids
            .iter()
            .filter_map(|id| self.responses.get(id).map(|r| (id.clone(), r.value().clone())))
            .collect();

        self.unindex(wait_id, &instance.correlation_ids);

        let callback = instance.callback.lock().take();
        if let Some(callback) = callback {
            tracing::debug!(wait_id, responses = responses.len(), "Wait resolved");
            callback(responses);
        }
    }

    fn unindex(&self, wait_id: &str, correlation_ids: &[String]) {
        for id in correlation_ids {
            if let Some(mut ids) = self.index.get_mut(id) {
                ids.retain(|w| w != wait_id);
            }
            self.index.remove_if(id, |_, ids| ids.is_empty());
        }
    }

    #[cfg(test)]
    pub(crate) fn retained_responses(&self) -> usize {
        self.responses.len()
    }
}
