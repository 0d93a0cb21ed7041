//! Completion events
//!
//! An event is recorded on a stream and signals once the stream reaches that
//! point. Every record bumps a generation counter; a wait captures the
//! generation current at wait-call time, so re-recording an event never moves
//! an earlier wait. An event that was never recorded is already complete.

use super::next_object_id;
use carrack_core::{CarrackError, Result};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Default)]
struct EventState {
    recorded: u64,
    completed: u64,
    failure: Option<CarrackError>,
}

struct EventInner {
    id: u64,
    state: watch::Sender<EventState>,
}

/// Device-side completion marker
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    /// Create an event that has not been recorded (and is therefore complete)
    pub fn new() -> Self {
        let (state, _) = watch::channel(EventState::default());
        Self {
            inner: Arc::new(EventInner {
                id: next_object_id(),
                state,
            }),
        }
    }

    /// Event for data that is already valid
    pub fn completed() -> Self {
        Self::new()
    }

    /// Unique event id
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether the most recent record has been reached
    pub fn query(&self) -> bool {
        let state = self.inner.state.borrow();
        state.completed >= state.recorded
    }

    /// Error carried by the last completed record, if its stream had failed
    pub fn failure(&self) -> Option<CarrackError> {
        self.inner.state.borrow().failure.clone()
    }

    /// Whether both handles refer to the same event
    pub fn same_event(&self, other: &Event) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Block the calling task until the most recent record is reached
    pub async fn synchronize(&self) -> Result<()> {
        self.ticket().wait().await
    }

    pub(crate) fn begin_record(&self) -> u64 {
        let mut generation = 0;
        self.inner.state.send_modify(|state| {
            state.recorded += 1;
            generation = state.recorded;
        });
        generation
    }

    pub(crate) fn complete(&self, generation: u64, outcome: Result<()>) {
        self.inner.state.send_modify(|state| {
            if generation >= state.completed {
                state.completed = generation;
                state.failure = outcome.err();
            }
        });
    }

    pub(crate) fn ticket(&self) -> EventTicket {
        EventTicket {
            event: self.clone(),
            generation: self.inner.state.borrow().recorded,
        }
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Event")
            .field("id", &self.inner.id)
            .field("recorded", &state.recorded)
            .field("completed", &state.completed)
            .finish()
    }
}

/// A wait on one specific record of an event
pub(crate) struct EventTicket {
    event: Event,
    generation: u64,
}

impl EventTicket {
    pub(crate) async fn wait(self) -> Result<()> {
        let generation = self.generation;
        let mut rx = self.event.inner.state.subscribe();
        let failure = {
            let state = rx
                .wait_for(|state| state.completed >= generation)
                .await
                .map_err(|_| CarrackError::internal("event dropped while being waited on"))?;
            state.failure.clone()
        };
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unrecorded_event_is_complete() {
        let event = Event::new();
        assert!(event.query());
        event.synchronize().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_tracks_generation() {
        let event = Event::new();
        let first = event.begin_record();
        assert!(!event.query());

        let ticket = event.ticket();
        let second = event.begin_record();
        event.complete(first, Ok(()));
        // still waiting on the second record
        assert!(!event.query());

        // the ticket was taken before the second record
        ticket.wait().await.unwrap();

        event.complete(second, Ok(()));
        assert!(event.query());
    }

    #[tokio::test]
    async fn test_failure_propagates_to_waiters() {
        let event = Event::new();
        let generation = event.begin_record();
        event.complete(generation, Err(CarrackError::transfer("link down")));
        let err = event.synchronize().await.unwrap_err();
        assert_eq!(err, CarrackError::transfer("link down"));
        assert!(event.failure().is_some());
    }
}
