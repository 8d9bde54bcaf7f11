//! Round events.
//!
//! The [`StateMachine`] broadcasts the current phase, the latest global parameters and the
//! latest aggregated metrics over watch channels. Listeners only ever see the most recent
//! event of each kind.
//!
//! [`StateMachine`]: crate::state_machine::StateMachine

use std::sync::Arc;

use tokio::sync::watch;

use fedorch_core::records::{MetricsRecord, ParametersRecord};

use crate::state_machine::phases::PhaseName;

/// An event emitted by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct Event<E> {
    /// Metadata that associates this event to the round in which it is
    /// emitted, the id of the task of the round.
    pub round_id: u64,
    /// The event itself
    pub event: E,
}

/// Global parameters update event.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelUpdate {
    Invalidate,
    New(Arc<ParametersRecord>),
}

/// Aggregated metrics update event.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricsUpdate {
    Invalidate,
    New {
        /// The training iteration the metrics were aggregated in.
        step: u32,
        metrics: Arc<MetricsRecord>,
    },
}

/// A convenience type to emit any coordinator event.
///
/// Clones share the underlying channels, but each clone attaches its own round id.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    /// Round ID that is attached to all the events.
    round_id: u64,
    phase_tx: EventBroadcaster<PhaseName>,
    model_tx: EventBroadcaster<ModelUpdate>,
    metrics_tx: EventBroadcaster<MetricsUpdate>,
}

/// The `EventSubscriber` hands out `EventListener`s for any
/// coordinator event.
#[derive(Debug)]
pub struct EventSubscriber {
    phase_rx: EventListener<PhaseName>,
    model_rx: EventListener<ModelUpdate>,
    metrics_rx: EventListener<MetricsUpdate>,
}

impl EventPublisher {
    /// Initialize a new event publisher with the given initial events.
    pub fn init(round_id: u64, phase: PhaseName, model: ModelUpdate) -> (Self, EventSubscriber) {
        let (phase_tx, phase_rx) = watch::channel::<Event<PhaseName>>(Event {
            round_id,
            event: phase,
        });

        let (model_tx, model_rx) = watch::channel::<Event<ModelUpdate>>(Event {
            round_id,
            event: model,
        });

        let (metrics_tx, metrics_rx) = watch::channel::<Event<MetricsUpdate>>(Event {
            round_id,
            event: MetricsUpdate::Invalidate,
        });

        let publisher = EventPublisher {
            round_id,
            phase_tx: phase_tx.into(),
            model_tx: model_tx.into(),
            metrics_tx: metrics_tx.into(),
        };

        let subscriber = EventSubscriber {
            phase_rx: phase_rx.into(),
            model_rx: model_rx.into(),
            metrics_rx: metrics_rx.into(),
        };

        (publisher, subscriber)
    }

    /// Set the round ID that is attached to the events the publisher broadcasts.
    pub fn set_round_id(&mut self, id: u64) {
        self.round_id = id;
    }

    fn event<T>(&self, event: T) -> Event<T> {
        Event {
            round_id: self.round_id,
            event,
        }
    }

    /// Emit a phase event
    pub fn broadcast_phase(&mut self, phase: PhaseName) {
        self.phase_tx.broadcast(self.event(phase));
    }

    /// Emit a model event
    pub fn broadcast_model(&mut self, update: ModelUpdate) {
        self.model_tx.broadcast(self.event(update));
    }

    /// Emit a metrics event
    pub fn broadcast_metrics(&mut self, update: MetricsUpdate) {
        self.metrics_tx.broadcast(self.event(update));
    }
}

impl EventSubscriber {
    /// Get a listener for new phase events
    pub fn phase_listener(&self) -> EventListener<PhaseName> {
        self.phase_rx.clone()
    }

    /// Get a listener for new model events
    pub fn model_listener(&self) -> EventListener<ModelUpdate> {
        self.model_rx.clone()
    }

    /// Get a listener for new aggregated metrics events
    pub fn metrics_listener(&self) -> EventListener<MetricsUpdate> {
        self.metrics_rx.clone()
    }
}

/// A listener for coordinator events. It can be used to either
/// retrieve the latest `Event<E>` emitted by the coordinator (with
/// `EventListener::get_latest`) or to wait for the next event (with
/// `EventListener::changed`).
#[derive(Debug, Clone)]
pub struct EventListener<E>(watch::Receiver<Event<E>>);

impl<E> From<watch::Receiver<Event<E>>> for EventListener<E> {
    fn from(receiver: watch::Receiver<Event<E>>) -> Self {
        EventListener(receiver)
    }
}

impl<E> EventListener<E>
where
    E: Clone,
{
    pub fn get_latest(&self) -> Event<E> {
        self.0.borrow().clone()
    }

    /// Waits for an event which hasn't been seen by this listener yet.
    ///
    /// Returns `None` once every publisher has been dropped.
    pub async fn changed(&mut self) -> Option<Event<E>> {
        self.0.changed().await.ok()?;
        Some(self.get_latest())
    }
}

/// A channel to send `Event<E>` to all the `EventListener<E>`.
#[derive(Debug)]
pub struct EventBroadcaster<E>(Arc<watch::Sender<Event<E>>>);

impl<E> Clone for EventBroadcaster<E> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<E> EventBroadcaster<E> {
    /// Send `event` to all the `EventListener<E>`
    fn broadcast(&self, event: Event<E>) {
        // We don't care whether there's a listener or not
        let _ = self.0.send(event);
    }
}

impl<E> From<watch::Sender<Event<E>>> for EventBroadcaster<E> {
    fn from(sender: watch::Sender<Event<E>>) -> Self {
        Self(Arc::new(sender))
    }
}
