use std::sync::Arc;

use iori_fmp4::EventMessage;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    /// Carried by an `emsg` box inside a media segment.
    Inband,
    /// Declared by an MPD `EventStream`.
    Outband,
}

/// Which live edge bounds changed in an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveEdgeFlags {
    pub start: bool,
    pub end: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DashEvent {
    EventReceived {
        origin: EventOrigin,
        event: EventMessage,
        /// Every stored event of the same scheme, the new one included.
        event_list: Arc<Vec<EventMessage>>,
        /// Position of `event` in `event_list`.
        index: usize,
    },
    LiveEdgeUpdated {
        live_edge_s: Option<f64>,
        live_edge_e: f64,
        live_edge: Option<f64>,
        flags: LiveEdgeFlags,
        target_latency: f64,
    },
}

/// Publish-only event channel. Without a receiver events are dropped.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    sender: Option<mpsc::UnboundedSender<DashEvent>>,
}

impl EventBus {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DashEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn publish(&self, event: DashEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.send(event).is_err() {
            tracing::trace!("Event receiver dropped");
        }
    }
}
