//! # Space Events
//!
//! Outward notifications of a compressed space.
//!
//! ```text
//! ┌──────────────────┐      ┌─────────────┐      ┌──────────────────┐
//! │ CompressedSpace  │─────>│   Event     │─────>│ Rendering glue   │
//! │ (passes, ticks)  │      │   Channel   │      │ (show/hide, FX)  │
//! └──────────────────┘      └──────┬──────┘      └──────────────────┘
//!                                  │
//!                                  └───────────> Editor / gameplay glue
//! ```
//!
//! The channel is bounded. A full channel drops the event so a stalled
//! consumer never stalls the tick. The first drop of a run logs a warning,
//! the rest of the run logs at debug level.
//!
//! Events go to a single consumer: receivers are handles on one queue, and
//! every event is delivered to whichever handle reads it first.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use quantum_shared::{EntityId, LayerMask, PortalId, RoomId};

/// Events raised by a compressed space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SpaceEvent {
    // =========================================================================
    // Layer passes
    // =========================================================================
    /// The active room changed and a layer pass ran.
    ActiveRoomChanged {
        /// Previous active room, `None` on the first pass.
        previous: Option<RoomId>,
        /// New active room.
        room: RoomId,
    },

    /// A room became visible.
    RoomShown {
        /// Room shown.
        room: RoomId,
        /// Its layer mask.
        mask: LayerMask,
    },

    /// A room has no layer and is not active; it is skipped entirely.
    RoomHidden {
        /// Room hidden.
        room: RoomId,
    },

    /// A layer pass finished and its sweep ran.
    LayerPassCompleted {
        /// Rooms visible after the pass.
        visible_rooms: usize,
        /// Variants dropped by the sweep.
        disposed_variants: usize,
    },

    // =========================================================================
    // Entities
    // =========================================================================
    /// An entity (and its non-player descendants) moved to another room.
    EntityRoomChanged {
        /// Entity re-homed.
        entity: EntityId,
        /// Room it left.
        from: RoomId,
        /// Room it joined.
        to: RoomId,
        /// Portal crossed, `None` for explicit moves.
        via: Option<PortalId>,
    },

    /// An entity started straddling a portal.
    TraversalStarted {
        /// Traversing entity.
        entity: EntityId,
        /// Portal traversed.
        portal: PortalId,
    },

    /// An entity stopped straddling a portal.
    TraversalEnded {
        /// Entity.
        entity: EntityId,
        /// Portal it had been traversing.
        portal: PortalId,
    },

    /// Tracking of an entity was dropped from outside.
    TraversalAborted {
        /// Entity.
        entity: EntityId,
        /// Portal it had been traversing, if any.
        portal: Option<PortalId>,
    },

    // =========================================================================
    // Graph
    // =========================================================================
    /// A portal was added to the graph.
    PortalAdded {
        /// Room owning the portal.
        room: RoomId,
        /// New portal.
        portal: PortalId,
        /// Its reverse.
        reverse: PortalId,
    },

    /// A portal was removed from the graph.
    PortalRemoved {
        /// Room that owned the portal.
        room: RoomId,
        /// Removed portal.
        portal: PortalId,
        /// Its reverse.
        reverse: PortalId,
    },

    // =========================================================================
    // Viewpoint
    // =========================================================================
    /// The viewpoint transition overlay was turned on or off.
    OverlayToggled {
        /// New visibility.
        visible: bool,
        /// Portal the overlay belongs to.
        portal: PortalId,
    },

    /// The overlay was paused or resumed.
    OverlayPaused {
        /// Portal the overlay belongs to.
        portal: PortalId,
        /// New pause state.
        paused: bool,
    },
}

/// Bounded event channel of a compressed space.
pub struct EventBus {
    /// Sender end - held by the space.
    sender: Sender<SpaceEvent>,
    /// Receiver end - cloned out to consumers.
    receiver: Receiver<SpaceEvent>,
    /// Events dropped because the channel was full.
    dropped: u64,
    /// The last emit was dropped.
    overflowing: bool,
}

impl EventBus {
    /// Creates a bus holding at most `capacity` undelivered events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            dropped: 0,
            overflowing: false,
        }
    }

    /// Sends an event without blocking.
    ///
    /// Returns `false` if the event was dropped.
    #[inline]
    pub fn emit(&mut self, event: SpaceEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => {
                self.overflowing = false;
                true
            }
            Err(TrySendError::Full(event)) => {
                self.dropped += 1;
                if self.overflowing {
                    tracing::debug!(?event, dropped = self.dropped, "Event dropped");
                } else {
                    tracing::warn!(?event, dropped = self.dropped, "Event channel full, dropping events");
                }
                self.overflowing = true;
                false
            }
            // Every receiver is a clone of ours, so this cannot happen while
            // the bus is alive.
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Creates a receiver handle on the bus queue. Handles share the queue,
    /// so each event reaches only one of them.
    #[must_use]
    pub fn receiver(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.receiver.clone(),
        }
    }

    /// Events dropped so far.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Handle for receiving space events.
#[derive(Clone)]
pub struct EventReceiver {
    receiver: Receiver<SpaceEvent>,
}

impl EventReceiver {
    /// Receives all pending events (non-blocking).
    #[inline]
    pub fn drain(&self) -> Vec<SpaceEvent> {
        let mut events = Vec::with_capacity(self.receiver.len());
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    /// Receives one event (non-blocking).
    #[inline]
    pub fn try_recv(&self) -> Option<SpaceEvent> {
        self.receiver.try_recv().ok()
    }

    /// Returns the number of pending events.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    /// Checks if there are pending events.
    #[inline]
    #[must_use]
    pub fn has_events(&self) -> bool {
        !self.receiver.is_empty()
    }
}
