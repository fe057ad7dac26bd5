//! Change notifications dispatched on the control thread.
//!
//! Nodes never call listeners directly. State changes enqueue a
//! [`NodeTask`](crate::tasks::NodeTask); the manager drains the queue once
//! per control cycle and hands each resulting [`GraphEvent`] to the
//! [`EventDispatcher`].

use crate::node::NodeId;

/// Something observable changed in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphEvent {
    /// A node was inserted.
    NodeAdded(NodeId),
    /// A node is about to be removed.
    WillBeRemoved(NodeId),
    /// A node was removed.
    NodeRemoved(NodeId),
    /// Enabled flag changed and the node was prepared or released.
    EnablementChanged(NodeId),
    /// Bypass flag changed.
    BypassChanged(NodeId),
    /// Mute flag changed.
    MuteChanged(NodeId),
    /// A MIDI program finished loading.
    MidiProgramChanged(NodeId),
    /// A MIDI program could not be loaded; the previous one stays active.
    MidiProgramLoadFailed {
        /// Node.
        node: NodeId,
        /// Program that failed.
        program: i32,
    },
    /// A node could not be prepared and renders silence.
    PrepareFailed(NodeId),
    /// Arcs were added or removed.
    ArcsChanged,
}

/// Handle returned by [`EventDispatcher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&GraphEvent) + Send>;

/// Control-thread observer registry.
#[derive(Default)]
pub struct EventDispatcher {
    listeners: Vec<(ListenerId, Listener)>,
    next_id: u64,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl EventDispatcher {
    /// Creates a dispatcher with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener.
    pub fn subscribe(&mut self, listener: impl FnMut(&GraphEvent) + Send + 'static) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(l, _)| *l != id);
        self.listeners.len() != before
    }

    /// Calls every listener in subscription order.
    pub fn dispatch(&mut self, event: &GraphEvent) {
        for (_, listener) in &mut self.listeners {
            listener(event);
        }
    }

    /// Number of listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether nobody is listening.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
