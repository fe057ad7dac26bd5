//! Single-consumer deferred work queue.
//!
//! Nodes post tasks from either thread with [`TaskSender::post`], which is a
//! non-blocking `try_send` into a preallocated bounded channel. The owning
//! graph drains the queue on the control thread. A full queue drops the task
//! and counts it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::events::GraphEvent;
use crate::node::NodeId;

/// Default queue depth.
pub const TASK_QUEUE_CAPACITY: usize = 1024;

/// Work deferred to the control thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeTask {
    /// Prepare or release a node after its enabled flag flipped.
    UpdateEnablement(NodeId),
    /// Load the node's requested MIDI program.
    LoadMidiProgram(NodeId),
    /// Forward an event to listeners.
    Notify(GraphEvent),
}

/// Cloneable posting end of a [`TaskQueue`].
#[derive(Debug, Clone)]
pub struct TaskSender {
    tx: Sender<NodeTask>,
    dropped: Arc<AtomicUsize>,
}

impl TaskSender {
    /// Enqueues without blocking. Returns `false` if the task was dropped.
    pub fn post(&self, task: NodeTask) -> bool {
        match self.tx.try_send(task) {
            Ok(()) => true,
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

/// The queue, owned by a graph.
#[derive(Debug)]
pub struct TaskQueue {
    tx: Sender<NodeTask>,
    rx: Receiver<NodeTask>,
    dropped: Arc<AtomicUsize>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new(TASK_QUEUE_CAPACITY)
    }
}

impl TaskQueue {
    /// Queue holding at most `capacity` pending tasks.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            dropped: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A posting handle.
    pub fn sender(&self) -> TaskSender {
        TaskSender {
            tx: self.tx.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }

    /// Takes every task currently queued.
    pub fn drain(&self) -> Vec<NodeTask> {
        self.rx.try_iter().collect()
    }

    /// Tasks waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Tasks dropped because the queue was full.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_and_drain_in_order() {
        let queue = TaskQueue::new(4);
        let sender = queue.sender();
        assert!(sender.post(NodeTask::UpdateEnablement(NodeId::new(1))));
        assert!(sender.post(NodeTask::Notify(GraphEvent::ArcsChanged)));
        assert_eq!(
            queue.drain(),
            vec![
                NodeTask::UpdateEnablement(NodeId::new(1)),
                NodeTask::Notify(GraphEvent::ArcsChanged)
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_counts_drops() {
        let queue = TaskQueue::new(1);
        let sender = queue.sender();
        assert!(sender.post(NodeTask::LoadMidiProgram(NodeId::new(3))));
        assert!(!sender.post(NodeTask::LoadMidiProgram(NodeId::new(3))));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.len(), 1);
    }
}
