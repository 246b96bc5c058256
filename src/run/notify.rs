//! The delayed half of the notification bus.
//!
//! Immediate reactions never land here; the executor dispatches them inline. What this type
//! tracks is the set of delayed reactions pending at the end of the walk: deduplicated by
//! target, flushed once, in target declaration order.

use std::collections::BTreeSet;

/// Pending delayed reactions, keyed by target declaration index.
#[derive(Clone, Debug, Default)]
pub(crate) struct NotificationBus {
    pending: BTreeSet<usize>,
}

impl NotificationBus {
    pub(crate) fn new() -> Self {
        NotificationBus::default()
    }

    /// Queues a delayed reaction for `target`. Returns whether the target was newly queued;
    /// firing the same delayed target twice collapses to one execution.
    pub(crate) fn queue(&mut self, target: usize) -> bool {
        self.pending.insert(target)
    }

    /// Takes every pending target, in declaration order, leaving the bus empty.
    pub(crate) fn drain(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.pending).into_iter().collect()
    }
}
