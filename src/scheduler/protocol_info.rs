use std::collections::{BTreeSet, VecDeque};

use crate::job::JobId;
use crate::slave::SlaveId;

/// Scheduling state of one (actual) slave protocol.
#[derive(Debug, Clone)]
pub struct ProtocolInfo {
    pub(crate) queue: VecDeque<JobId>,
    pub(crate) active: BTreeSet<SlaveId>,
    max_slaves: usize,
}

impl ProtocolInfo {
    pub(crate) fn new(max_slaves: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            active: BTreeSet::new(),
            max_slaves,
        }
    }

    pub fn max_slaves(&self) -> usize {
        self.max_slaves
    }

    /// Jobs waiting for a slave, in submission order.
    pub fn queued(&self) -> impl Iterator<Item = JobId> + '_ {
        self.queue.iter().copied()
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    pub fn active(&self) -> impl Iterator<Item = SlaveId> + '_ {
        self.active.iter().copied()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Another slave may start a job without exceeding the cap.
    pub fn has_capacity(&self) -> bool {
        self.active.len() < self.max_slaves
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity() {
        let mut info = ProtocolInfo::new(2);
        assert!(info.has_capacity());
        info.active.insert(SlaveId(1));
        info.active.insert(SlaveId(2));
        assert!(!info.has_capacity());
        info.active.remove(&SlaveId(1));
        assert!(info.has_capacity());
        assert_eq!(info.active().collect::<Vec<_>>(), vec![SlaveId(2)]);
    }
}
