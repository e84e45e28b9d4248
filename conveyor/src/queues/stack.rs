use super::QueueKind;
use super::relay::{RelayBody, RelayQueue};

/// Most-recent-first queue.
pub type StackQueue = RelayQueue<StackBody>;

#[derive(Debug, Default)]
pub struct StackBody(Vec<usize>);

impl RelayBody for StackBody {
    fn insert(&mut self, index: usize) {
        self.0.push(index);
    }

    fn take(&mut self) -> Option<usize> {
        self.0.pop()
    }
}

impl StackQueue {
    pub fn new(capacity: usize) -> Self {
        Self::spawn(QueueKind::Stack, capacity, StackBody::default())
    }
}
