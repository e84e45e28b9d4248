use super::QueueKind;
use super::relay::{RelayBody, RelayQueue};
use crate::workbench::PriorityLookup;
use std::collections::VecDeque;
use std::sync::Arc;

/// Lowest-priority-first queue; equal priorities leave in arrival order.
pub type PriorityQueue = RelayQueue<PriorityBody>;

impl PriorityQueue {
    pub fn new(capacity: usize, lookup: Arc<dyn PriorityLookup>) -> Self {
        Self::spawn(QueueKind::Priority, capacity, PriorityBody::new(lookup))
    }
}

/// Indices sorted by ascending priority.
///
/// The priority is read once, at insertion.
pub struct PriorityBody {
    lookup: Arc<dyn PriorityLookup>,
    entries: VecDeque<(i64, usize)>,
}

impl PriorityBody {
    pub fn new(lookup: Arc<dyn PriorityLookup>) -> Self {
        Self {
            lookup,
            entries: VecDeque::new(),
        }
    }

    /// Insertion point for `priority`: after every entry with a priority
    /// less than or equal to it.
    fn find_position(&self, priority: i64) -> usize {
        match (self.entries.front(), self.entries.back()) {
            (Some(&(first, _)), _) if priority < first => 0,
            (_, Some(&(last, _))) if priority >= last => self.entries.len(),
            (None, None) => 0,
            _ => self.entries.partition_point(|&(p, _)| p <= priority),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RelayBody for PriorityBody {
    fn insert(&mut self, index: usize) {
        let priority = self.lookup.priority(index);
        let at = self.find_position(priority);
        self.entries.insert(at, (priority, index));
    }

    fn take(&mut self) -> Option<usize> {
        self.entries.pop_front().map(|(_, index)| index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queues::Queue;
    use crate::queues::test_support::StaticPriorities;
    use rand::Rng;

    const SCENARIO: [i64; 10] = [7, 15, 17, 19, 8, 19, 4, 15, 19, 3];

    #[test]
    fn test_body_scenario_order() {
        let lookup = Arc::new(StaticPriorities::from_slice(&SCENARIO));
        let mut body = PriorityBody::new(lookup);
        for index in 0..SCENARIO.len() {
            body.insert(index);
        }
        assert_eq!(body.len(), SCENARIO.len());

        let order: Vec<usize> = std::iter::from_fn(|| body.take()).collect();
        let priorities: Vec<i64> = order.iter().map(|&i| SCENARIO[i]).collect();

        let mut sorted = SCENARIO.to_vec();
        sorted.sort();
        assert_eq!(priorities, sorted);

        // The three 19s were inserted at indices 3, 5 and 8.
        assert_eq!(&order[7..], &[3, 5, 8]);
        // And the two 15s at 1 and 7.
        assert_eq!(&order[5..7], &[1, 7]);
        assert!(body.is_empty());
    }

    #[test]
    fn test_body_random_sequences_are_stable_sorted() {
        let mut rng = rand::rng();
        for _ in 0..200 {
            let len = rng.random_range(0..64);
            let priorities: Vec<i64> = (0..len).map(|_| rng.random_range(-5..5)).collect();

            let lookup = Arc::new(StaticPriorities::from_slice(&priorities));
            let mut body = PriorityBody::new(lookup);
            for index in 0..len {
                body.insert(index);
            }
            let order: Vec<usize> = std::iter::from_fn(|| body.take()).collect();

            let mut expected: Vec<usize> = (0..len).collect();
            // `sort_by_key` is stable, so ties keep insertion order.
            expected.sort_by_key(|&i| priorities[i]);
            assert_eq!(order, expected, "priorities: {priorities:?}");
        }
    }

    #[test]
    fn test_fast_paths() {
        let lookup = Arc::new(StaticPriorities::from_slice(&[5, 1, 9, 5]));
        let mut body = PriorityBody::new(lookup);
        body.insert(0);
        assert_eq!(body.find_position(1), 0);
        assert_eq!(body.find_position(5), 1);
        body.insert(1);
        body.insert(2);
        assert_eq!(body.find_position(5), 2);
        body.insert(3);
        let order: Vec<usize> = std::iter::from_fn(|| body.take()).collect();
        assert_eq!(order, vec![1, 0, 3, 2]);
    }

    #[tokio::test]
    async fn test_queue_scenario() {
        let lookup: Arc<dyn PriorityLookup> = Arc::new(StaticPriorities::from_slice(&SCENARIO));
        let q = PriorityQueue::new(SCENARIO.len(), lookup);
        for index in 0..SCENARIO.len() {
            q.push(index).await.unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        q.close();

        let mut order = Vec::new();
        while let Some(i) = q.pop().await {
            order.push(i);
        }
        assert_eq!(order.len(), SCENARIO.len());

        // The first index may have been relayed before the rest arrived.
        let tail: Vec<i64> = order[1..].iter().map(|&i| SCENARIO[i]).collect();
        assert!(tail.windows(2).all(|w| w[0] <= w[1]), "{tail:?}");
    }
}
