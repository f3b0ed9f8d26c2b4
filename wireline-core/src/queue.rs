//! Thread-safe holding area for not-yet-sent messages, bucketed by
//! priority.
//!
//! Three FIFO buckets (High / Normal / Low) live behind a single mutex.
//! Dequeue always prefers High; between Normal and Low a 5:1 weighting
//! keeps Normal responsive without starving Low.

use crate::message::{Message, Priority};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// How many consecutive Normal messages go out before Low gets a turn.
const NORMAL_BURST: u32 = 5;

#[derive(Default)]
struct Buckets {
    high: VecDeque<Arc<Message>>,
    normal: VecDeque<Arc<Message>>,
    low: VecDeque<Arc<Message>>,
    normal_streak: u32,
}

/// Priority message queue shared between a channel handle and its worker.
#[derive(Default)]
pub struct PriorityQueue {
    inner: Mutex<Buckets>,
}

impl PriorityQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to the bucket matching its priority.
    pub fn push(&self, message: Arc<Message>) {
        let mut buckets = self.inner.lock();
        match message.priority() {
            Priority::High => buckets.high.push_back(message),
            Priority::Normal => buckets.normal.push_back(message),
            Priority::Low => buckets.low.push_back(message),
        }
    }

    /// Dequeue the next message under the weighted policy.
    ///
    /// High always wins. Otherwise Normal is drained up to
    /// [`NORMAL_BURST`] times in a row, then Low gets exactly one turn if
    /// it has anything queued; when Low is empty the burst counter simply
    /// restarts on Normal.
    pub fn pop_next(&self) -> Option<Arc<Message>> {
        let mut buckets = self.inner.lock();

        if let Some(m) = buckets.high.pop_front() {
            return Some(m);
        }

        if !buckets.normal.is_empty() {
            if buckets.normal_streak < NORMAL_BURST {
                buckets.normal_streak += 1;
                return buckets.normal.pop_front();
            }
            buckets.normal_streak = 0;
            if let Some(m) = buckets.low.pop_front() {
                return Some(m);
            }
            return buckets.normal.pop_front();
        }

        buckets.low.pop_front()
    }

    /// Remove every queued message matching the predicate, from all three
    /// buckets. Returns how many were removed.
    pub fn remove_where(&self, pred: impl Fn(&Message) -> bool) -> usize {
        let mut buckets = self.inner.lock();
        let before =
            buckets.high.len() + buckets.normal.len() + buckets.low.len();
        buckets.high.retain(|m| !pred(m));
        buckets.normal.retain(|m| !pred(m));
        buckets.low.retain(|m| !pred(m));
        before - (buckets.high.len() + buckets.normal.len() + buckets.low.len())
    }

    /// Total number of queued messages across all buckets.
    pub fn len(&self) -> usize {
        let buckets = self.inner.lock();
        buckets.high.len() + buckets.normal.len() + buckets.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;
    use uuid::Uuid;

    fn msg(priority: Priority, tag: u64) -> Arc<Message> {
        let mut m = Message::new(Uuid::new_v4());
        m.set_priority(priority);
        m.set_tag(tag);
        Arc::new(m)
    }

    #[test]
    fn fifo_within_bucket() {
        let q = PriorityQueue::new();
        for tag in 1..=4 {
            q.push(msg(Priority::Normal, tag));
        }
        for tag in 1..=4 {
            assert_eq!(q.pop_next().unwrap().tag(), tag);
        }
        assert!(q.pop_next().is_none());
    }

    #[test]
    fn high_preempts_everything() {
        let q = PriorityQueue::new();
        q.push(msg(Priority::Low, 1));
        q.push(msg(Priority::Normal, 2));
        q.push(msg(Priority::High, 3));
        q.push(msg(Priority::High, 4));

        assert_eq!(q.pop_next().unwrap().tag(), 3);
        assert_eq!(q.pop_next().unwrap().tag(), 4);
        assert_eq!(q.pop_next().unwrap().tag(), 2);
        assert_eq!(q.pop_next().unwrap().tag(), 1);
    }

    #[test]
    fn five_to_one_interleave() {
        let q = PriorityQueue::new();
        // N1..N10 then L1, L2 — expect N1..N5, L1, N6..N10, L2
        for tag in 1..=10 {
            q.push(msg(Priority::Normal, tag));
        }
        q.push(msg(Priority::Low, 101));
        q.push(msg(Priority::Low, 102));

        let order: Vec<u64> = std::iter::from_fn(|| q.pop_next())
            .map(|m| m.tag())
            .collect();
        assert_eq!(order, vec![1, 2, 3, 4, 5, 101, 6, 7, 8, 9, 10, 102]);
    }

    #[test]
    fn empty_low_keeps_normal_flowing() {
        let q = PriorityQueue::new();
        for tag in 1..=12 {
            q.push(msg(Priority::Normal, tag));
        }
        let order: Vec<u64> = std::iter::from_fn(|| q.pop_next())
            .map(|m| m.tag())
            .collect();
        assert_eq!(order, (1..=12).collect::<Vec<u64>>());
    }

    #[test]
    fn remove_where_spans_buckets() {
        let q = PriorityQueue::new();
        let victim = Uuid::new_v4();
        let keeper = Uuid::new_v4();

        let mut a = Message::new(keeper);
        a.set_priority(Priority::High);
        let b = Message::new(victim);
        let mut c = Message::new(victim);
        c.set_priority(Priority::Low);
        q.push(Arc::new(a));
        q.push(Arc::new(b));
        q.push(Arc::new(c));

        assert_eq!(q.remove_where(|m| m.command() == victim), 2);
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop_next().unwrap().command(), keeper);
    }

    #[test]
    fn len_tracks_all_buckets() {
        let q = PriorityQueue::new();
        assert!(q.is_empty());
        q.push(msg(Priority::High, 1));
        q.push(msg(Priority::Normal, 2));
        q.push(msg(Priority::Low, 3));
        assert_eq!(q.len(), 3);
        let _ = q.pop_next();
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn answer_priority_respected() {
        // Answers queued High must leave before earlier Normal traffic
        let q = PriorityQueue::new();
        q.push(msg(Priority::Normal, 1));
        let mut answer = Message::new(Uuid::new_v4());
        answer.set_kind(MessageKind::Answer);
        answer.set_priority(Priority::High);
        answer.set_tag(2);
        q.push(Arc::new(answer));
        assert_eq!(q.pop_next().unwrap().tag(), 2);
    }
}
