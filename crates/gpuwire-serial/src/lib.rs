//! Serial-indexed completion queues.
//!
//! A [`Serial`] marks a point in GPU submission order. Work is enqueued under the serial that was
//! current when it was submitted and retrieved in bulk once the GPU reports that serial as
//! completed.

use std::collections::VecDeque;
use std::fmt;

/// Monotonic GPU submission/completion counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Serial(pub u64);

impl Serial {
    pub const ZERO: Serial = Serial(0);

    pub fn next(self) -> Serial {
        Serial(self.0.saturating_add(1))
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// FIFO of values bucketed by non-decreasing serial.
pub struct SerialQueue<T> {
    buckets: VecDeque<(Serial, Vec<T>)>,
}

impl<T> Default for SerialQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SerialQueue<T> {
    pub fn new() -> Self {
        Self {
            buckets: VecDeque::new(),
        }
    }

    /// Append `value` under `serial`.
    ///
    /// Serials must not decrease; a serial equal to the newest bucket appends to that bucket.
    pub fn enqueue(&mut self, value: T, serial: Serial) {
        self.bucket_for(serial).push(value);
    }

    /// Append every value of `values` under `serial`. An empty batch creates no bucket.
    pub fn enqueue_batch<I>(&mut self, values: I, serial: Serial)
    where
        I: IntoIterator<Item = T>,
    {
        let mut values = values.into_iter().peekable();
        if values.peek().is_none() {
            return;
        }
        self.bucket_for(serial).extend(values);
    }

    fn bucket_for(&mut self, serial: Serial) -> &mut Vec<T> {
        if let Some(last) = self.last_serial() {
            debug_assert!(
                serial >= last,
                "serial {serial} enqueued after newer serial {last}"
            );
        }
        if !matches!(self.buckets.back(), Some((last, _)) if *last == serial) {
            self.buckets.push_back((serial, Vec::new()));
        }
        let newest = self.buckets.len() - 1;
        &mut self.buckets[newest].1
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Number of values across all serials.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|(_, b)| b.len()).sum()
    }

    pub fn first_serial(&self) -> Option<Serial> {
        self.buckets.front().map(|(s, _)| *s)
    }

    pub fn last_serial(&self) -> Option<Serial> {
        self.buckets.back().map(|(s, _)| *s)
    }

    /// Every value with its serial, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (Serial, &T)> {
        self.buckets
            .iter()
            .flat_map(|(serial, bucket)| bucket.iter().map(move |v| (*serial, v)))
    }

    /// Values enqueued at or below `serial`, oldest first.
    pub fn iter_up_to(&self, serial: Serial) -> impl Iterator<Item = (Serial, &T)> {
        self.buckets
            .iter()
            .take_while(move |(s, _)| *s <= serial)
            .flat_map(|(s, bucket)| bucket.iter().map(move |v| (*s, v)))
    }

    /// Discard every value at or below `serial`.
    pub fn clear_up_to(&mut self, serial: Serial) {
        while matches!(self.buckets.front(), Some((s, _)) if *s <= serial) {
            self.buckets.pop_front();
        }
    }

    /// Remove and return every value at or below `serial`, oldest first.
    pub fn take_up_to(&mut self, serial: Serial) -> Vec<T> {
        let mut out = Vec::new();
        while matches!(self.buckets.front(), Some((s, _)) if *s <= serial) {
            if let Some((_, bucket)) = self.buckets.pop_front() {
                out.extend(bucket);
            }
        }
        out
    }

    /// Remove and return everything regardless of serial.
    pub fn take_all(&mut self) -> Vec<T> {
        self.buckets.drain(..).flat_map(|(_, b)| b).collect()
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}

impl<T: fmt::Debug> fmt::Debug for SerialQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_serial_appends_to_the_newest_bucket() {
        let mut q = SerialQueue::new();
        q.enqueue('a', Serial(1));
        q.enqueue_batch(['b', 'c'], Serial(1));
        q.enqueue('d', Serial(3));
        assert_eq!(q.buckets.len(), 2);
        assert_eq!(q.len(), 4);
        assert_eq!(q.first_serial(), Some(Serial(1)));
        assert_eq!(q.last_serial(), Some(Serial(3)));
    }

    #[test]
    fn empty_batch_creates_no_bucket() {
        let mut q: SerialQueue<u8> = SerialQueue::new();
        q.enqueue_batch(Vec::new(), Serial(5));
        assert!(q.is_empty());
        assert_eq!(q.last_serial(), None);
    }

    #[test]
    fn iterate_then_clear_up_to() {
        let mut q = SerialQueue::new();
        q.enqueue(10, Serial(1));
        q.enqueue(20, Serial(2));
        q.enqueue(21, Serial(2));
        q.enqueue(30, Serial(4));

        let seen: Vec<(Serial, i32)> = q.iter_up_to(Serial(3)).map(|(s, v)| (s, *v)).collect();
        assert_eq!(seen, vec![(Serial(1), 10), (Serial(2), 20), (Serial(2), 21)]);

        q.clear_up_to(Serial(3));
        assert_eq!(q.iter().map(|(_, v)| *v).collect::<Vec<_>>(), vec![30]);
    }

    #[test]
    fn draining_everything_leaves_a_queryable_empty_queue() {
        let mut q = SerialQueue::new();
        q.enqueue("x", Serial(7));
        assert_eq!(q.take_up_to(Serial(7)), vec!["x"]);
        assert!(q.is_empty());
        assert!(q.take_up_to(Serial(100)).is_empty());
        assert_eq!(q.iter_up_to(Serial(100)).count(), 0);
        q.clear_up_to(Serial(100));
        assert!(q.take_all().is_empty());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "enqueued after newer serial")]
    fn decreasing_serial_is_a_bug() {
        let mut q = SerialQueue::new();
        q.enqueue(1, Serial(5));
        q.enqueue(2, Serial(4));
    }
}
