//! A priority queue over a small, fixed range of integer priorities.
//!
//! Priorities run from 0 (served first) to `N - 1`. Each priority owns a FIFO bucket, an
//! intrusive [DLinkedList]; a two-level bitmap records which buckets are non-empty, so finding
//! the best element is two `trailing_zeros` away and every operation is O(1).
//!
//! The priority of an element is read through the function passed to [LimitedQueue::new] and
//! must not change while the element is queued.

use crate::Pointer;
use crate::dlist::{DLinkedList, ListItem};
use crate::error::CheckError;
use core::array;

/// Upper bound on `N`: 64 bitmap words of 64 bits, summarised by one 64-bit word.
pub const MAX_PRIORITIES: usize = 64 * 64;

const WORD_BITS: usize = u64::BITS as usize;

pub type PriorityFunc<T> = fn(&T) -> usize;

pub struct LimitedQueue<P, Tag, const N: usize>
where
    P: Pointer,
    P::Target: ListItem<Tag>,
{
    buckets: [DLinkedList<P, Tag>; N],
    // Bit `w` set when `bitmap[w]` is non-zero.
    topmap: u64,
    // Bit `p % 64` of word `p / 64` set when bucket `p` is non-empty.
    bitmap: [u64; WORD_BITS],
    count: usize,
    get_priority: PriorityFunc<P::Target>,
}

impl<P, Tag, const N: usize> LimitedQueue<P, Tag, N>
where
    P: Pointer,
    P::Target: ListItem<Tag>,
{
    pub fn new(get_priority: PriorityFunc<P::Target>) -> Self {
        const { assert!(N > 0 && N <= MAX_PRIORITIES, "priority range must be 1..=4096") };
        LimitedQueue {
            buckets: array::from_fn(|_| DLinkedList::new()),
            topmap: 0,
            bitmap: [0; WORD_BITS],
            count: 0,
            get_priority,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.topmap == 0
    }

    #[inline(always)]
    fn priority_of(&self, item: &P::Target) -> usize {
        let priority = (self.get_priority)(item);
        assert!(priority < N, "priority {} out of range 0..{}", priority, N);
        priority
    }

    #[inline(always)]
    fn mark(&mut self, priority: usize) {
        let word = priority / WORD_BITS;
        self.bitmap[word] |= 1 << (priority % WORD_BITS);
        self.topmap |= 1 << word;
    }

    #[inline(always)]
    fn unmark_if_empty(&mut self, priority: usize) {
        if self.buckets[priority].is_empty() {
            let word = priority / WORD_BITS;
            self.bitmap[word] &= !(1 << (priority % WORD_BITS));
            if self.bitmap[word] == 0 {
                self.topmap &= !(1 << word);
            }
        }
    }

    #[inline(always)]
    fn top_priority(&self) -> Option<usize> {
        if self.topmap == 0 {
            return None;
        }
        let word = self.topmap.trailing_zeros() as usize;
        Some(word * WORD_BITS + self.bitmap[word].trailing_zeros() as usize)
    }

    /// Queues `item` behind the elements of the same priority.
    pub fn insert(&mut self, item: P) {
        let priority = self.priority_of(item.as_ref());
        self.buckets[priority].push_back(item);
        self.mark(priority);
        self.count += 1;
    }

    /// Queues `item` ahead of the elements of the same priority.
    pub fn insert_front(&mut self, item: P) {
        let priority = self.priority_of(item.as_ref());
        self.buckets[priority].push_front(item);
        self.mark(priority);
        self.count += 1;
    }

    /// The element [LimitedQueue::poll] would return.
    #[inline]
    pub fn peek(&self) -> Option<&P::Target> {
        self.buckets[self.top_priority()?].get_front()
    }

    pub fn poll(&mut self) -> Option<P> {
        let priority = self.top_priority()?;
        let item = self.buckets[priority].pop_front();
        self.unmark_if_empty(priority);
        self.count -= 1;
        item
    }

    /// Unlinks `item` and hands its ownership back.
    ///
    /// # Safety
    ///
    /// `item` must be queued in this queue.
    pub unsafe fn remove(&mut self, item: &P::Target) -> P {
        let priority = self.priority_of(item);
        let p = unsafe { self.buckets[priority].remove(item) };
        self.unmark_if_empty(priority);
        self.count -= 1;
        p
    }

    /// Elements in the order they would be polled.
    pub fn iter(&self) -> impl Iterator<Item = &P::Target> {
        self.buckets.iter().flat_map(|b| b.iter())
    }

    /// Verifies the bitmaps against the buckets and every element's priority.
    pub fn check(&self) -> Result<(), CheckError> {
        let mut total = 0;
        for (priority, bucket) in self.buckets.iter().enumerate() {
            let word = priority / WORD_BITS;
            let marked = self.bitmap[word] & (1 << (priority % WORD_BITS)) != 0;
            if marked == bucket.is_empty()
                || !bucket.links_consistent()
                || bucket.iter().any(|item| (self.get_priority)(item) != priority)
            {
                log::debug!("limited_queue: bucket {} is inconsistent", priority);
                return Err(CheckError::StaleBitmap { priority });
            }
            total += bucket.len();
        }
        for word in 0..WORD_BITS {
            if ((self.topmap >> word) & 1 != 0) != (self.bitmap[word] != 0) {
                return Err(CheckError::StaleBitmap { priority: word * WORD_BITS });
            }
        }
        if total != self.count {
            return Err(CheckError::CountMismatch { expected: self.count, found: total });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlist::ListNode;
    use crate::test_util::init_logger;
    use core::cell::UnsafeCell;
    use proptest::prelude::*;
    use std::sync::Arc;

    struct Packet {
        class: usize,
        seq: u32,
        node: UnsafeCell<ListNode<Self, ()>>,
    }

    unsafe impl ListItem<()> for Packet {
        fn get_node(&self) -> &mut ListNode<Self, ()> {
            unsafe { &mut *self.node.get() }
        }
    }

    fn new_packet(class: usize, seq: u32) -> Box<Packet> {
        Box::new(Packet { class, seq, node: UnsafeCell::new(ListNode::default()) })
    }

    fn class_of(p: &Packet) -> usize {
        p.class
    }

    fn poll_all<const N: usize>(q: &mut LimitedQueue<Box<Packet>, (), N>) -> Vec<(usize, u32)> {
        let mut out = Vec::new();
        while let Some(p) = q.poll() {
            q.check().unwrap();
            out.push((p.class, p.seq));
        }
        out
    }

    #[test]
    fn fifo_within_priority() {
        init_logger();
        let mut q = LimitedQueue::<Box<Packet>, (), 8>::new(class_of);
        assert!(q.is_empty());
        assert!(q.peek().is_none());
        assert!(q.poll().is_none());
        q.insert(new_packet(3, 1));
        q.insert(new_packet(1, 2));
        q.insert(new_packet(3, 3));
        q.insert_front(new_packet(3, 4));
        q.insert(new_packet(7, 5));
        q.insert_front(new_packet(1, 6));
        q.check().unwrap();
        assert_eq!(q.len(), 6);
        assert_eq!(q.peek().unwrap().seq, 6);
        assert_eq!(q.iter().map(|p| p.seq).collect::<Vec<_>>(), vec![6, 2, 4, 1, 3, 5]);
        assert_eq!(poll_all(&mut q), vec![(1, 6), (1, 2), (3, 4), (3, 1), (3, 3), (7, 5)]);
        assert!(q.is_empty());
    }

    #[test]
    fn priorities_across_bitmap_words() {
        let mut q = LimitedQueue::<Box<Packet>, (), 1000>::new(class_of);
        for (seq, class) in [999, 64, 63, 640, 0, 128].into_iter().enumerate() {
            q.insert(new_packet(class, seq as u32));
        }
        q.check().unwrap();
        let classes: Vec<usize> = poll_all(&mut q).into_iter().map(|(c, _)| c).collect();
        assert_eq!(classes, vec![0, 63, 64, 128, 640, 999]);
    }

    #[test]
    fn remove_updates_bitmap() {
        let mut q = LimitedQueue::<Box<Packet>, (), 130>::new(class_of);
        q.insert(new_packet(129, 1));
        q.insert(new_packet(5, 2));
        q.insert(new_packet(5, 3));
        let five = q.peek().unwrap() as *const Packet;
        assert_eq!(unsafe { q.remove(&*five) }.seq, 2);
        q.check().unwrap();
        let five = q.peek().unwrap() as *const Packet;
        assert_eq!(unsafe { q.remove(&*five) }.seq, 3);
        q.check().unwrap();
        assert_eq!(q.peek().unwrap().class, 129);
        assert_eq!(q.len(), 1);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn priority_out_of_range() {
        let mut q = LimitedQueue::<Box<Packet>, (), 4>::new(class_of);
        q.insert(new_packet(4, 0));
    }

    #[test]
    fn drop_releases_arc() {
        let keep = Arc::new(Packet { class: 2, seq: 0, node: UnsafeCell::new(ListNode::default()) });
        {
            let mut q = LimitedQueue::<Arc<Packet>, (), 4>::new(class_of);
            q.insert(keep.clone());
            assert_eq!(Arc::strong_count(&keep), 2);
        }
        assert_eq!(Arc::strong_count(&keep), 1);
    }

    proptest! {
        #[test]
        fn matches_stable_sort(classes in prop::collection::vec(0usize..200, 0..100)) {
            let mut q = LimitedQueue::<Box<Packet>, (), 200>::new(class_of);
            for (seq, class) in classes.iter().enumerate() {
                q.insert(new_packet(*class, seq as u32));
            }
            prop_assert_eq!(q.check(), Ok(()));
            let mut expected: Vec<(usize, u32)> =
                classes.iter().enumerate().map(|(seq, c)| (*c, seq as u32)).collect();
            expected.sort_by_key(|(c, _)| *c);
            prop_assert_eq!(poll_all(&mut q), expected);
        }
    }
}
