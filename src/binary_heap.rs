//! A semi-intrusive binary min-heap.
//!
//! The heap keeps a vector of element pointers in the usual implicit-tree layout, while each
//! element embeds its own position in that vector. Knowing the position makes removal and
//! re-prioritisation of an arbitrary element O(log n), and lets [BinaryHeap::try_remove] verify
//! membership in O(1).
//!
//! Only the slot vector is allocated by the heap; it grows on demand, or can be sized up front
//! with [BinaryHeap::with_capacity].

use crate::error::{CheckError, Error};
use crate::{LessFunc, Pointer};
use alloc::vec::Vec;
use core::marker::PhantomData;
use core::{fmt, mem};

const NOT_IN_HEAP: usize = usize::MAX;

/// A trait to return the internal mutable HeapNode for specified heap.
///
/// # Safety
///
/// Implementors must ensure `get_node` returns a valid reference to the `HeapNode`
/// embedded within `Self`, held in an `UnsafeCell`.
pub unsafe trait HeapItem<Tag>: Sized {
    fn get_node(&self) -> &mut HeapNode<Tag>;
}

/// Position of an element inside a [BinaryHeap].
pub struct HeapNode<Tag> {
    index: usize,
    _phan: PhantomData<fn(&Tag)>,
}

impl<Tag> HeapNode<Tag> {
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.index != NOT_IN_HEAP
    }

    /// Zero-based slot of the element, `None` when it is not in a heap.
    #[inline]
    pub fn index(&self) -> Option<usize> {
        if self.is_linked() { Some(self.index) } else { None }
    }
}

impl<Tag> Default for HeapNode<Tag> {
    fn default() -> Self {
        Self { index: NOT_IN_HEAP, _phan: Default::default() }
    }
}

impl<Tag> fmt::Debug for HeapNode<Tag> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.index() {
            Some(i) => write!(f, "(index: {})", i),
            None => write!(f, "(not linked)"),
        }
    }
}

pub struct BinaryHeap<P, Tag>
where
    P: Pointer,
    P::Target: HeapItem<Tag>,
{
    slots: Vec<*const P::Target>,
    is_less: LessFunc<P::Target>,
    _phan: PhantomData<fn(P, &Tag)>,
}

impl<P, Tag> BinaryHeap<P, Tag>
where
    P: Pointer,
    P::Target: HeapItem<Tag>,
{
    pub fn new(is_less: LessFunc<P::Target>) -> Self {
        Self::with_capacity(0, is_less)
    }

    pub fn with_capacity(capacity: usize, is_less: LessFunc<P::Target>) -> Self {
        BinaryHeap { slots: Vec::with_capacity(capacity), is_less, _phan: Default::default() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// The minimum element.
    #[inline]
    pub fn peek(&self) -> Option<&P::Target> {
        self.slots.first().map(|p| unsafe { &**p })
    }

    /// Whether `item` sits in this heap.
    #[inline]
    pub fn contains(&self, item: &P::Target) -> bool {
        let index = item.get_node().index;
        index < self.slots.len() && self.slots[index] == item as *const P::Target
    }

    pub fn insert(&mut self, item: P) {
        let ptr = item.into_raw();
        debug_assert!(!unsafe { (*ptr).get_node() }.is_linked(), "element already in heap");
        let pos = self.slots.len();
        self.slots.push(ptr);
        self.set_slot(pos, ptr);
        self.sift_up(pos);
    }

    /// Removes and returns the minimum element.
    pub fn poll(&mut self) -> Option<P> {
        if self.slots.is_empty() {
            return None;
        }
        Some(self.take(0))
    }

    /// Unlinks `item` and hands its ownership back.
    ///
    /// # Safety
    ///
    /// `item` must be in this heap.
    pub unsafe fn remove(&mut self, item: &P::Target) -> P {
        debug_assert!(self.contains(item), "element is not in this heap");
        self.take(item.get_node().index)
    }

    /// Like [BinaryHeap::remove], but verifies membership first.
    pub fn try_remove(&mut self, item: &P::Target) -> Result<P, Error> {
        if !self.contains(item) {
            log::debug!("binary_heap: refusing to remove {:p}, not in this heap", item);
            return Err(Error::NotLinked);
        }
        Ok(self.take(item.get_node().index))
    }

    /// Restores heap order after the key of `item` changed in either direction.
    pub fn update(&mut self, item: &P::Target) -> Result<(), Error> {
        if !self.contains(item) {
            return Err(Error::NotLinked);
        }
        let pos = item.get_node().index;
        if !self.sift_up(pos) {
            self.sift_down(pos);
        }
        Ok(())
    }

    /// Removes the minimum and inserts `item` with a single sift-down.
    ///
    /// Returns `None` (after inserting `item`) when the heap was empty.
    pub fn poll_and_insert(&mut self, item: P) -> Option<P> {
        if self.slots.is_empty() {
            self.insert(item);
            return None;
        }
        let top = self.slots[0];
        Some(self.replace_at(0, top, item))
    }

    /// Puts `item` in the place of `old` and hands `old` back.
    pub fn replace(&mut self, old: &P::Target, item: P) -> Result<P, Error> {
        if !self.contains(old) {
            return Err(Error::NotLinked);
        }
        let pos = old.get_node().index;
        Ok(self.replace_at(pos, old as *const P::Target, item))
    }

    fn replace_at(&mut self, pos: usize, old: *const P::Target, item: P) -> P {
        let ptr = item.into_raw();
        debug_assert!(!unsafe { (*ptr).get_node() }.is_linked(), "element already in heap");
        unsafe { (*old).get_node().index = NOT_IN_HEAP };
        self.set_slot(pos, ptr);
        if !self.sift_up(pos) {
            self.sift_down(pos);
        }
        unsafe { P::from_raw(old) }
    }

    fn take(&mut self, pos: usize) -> P {
        let ptr = self.slots[pos];
        unsafe { (*ptr).get_node().index = NOT_IN_HEAP };
        if let Some(last) = self.slots.pop() {
            if pos < self.slots.len() {
                self.set_slot(pos, last);
                if !self.sift_up(pos) {
                    self.sift_down(pos);
                }
            }
        }
        unsafe { P::from_raw(ptr) }
    }

    #[inline(always)]
    fn set_slot(&mut self, pos: usize, ptr: *const P::Target) {
        self.slots[pos] = ptr;
        unsafe { (*ptr).get_node().index = pos };
    }

    #[inline(always)]
    fn less(&self, a: *const P::Target, b: *const P::Target) -> bool {
        (self.is_less)(unsafe { &*a }, unsafe { &*b })
    }

    // Returns whether the element moved.
    fn sift_up(&mut self, pos: usize) -> bool {
        let ptr = self.slots[pos];
        let mut hole = pos;
        while hole > 0 {
            let parent = (hole - 1) / 2;
            let parent_ptr = self.slots[parent];
            if !self.less(ptr, parent_ptr) {
                break;
            }
            self.set_slot(hole, parent_ptr);
            hole = parent;
        }
        if hole != pos {
            self.set_slot(hole, ptr);
            return true;
        }
        false
    }

    fn sift_down(&mut self, pos: usize) {
        let len = self.slots.len();
        let ptr = self.slots[pos];
        let mut hole = pos;
        loop {
            let left = 2 * hole + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let smaller =
                if right < len && self.less(self.slots[right], self.slots[left]) { right } else { left };
            let smaller_ptr = self.slots[smaller];
            if !self.less(smaller_ptr, ptr) {
                break;
            }
            self.set_slot(hole, smaller_ptr);
            hole = smaller;
        }
        if hole != pos {
            self.set_slot(hole, ptr);
        }
    }

    /// Verifies heap order and that every element knows its own slot.
    pub fn check(&self) -> Result<(), CheckError> {
        for (pos, &ptr) in self.slots.iter().enumerate() {
            let found = unsafe { (*ptr).get_node() }.index;
            if found != pos {
                let e = CheckError::HeapIndex { expected: pos, found };
                log::debug!("binary_heap: check failed: {}", e);
                return Err(e);
            }
            if pos > 0 && self.less(ptr, self.slots[(pos - 1) / 2]) {
                log::debug!("binary_heap: check failed at slot {}", pos);
                return Err(CheckError::HeapOrder);
            }
        }
        Ok(())
    }
}

impl<P, Tag> Drop for BinaryHeap<P, Tag>
where
    P: Pointer,
    P::Target: HeapItem<Tag>,
{
    fn drop(&mut self) {
        if !self.slots.is_empty() && mem::needs_drop::<P>() {
            log::trace!("binary_heap: releasing {} nodes on drop", self.slots.len());
        }
        for ptr in self.slots.drain(..) {
            unsafe { (*ptr).get_node().index = NOT_IN_HEAP };
            if mem::needs_drop::<P>() {
                drop(unsafe { P::from_raw(ptr) });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::init_logger;
    use core::cell::{Cell, UnsafeCell};
    use proptest::prelude::*;
    use rand::Rng;
    use std::rc::Rc;

    struct Task {
        deadline: u64,
        node: UnsafeCell<HeapNode<()>>,
    }

    unsafe impl HeapItem<()> for Task {
        fn get_node(&self) -> &mut HeapNode<()> {
            unsafe { &mut *self.node.get() }
        }
    }

    fn new_task(deadline: u64) -> Box<Task> {
        Box::new(Task { deadline, node: UnsafeCell::new(HeapNode::default()) })
    }

    fn earlier(a: &Task, b: &Task) -> bool {
        a.deadline < b.deadline
    }

    fn drain(heap: &mut BinaryHeap<Box<Task>, ()>) -> Vec<u64> {
        let mut out = Vec::new();
        while let Some(task) = heap.poll() {
            assert!(!task.get_node().is_linked());
            out.push(task.deadline);
        }
        out
    }

    #[test]
    fn min_heap_order() {
        init_logger();
        let mut heap = BinaryHeap::with_capacity(8, earlier);
        assert!(heap.peek().is_none());
        for d in [10, 1, 5, 3, 8, 1] {
            heap.insert(new_task(d));
            heap.check().unwrap();
        }
        assert_eq!(heap.len(), 6);
        assert_eq!(heap.peek().unwrap().deadline, 1);
        assert_eq!(drain(&mut heap), vec![1, 1, 3, 5, 8, 10]);
        assert!(heap.is_empty());
    }

    #[test]
    fn remove_arbitrary() {
        let mut heap = BinaryHeap::new(earlier);
        for d in [7, 2, 9, 4, 6, 1, 8] {
            heap.insert(new_task(d));
        }
        let four = heap.slots.iter().find(|p| unsafe { (***p).deadline } == 4).copied().unwrap();
        let removed = heap.try_remove(unsafe { &*four }).unwrap();
        assert_eq!(removed.deadline, 4);
        assert_eq!(heap.try_remove(&removed).err(), Some(Error::NotLinked));
        heap.check().unwrap();
        assert_eq!(drain(&mut heap), vec![1, 2, 6, 7, 8, 9]);
    }

    struct Timer {
        deadline: Cell<u64>,
        node: UnsafeCell<HeapNode<()>>,
    }

    unsafe impl HeapItem<()> for Timer {
        fn get_node(&self) -> &mut HeapNode<()> {
            unsafe { &mut *self.node.get() }
        }
    }

    fn new_timer(deadline: u64) -> Rc<Timer> {
        Rc::new(Timer { deadline: Cell::new(deadline), node: UnsafeCell::new(HeapNode::default()) })
    }

    #[test]
    fn update_both_directions() {
        let mut heap =
            BinaryHeap::<Rc<Timer>, ()>::new(|a, b| a.deadline.get() < b.deadline.get());
        let timers: Vec<Rc<Timer>> = (0..10).map(|i| new_timer(i * 10)).collect();
        for t in &timers {
            heap.insert(t.clone());
        }
        timers[5].deadline.set(1);
        heap.update(&timers[5]).unwrap();
        heap.check().unwrap();
        assert_eq!(heap.peek().unwrap().deadline.get(), 0);

        timers[0].deadline.set(1000);
        heap.update(&timers[0]).unwrap();
        heap.check().unwrap();
        assert!(Rc::ptr_eq(&timers[5], &heap.poll().unwrap()));

        let stranger = new_timer(3);
        assert_eq!(heap.update(&stranger), Err(Error::NotLinked));
        drop(heap);
        for t in &timers {
            assert_eq!(Rc::strong_count(t), 1);
            assert!(!t.get_node().is_linked());
        }
    }

    #[test]
    fn poll_and_insert_and_replace() {
        let mut heap = BinaryHeap::new(earlier);
        assert!(heap.poll_and_insert(new_task(5)).is_none());
        for d in [3, 9, 7] {
            heap.insert(new_task(d));
        }
        let top = heap.poll_and_insert(new_task(8)).unwrap();
        assert_eq!(top.deadline, 3);
        heap.check().unwrap();
        assert_eq!(heap.peek().unwrap().deadline, 5);

        let nine = heap.slots.iter().find(|p| unsafe { (***p).deadline } == 9).copied().unwrap();
        let old = heap.replace(unsafe { &*nine }, new_task(1)).unwrap();
        assert_eq!(old.deadline, 9);
        assert!(!old.get_node().is_linked());
        heap.check().unwrap();
        assert_eq!(drain(&mut heap), vec![1, 5, 7, 8]);
    }

    #[test]
    fn random_against_sort() {
        let count = if cfg!(miri) { 100 } else { 5000 };
        let mut rng = rand::thread_rng();
        let mut heap = BinaryHeap::new(earlier);
        let mut expected = Vec::with_capacity(count);
        for _ in 0..count {
            let d = rng.gen_range(0..1000u64);
            expected.push(d);
            heap.insert(new_task(d));
        }
        heap.check().unwrap();
        expected.sort();
        assert_eq!(drain(&mut heap), expected);
    }

    proptest! {
        #[test]
        fn heap_matches_sorted_model(
            ops in prop::collection::vec((0u8..3, 0u64..64), 0..200)
        ) {
            let mut heap = BinaryHeap::new(earlier);
            let mut model: Vec<u64> = Vec::new();
            for (op, d) in ops {
                match op {
                    0 => {
                        heap.insert(new_task(d));
                        model.push(d);
                    }
                    1 => {
                        let polled = heap.poll().map(|t| t.deadline);
                        model.sort();
                        let expected = if model.is_empty() { None } else { Some(model.remove(0)) };
                        prop_assert_eq!(polled, expected);
                    }
                    _ => {
                        if let Some(pos) = model.iter().position(|v| *v == d) {
                            model.swap_remove(pos);
                            let ptr = heap.slots.iter()
                                .find(|p| unsafe { (***p).deadline } == d)
                                .copied()
                                .unwrap();
                            let removed = unsafe { heap.remove(&*ptr) };
                            prop_assert_eq!(removed.deadline, d);
                        }
                    }
                }
                prop_assert_eq!(heap.check(), Ok(()));
                prop_assert_eq!(heap.len(), model.len());
            }
        }
    }
}
