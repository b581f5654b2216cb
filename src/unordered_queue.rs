//! A priority queue kept as an unsorted intrusive list with a lazily cached minimum.
//!
//! Inserting is O(1) and so is removing any queued element. The position of the minimum is
//! cached; once the cached element leaves the queue the next [UnorderedQueue::peek] or
//! [UnorderedQueue::poll] rescans the list, so polling costs O(n). Among equal elements the one
//! nearest the front wins.

use crate::dlist::{DLinkedList, ListItem};
use crate::error::CheckError;
use crate::{LessFunc, Pointer};
use core::cell::Cell;
use core::ptr::null;

pub struct UnorderedQueue<P, Tag>
where
    P: Pointer,
    P::Target: ListItem<Tag>,
{
    list: DLinkedList<P, Tag>,
    // Null when unknown.
    min: Cell<*const P::Target>,
    is_less: LessFunc<P::Target>,
}

impl<P, Tag> UnorderedQueue<P, Tag>
where
    P: Pointer,
    P::Target: ListItem<Tag>,
{
    pub fn new(is_less: LessFunc<P::Target>) -> Self {
        Self { list: DLinkedList::new(), min: Cell::new(null()), is_less }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Queues `item` at the back, behind elements equal to it.
    pub fn insert(&mut self, item: P) {
        let min = self.min.get();
        if !min.is_null() && (self.is_less)(item.as_ref(), unsafe { &*min }) {
            self.min.set(item.as_ref());
        }
        self.list.push_back(item);
    }

    /// Queues `item` at the front, ahead of elements equal to it.
    pub fn insert_front(&mut self, item: P) {
        let min = self.min.get();
        if !min.is_null() && !(self.is_less)(unsafe { &*min }, item.as_ref()) {
            self.min.set(item.as_ref());
        }
        self.list.push_front(item);
    }

    fn scan_min(&self) -> *const P::Target {
        let mut iter = self.list.iter();
        let Some(mut min) = iter.next() else { return null() };
        for item in iter {
            if (self.is_less)(item, min) {
                min = item;
            }
        }
        min
    }

    fn min_ptr(&self) -> *const P::Target {
        let mut min = self.min.get();
        if min.is_null() {
            min = self.scan_min();
            self.min.set(min);
        }
        min
    }

    #[inline]
    pub fn peek(&self) -> Option<&P::Target> {
        unsafe { self.min_ptr().as_ref() }
    }

    pub fn poll(&mut self) -> Option<P> {
        let min = self.min_ptr();
        if min.is_null() {
            return None;
        }
        self.min.set(null());
        Some(unsafe { self.list.remove(&*min) })
    }

    /// Unlinks `item` and hands its ownership back.
    ///
    /// # Safety
    ///
    /// `item` must be queued in this queue.
    pub unsafe fn remove(&mut self, item: &P::Target) -> P {
        if core::ptr::eq(self.min.get(), item) {
            self.min.set(null());
        }
        unsafe { self.list.remove(item) }
    }

    /// Elements in queue order, which is not priority order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &P::Target> {
        self.list.iter()
    }

    pub fn check(&self) -> Result<(), CheckError> {
        if !self.list.links_consistent() {
            log::debug!("unordered_queue: broken links");
            return Err(CheckError::BrokenParentLink);
        }
        let min = self.min.get();
        if !min.is_null() && !core::ptr::eq(min, self.scan_min()) {
            log::debug!("unordered_queue: cached minimum {:p} is stale", min);
            return Err(CheckError::StaleMinimum);
        }
        Ok(())
    }
}
