//! A priority queue kept as a sorted intrusive list.
//!
//! Insertion scans for the position of the new element, so it costs O(n); peeking, polling and
//! removing any queued element are O(1). A good fit for short queues that are polled far more
//! often than they are filled.

use crate::dlist::{DLinkedList, ListItem};
use crate::error::CheckError;
use crate::{LessFunc, Pointer};

pub struct OrderedQueue<P, Tag>
where
    P: Pointer,
    P::Target: ListItem<Tag>,
{
    list: DLinkedList<P, Tag>,
    is_less: LessFunc<P::Target>,
}

impl<P, Tag> OrderedQueue<P, Tag>
where
    P: Pointer,
    P::Target: ListItem<Tag>,
{
    pub fn new(is_less: LessFunc<P::Target>) -> Self {
        Self { list: DLinkedList::new(), is_less }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Queues `item` behind every element that is not greater than it.
    pub fn insert(&mut self, item: P) {
        let is_less = self.is_less;
        let at = self.list.iter().find(|n| is_less(item.as_ref(), *n)).map(|n| n as *const P::Target);
        self.link_before(at, item);
    }

    /// Queues `item` ahead of every element that is not less than it.
    pub fn insert_front(&mut self, item: P) {
        let is_less = self.is_less;
        let at = self.list.iter().find(|n| !is_less(*n, item.as_ref())).map(|n| n as *const P::Target);
        self.link_before(at, item);
    }

    #[inline(always)]
    fn link_before(&mut self, at: Option<*const P::Target>, item: P) {
        match at {
            Some(at) => unsafe { self.list.insert_before(&*at, item) },
            None => self.list.push_back(item),
        }
    }

    #[inline]
    pub fn peek(&self) -> Option<&P::Target> {
        self.list.get_front()
    }

    #[inline]
    pub fn poll(&mut self) -> Option<P> {
        self.list.pop_front()
    }

    /// Unlinks `item` and hands its ownership back.
    ///
    /// # Safety
    ///
    /// `item` must be queued in this queue.
    #[inline]
    pub unsafe fn remove(&mut self, item: &P::Target) -> P {
        unsafe { self.list.remove(item) }
    }

    /// Elements from the front of the queue.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &P::Target> {
        self.list.iter()
    }

    pub fn check(&self) -> Result<(), CheckError> {
        if !self.list.links_consistent() {
            log::debug!("ordered_queue: broken links");
            return Err(CheckError::BrokenParentLink);
        }
        let mut iter = self.list.iter();
        let Some(mut prev) = iter.next() else { return Ok(()) };
        for item in iter {
            if (self.is_less)(item, prev) {
                log::debug!("ordered_queue: elements out of order");
                return Err(CheckError::OutOfOrder);
            }
            prev = item;
        }
        Ok(())
    }
}
