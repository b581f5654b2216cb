//! An intrusive doubly linked list implementation.
//!
//! `DLinkedList` links elements through a `ListNode` embedded in the element. Besides O(1) push
//! and pop at both ends it can unlink any element, or insert in front of any element, in O(1).
//! The list-based priority queues of this crate are built on it.
//!
//! # Example
//! ```rust
//! use embed_trees::dlist::{DLinkedList, ListItem, ListNode};
//! use std::cell::UnsafeCell;
//!
//! struct Job {
//!     id: u32,
//!     node: UnsafeCell<ListNode<Job, ()>>,
//! }
//!
//! unsafe impl ListItem<()> for Job {
//!     fn get_node(&self) -> &mut ListNode<Self, ()> {
//!         unsafe { &mut *self.node.get() }
//!     }
//! }
//!
//! let new_job = |id| Box::new(Job { id, node: UnsafeCell::new(ListNode::default()) });
//! let mut list = DLinkedList::<Box<Job>, ()>::new();
//! list.push_back(new_job(1));
//! list.push_back(new_job(3));
//! let three = list.get_back().unwrap() as *const Job;
//! unsafe { list.insert_before(&*three, new_job(2)) };
//!
//! assert_eq!(list.iter().map(|j| j.id).collect::<Vec<_>>(), vec![1, 2, 3]);
//! let two = list.iter().nth(1).unwrap() as *const Job;
//! assert_eq!(unsafe { list.remove(&*two) }.id, 2);
//! assert_eq!(list.pop_front().unwrap().id, 1);
//! assert_eq!(list.len(), 1);
//! ```

use crate::Pointer;
use core::marker::PhantomData;
use core::{fmt, mem, ptr::null};

/// A trait to return internal mutable ListNode for specified list.
///
/// The tag is used to distinguish different ListNodes within the same item,
/// allowing an item to belong to multiple lists simultaneously.
///
/// # Safety
///
/// Implementors must ensure `get_node` returns a valid reference to the `ListNode`
/// embedded within `Self`. Users must use `UnsafeCell` to hold `ListNode` to support
/// interior mutability required by list operations.
pub unsafe trait ListItem<Tag>: Sized {
    fn get_node(&self) -> &mut ListNode<Self, Tag>;
}

/// The node structure that must be embedded in items to be stored in a `DLinkedList`.
pub struct ListNode<T: Sized, Tag> {
    prev: *const T,
    next: *const T,
    _phan: PhantomData<fn(&Tag)>,
}

unsafe impl<T, Tag> Send for ListNode<T, Tag> {}

impl<T: ListItem<Tag>, Tag> ListNode<T, Tag> {
    #[inline]
    fn get_prev<'a>(&self) -> Option<&'a mut ListNode<T, Tag>> {
        if self.prev.is_null() { None } else { unsafe { Some((*self.prev).get_node()) } }
    }

    #[inline]
    fn get_next<'a>(&self) -> Option<&'a mut ListNode<T, Tag>> {
        if self.next.is_null() { None } else { unsafe { Some((*self.next).get_node()) } }
    }
}

impl<T, Tag> Default for ListNode<T, Tag> {
    #[inline(always)]
    fn default() -> Self {
        Self { prev: null(), next: null(), _phan: Default::default() }
    }
}

impl<T: ListItem<Tag>, Tag> fmt::Debug for ListNode<T, Tag> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(prev: {:p} next: {:p})", self.prev, self.next)
    }
}

/// An intrusive doubly linked list.
pub struct DLinkedList<P, Tag>
where
    P: Pointer,
    P::Target: ListItem<Tag>,
{
    length: usize,
    head: *const P::Target,
    tail: *const P::Target,
    _phan: PhantomData<fn(P, &Tag)>,
}

unsafe impl<P, Tag> Send for DLinkedList<P, Tag>
where
    P: Pointer + Send,
    P::Target: ListItem<Tag>,
{
}

impl<P, Tag> fmt::Debug for DLinkedList<P, Tag>
where
    P: Pointer,
    P::Target: ListItem<Tag>,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{ length: {} head: {:p} tail: {:p} }}", self.length, self.head, self.tail)
    }
}

impl<P, Tag> Default for DLinkedList<P, Tag>
where
    P: Pointer,
    P::Target: ListItem<Tag>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P, Tag> DLinkedList<P, Tag>
where
    P: Pointer,
    P::Target: ListItem<Tag>,
{
    #[inline(always)]
    pub fn new() -> Self {
        DLinkedList { length: 0, head: null(), tail: null(), _phan: Default::default() }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.length
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[inline(always)]
    fn remove_node(&mut self, item: &P::Target) {
        let node = item.get_node();
        if let Some(prev) = node.get_prev() {
            prev.next = node.next;
        } else {
            self.head = node.next;
        }
        if let Some(next) = node.get_next() {
            next.prev = node.prev;
        } else {
            self.tail = node.prev;
        }
        node.next = null();
        node.prev = null();
        self.length -= 1;
    }

    /// Unlinks `item` and hands its ownership back.
    ///
    /// # Safety
    ///
    /// `item` must be linked into this list.
    #[inline]
    pub unsafe fn remove(&mut self, item: &P::Target) -> P {
        debug_assert!(!self.head.is_null(), "remove from an empty list");
        self.remove_node(item);
        unsafe { P::from_raw(item as *const P::Target) }
    }

    /// Links `item` right in front of `at`.
    ///
    /// # Safety
    ///
    /// `at` must be linked into this list.
    #[inline]
    pub unsafe fn insert_before(&mut self, at: &P::Target, item: P) {
        let at_ptr = at as *const P::Target;
        let at_node = at.get_node();
        let prev = at_node.prev;
        let ptr = item.into_raw();
        let node = unsafe { (*ptr).get_node() };
        node.prev = prev;
        node.next = at_ptr;
        at_node.prev = ptr;
        if prev.is_null() {
            self.head = ptr;
        } else {
            unsafe { (*prev).get_node().next = ptr };
        }
        self.length += 1;
    }

    #[inline]
    pub fn push_front(&mut self, item: P) {
        let ptr = item.into_raw();
        let node = unsafe { (*ptr).get_node() };
        let head = self.head;
        node.next = head;
        node.prev = null();

        if head.is_null() {
            self.tail = ptr;
        } else {
            unsafe {
                (*head).get_node().prev = ptr;
            }
        }
        self.head = ptr;
        self.length += 1;
    }

    #[inline]
    pub fn push_back(&mut self, item: P) {
        let ptr = item.into_raw();
        let node = unsafe { (*ptr).get_node() };
        let tail = self.tail;
        node.prev = tail;
        node.next = null();

        if tail.is_null() {
            self.head = ptr;
        } else {
            unsafe {
                (*tail).get_node().next = ptr;
            }
        }
        self.tail = ptr;
        self.length += 1;
    }

    pub fn pop_front(&mut self) -> Option<P> {
        if self.head.is_null() {
            None
        } else {
            let head_ptr = self.head;
            self.remove_node(unsafe { &*head_ptr });
            Some(unsafe { P::from_raw(head_ptr) })
        }
    }

    #[inline]
    pub fn pop_back(&mut self) -> Option<P> {
        if self.tail.is_null() {
            None
        } else {
            let tail_ptr = self.tail;
            self.remove_node(unsafe { &*tail_ptr });
            Some(unsafe { P::from_raw(tail_ptr) })
        }
    }

    #[inline]
    pub fn get_front(&self) -> Option<&P::Target> {
        unsafe { self.head.as_ref() }
    }

    #[inline]
    pub fn get_back(&self) -> Option<&P::Target> {
        unsafe { self.tail.as_ref() }
    }

    /// The element following `item`, which must be linked into this list.
    #[inline]
    pub fn next<'a>(&'a self, item: &P::Target) -> Option<&'a P::Target> {
        unsafe { item.get_node().next.as_ref() }
    }

    /// Returns an iterator over the list (borrowed).
    #[inline(always)]
    pub fn iter<'a>(&'a self) -> DLinkedListIterator<'a, P, Tag> {
        DLinkedListIterator { cur: self.head, _phan: PhantomData }
    }

    /// Returns a draining iterator that removes items from the back of the list.
    #[inline(always)]
    pub fn drain<'a>(&'a mut self) -> DLinkedListDrainer<'a, P, Tag> {
        DLinkedListDrainer { list: self }
    }

    /// Walks both directions and compares against the stored length.
    pub(crate) fn links_consistent(&self) -> bool {
        let mut count = 0;
        let mut prev: *const P::Target = null();
        let mut cur = self.head;
        while !cur.is_null() {
            let node = unsafe { (*cur).get_node() };
            if node.prev != prev {
                return false;
            }
            count += 1;
            prev = cur;
            cur = node.next;
        }
        prev == self.tail && count == self.length
    }
}

impl<P, Tag> Drop for DLinkedList<P, Tag>
where
    P: Pointer,
    P::Target: ListItem<Tag>,
{
    fn drop(&mut self) {
        if mem::needs_drop::<P>() {
            if self.length > 0 {
                log::trace!("dlist: releasing {} nodes on drop", self.length);
            }
            self.drain().for_each(drop);
        }
    }
}

pub struct DLinkedListIterator<'a, P, Tag>
where
    P: Pointer,
    P::Target: ListItem<Tag>,
{
    cur: *const P::Target,
    _phan: PhantomData<&'a DLinkedList<P, Tag>>,
}

impl<'a, P, Tag> Iterator for DLinkedListIterator<'a, P, Tag>
where
    P: Pointer,
    P::Target: ListItem<Tag>,
{
    type Item = &'a P::Target;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur.is_null() {
            return None;
        }
        let item = unsafe { &*self.cur };
        self.cur = item.get_node().next;
        Some(item)
    }
}

pub struct DLinkedListDrainer<'a, P, Tag>
where
    P: Pointer,
    P::Target: ListItem<Tag>,
{
    list: &'a mut DLinkedList<P, Tag>,
}

impl<'a, P, Tag> Iterator for DLinkedListDrainer<'a, P, Tag>
where
    P: Pointer,
    P::Target: ListItem<Tag>,
{
    type Item = P;

    #[inline]
    fn next(&mut self) -> Option<P> {
        self.list.pop_back()
    }
}
