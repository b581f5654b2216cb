#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]

//! Intrusive ordered containers.
//!
//! Every container in this crate links elements through a node record embedded in the element
//! itself, so inserting and removing never allocates. Ownership of an element is handed over as a
//! [Pointer] (`Box`, `Arc`, `Rc`, `NonNull` or a raw pointer) and handed back on removal.
//!
//! The `Tag` type parameter on each item trait lets one element carry several node records and
//! sit in several containers at once.
//!
//! - [avl::AvlTree] and [rbtree::RbTree]: balanced binary search trees with cached leftmost and
//!   rightmost nodes.
//! - [binary_heap::BinaryHeap], [intrusive_heap::IntrusiveHeap] and
//!   [leftist_heap::LeftistHeap]: min-heaps.
//! - [limited_queue::LimitedQueue], [ordered_queue::OrderedQueue] and
//!   [unordered_queue::UnorderedQueue]: priority queues built on [dlist::DLinkedList].

extern crate alloc;

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::sync::Arc;
use core::cmp::Ordering;
use core::ptr::NonNull;

/// Strict weak ordering over container elements, fixed when the container is created.
pub type LessFunc<T> = fn(&T, &T) -> bool;

/// Compares a search key against an element.
pub type CmpFunc<K, T> = fn(&K, &T) -> Ordering;

/// Ownership adapter between a handle and the raw pointer stored inside a container.
pub trait Pointer: Sized {
    type Target;

    fn as_ref(&self) -> &Self::Target;

    /// # Safety
    ///
    /// `p` must come from [Pointer::into_raw] of the same pointer type.
    unsafe fn from_raw(p: *const Self::Target) -> Self;

    fn into_raw(self) -> *const Self::Target;
}

impl<T> Pointer for *const T {
    type Target = T;

    #[inline]
    fn as_ref(&self) -> &Self::Target {
        unsafe { &**self }
    }

    #[inline]
    unsafe fn from_raw(p: *const Self::Target) -> Self {
        p
    }

    #[inline]
    fn into_raw(self) -> *const Self::Target {
        self
    }
}

impl<T> Pointer for NonNull<T> {
    type Target = T;

    #[inline]
    fn as_ref(&self) -> &Self::Target {
        unsafe { NonNull::as_ref(self) }
    }

    #[inline]
    unsafe fn from_raw(p: *const Self::Target) -> Self {
        unsafe { NonNull::new_unchecked(p as *mut T) }
    }

    #[inline]
    fn into_raw(self) -> *const Self::Target {
        self.as_ptr()
    }
}

impl<T> Pointer for Box<T> {
    type Target = T;

    #[inline]
    fn as_ref(&self) -> &Self::Target {
        self
    }

    #[inline]
    unsafe fn from_raw(p: *const Self::Target) -> Self {
        unsafe { Box::from_raw(p as *mut T) }
    }

    #[inline]
    fn into_raw(self) -> *const Self::Target {
        Box::into_raw(self)
    }
}

impl<T> Pointer for Arc<T> {
    type Target = T;

    #[inline]
    fn as_ref(&self) -> &Self::Target {
        self
    }

    #[inline]
    unsafe fn from_raw(p: *const Self::Target) -> Self {
        unsafe { Arc::from_raw(p) }
    }

    #[inline]
    fn into_raw(self) -> *const Self::Target {
        Arc::into_raw(self)
    }
}

impl<T> Pointer for Rc<T> {
    type Target = T;

    #[inline]
    fn as_ref(&self) -> &Self::Target {
        self
    }

    #[inline]
    unsafe fn from_raw(p: *const Self::Target) -> Self {
        unsafe { Rc::from_raw(p) }
    }

    #[inline]
    fn into_raw(self) -> *const Self::Target {
        Rc::into_raw(self)
    }
}

/// Side of a binary tree node.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum Direction {
    Left = 0,
    Right = 1,
}

impl Direction {
    #[inline(always)]
    pub fn reverse(self) -> Direction {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }
}

pub mod error;
pub use error::{CheckError, Error};

pub mod avl;
pub mod binary_heap;
pub mod dlist;
pub mod intrusive_heap;
pub mod leftist_heap;
pub mod limited_queue;
pub mod ordered_queue;
pub mod rbtree;
pub mod unordered_queue;

#[cfg(test)]
pub(crate) mod test_util;
