//! A fully intrusive binary min-heap.
//!
//! Every element embeds its 1-based level-order position plus links to its two children; there
//! is no parent link and no slot array. The bits of a position below its leading one spell the
//! path from the root (0 = left, 1 = right), so the "level mask" of an index walks that path one
//! level at a time.
//!
//! Insertion and removal both descend once from the root towards a target position. Nodes on
//! the path that are not smaller than the element being placed shift one level down along the
//! path; when the target is a hole left by a removed node, the element then sifts down from
//! there.

use crate::error::CheckError;
use crate::{LessFunc, Pointer};
use alloc::collections::VecDeque;
use core::marker::PhantomData;
use core::{fmt, mem, ptr::null};

/// A trait to return internal mutable IntrusiveHeapNode for specified heap.
///
/// # Safety
///
/// Implementors must ensure `get_node` returns a valid reference to the `IntrusiveHeapNode`
/// embedded within `Self`, held in an `UnsafeCell`.
pub unsafe trait IntrusiveHeapItem<Tag>: Sized {
    fn get_node(&self) -> &mut IntrusiveHeapNode<Self, Tag>;
}

pub struct IntrusiveHeapNode<T: Sized, Tag> {
    index: usize,
    left: *const T,
    right: *const T,
    _phan: PhantomData<fn(&Tag)>,
}

unsafe impl<T, Tag> Send for IntrusiveHeapNode<T, Tag> {}

impl<T, Tag> IntrusiveHeapNode<T, Tag> {
    #[inline(always)]
    fn detach(&mut self) {
        self.index = 0;
        self.left = null();
        self.right = null();
    }

    #[inline]
    pub fn is_linked(&self) -> bool {
        self.index != 0
    }

    /// 1-based level-order position, 0 when not linked.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T, Tag> Default for IntrusiveHeapNode<T, Tag> {
    fn default() -> Self {
        Self { index: 0, left: null(), right: null(), _phan: Default::default() }
    }
}

impl<T, Tag> fmt::Debug for IntrusiveHeapNode<T, Tag> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(index: {} left: {:p} right: {:p})", self.index, self.left, self.right)
    }
}

macro_rules! heap_node {
    ($data: expr) => {
        unsafe { (*$data).get_node() }
    };
}

/// A child slot (or the root slot) holding a node pointer.
enum Link<T> {
    Root,
    Left(*const T),
    Right(*const T),
}

impl<T> Clone for Link<T> {
    #[inline(always)]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Link<T> {}

/// Mask of the bit deciding the first step below the root, 0 for the root itself.
#[inline(always)]
fn level_mask(index: usize) -> usize {
    debug_assert!(index > 0);
    if index < 2 { 0 } else { 1 << (usize::BITS - index.leading_zeros() - 2) }
}

pub struct IntrusiveHeap<P, Tag>
where
    P: Pointer,
    P::Target: IntrusiveHeapItem<Tag>,
{
    root: *const P::Target,
    count: usize,
    is_less: LessFunc<P::Target>,
    _phan: PhantomData<fn(P, &Tag)>,
}

impl<P, Tag> IntrusiveHeap<P, Tag>
where
    P: Pointer,
    P::Target: IntrusiveHeapItem<Tag>,
{
    pub fn new(is_less: LessFunc<P::Target>) -> Self {
        IntrusiveHeap { root: null(), count: 0, is_less, _phan: Default::default() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn peek(&self) -> Option<&P::Target> {
        unsafe { self.root.as_ref() }
    }

    #[inline(always)]
    fn less(&self, a: *const P::Target, b: *const P::Target) -> bool {
        (self.is_less)(unsafe { &*a }, unsafe { &*b })
    }

    #[inline(always)]
    fn get_link(&self, link: Link<P::Target>) -> *const P::Target {
        match link {
            Link::Root => self.root,
            Link::Left(p) => heap_node!(p).left,
            Link::Right(p) => heap_node!(p).right,
        }
    }

    #[inline(always)]
    fn set_link(&mut self, link: Link<P::Target>, data: *const P::Target) {
        match link {
            Link::Root => self.root = data,
            Link::Left(p) => heap_node!(p).left = data,
            Link::Right(p) => heap_node!(p).right = data,
        }
    }

    /*
     * Place `descending`, whose node already holds its target index, by walking from the root
     * to that index. While `descending` is not less than the node on the path, keep walking.
     * Once it is, `descending` takes that node's position and the displaced node continues the
     * walk in its stead, each displaced node moving one level down along the path. At the target
     * position the node found there, if any, is a removed node: its children are adopted and the
     * last displaced node sinks below them as far as needed.
     */
    fn insert_from_root(&mut self, mut descending: *const P::Target) {
        let index = heap_node!(descending).index;
        let mut mask = level_mask(index);
        let mut curr = self.root;
        let mut link = Link::Root;

        while mask != 0 && !self.less(descending, curr) {
            link = if index & mask == 0 { Link::Left(curr) } else { Link::Right(curr) };
            curr = self.get_link(link);
            mask >>= 1;
        }
        self.set_link(link, descending);

        while mask != 0 {
            let node = heap_node!(descending);
            let curr_node = heap_node!(curr);
            node.index = curr_node.index;
            if index & mask == 0 {
                node.left = curr;
                node.right = curr_node.right;
                link = Link::Left(descending);
                descending = curr;
                curr = curr_node.left;
            } else {
                node.right = curr;
                node.left = curr_node.left;
                link = Link::Right(descending);
                descending = curr;
                curr = curr_node.right;
            }
            mask >>= 1;
        }

        let node = heap_node!(descending);
        node.index = index;
        if curr.is_null() {
            node.left = null();
            node.right = null();
            return;
        }

        // `curr` is the removed node occupying the target position.
        let hole = heap_node!(curr);
        let mut left = hole.left;
        let mut right = hole.right;
        loop {
            let higher = if left.is_null() {
                null()
            } else if right.is_null() || self.less(left, right) {
                left
            } else {
                right
            };
            if higher.is_null() || self.less(descending, higher) {
                let node = heap_node!(descending);
                node.left = left;
                node.right = right;
                self.set_link(link, descending);
                return;
            }
            let higher_node = heap_node!(higher);
            let (higher_left, higher_right) = (higher_node.left, higher_node.right);
            mem::swap(&mut heap_node!(descending).index, &mut higher_node.index);
            self.set_link(link, higher);
            if higher == left {
                higher_node.right = right;
                link = Link::Left(higher);
            } else {
                higher_node.left = left;
                link = Link::Right(higher);
            }
            left = higher_left;
            right = higher_right;
        }
    }

    // Unlinks the node at the last position. Needs at least two nodes.
    fn remove_last(&mut self) -> *const P::Target {
        debug_assert!(self.count > 1);
        let mut mask = level_mask(self.count);
        let mut curr = self.root;
        let mut link;
        loop {
            link = if self.count & mask == 0 { Link::Left(curr) } else { Link::Right(curr) };
            curr = self.get_link(link);
            mask >>= 1;
            if mask == 0 {
                break;
            }
        }
        self.set_link(link, null());
        curr
    }

    pub fn insert(&mut self, item: P) {
        let ptr = item.into_raw();
        debug_assert!(!heap_node!(ptr).is_linked(), "element already in heap");
        self.count += 1;
        heap_node!(ptr).index = self.count;
        if self.count == 1 {
            let node = heap_node!(ptr);
            node.left = null();
            node.right = null();
            self.root = ptr;
            return;
        }
        self.insert_from_root(ptr);
    }

    pub fn poll(&mut self) -> Option<P> {
        if self.root.is_null() {
            return None;
        }
        let top = self.root;
        self.unlink(top);
        Some(unsafe { P::from_raw(top) })
    }

    /// Unlinks `item` and hands its ownership back.
    ///
    /// # Safety
    ///
    /// `item` must be in this heap.
    pub unsafe fn remove(&mut self, item: &P::Target) -> P {
        let ptr = item as *const P::Target;
        debug_assert!(item.get_node().is_linked() && item.get_node().index <= self.count);
        self.unlink(ptr);
        unsafe { P::from_raw(ptr) }
    }

    fn unlink(&mut self, data: *const P::Target) {
        if self.count == 1 {
            debug_assert_eq!(self.root, data);
            self.root = null();
            self.count = 0;
            heap_node!(data).detach();
            return;
        }
        let last = self.remove_last();
        self.count -= 1;
        if last != data {
            heap_node!(last).index = heap_node!(data).index;
            self.insert_from_root(last);
        }
        heap_node!(data).detach();
    }

    /// Removes the minimum and places `item` in the same descent.
    ///
    /// Returns `None` (after inserting `item`) when the heap was empty.
    pub fn poll_and_insert(&mut self, item: P) -> Option<P> {
        if self.root.is_null() {
            self.insert(item);
            return None;
        }
        let ptr = item.into_raw();
        debug_assert!(!heap_node!(ptr).is_linked(), "element already in heap");
        let top = self.root;
        heap_node!(ptr).index = 1;
        self.insert_from_root(ptr);
        heap_node!(top).detach();
        Some(unsafe { P::from_raw(top) })
    }

    /// Verifies heap order, parent-to-child index steps and level-order contiguity.
    pub fn check(&self) -> Result<(), CheckError> {
        self.check_inner().inspect_err(|e| log::debug!("intrusive_heap: check failed: {}", e))
    }

    fn check_inner(&self) -> Result<(), CheckError> {
        let mut queue = VecDeque::new();
        if !self.root.is_null() {
            queue.push_back(self.root);
        }
        let mut expected = 0;
        while let Some(data) = queue.pop_front() {
            expected += 1;
            let node = heap_node!(data);
            if node.index != expected {
                return Err(CheckError::HeapIndex { expected, found: node.index });
            }
            for child in [node.left, node.right] {
                if child.is_null() {
                    continue;
                }
                if self.less(child, data) {
                    return Err(CheckError::HeapOrder);
                }
                queue.push_back(child);
            }
        }
        if expected != self.count {
            return Err(CheckError::CountMismatch { expected: self.count, found: expected });
        }
        Ok(())
    }
}

impl<P, Tag> Drop for IntrusiveHeap<P, Tag>
where
    P: Pointer,
    P::Target: IntrusiveHeapItem<Tag>,
{
    fn drop(&mut self) {
        if mem::needs_drop::<P>() {
            if self.count > 0 {
                log::trace!("intrusive_heap: releasing {} nodes on drop", self.count);
            }
            while let Some(p) = self.poll() {
                drop(p);
            }
        }
    }
}
