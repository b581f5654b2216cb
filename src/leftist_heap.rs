//! An intrusive leftist min-heap.
//!
//! Each node stores its rank `s`: one plus the rank of its right child, where a missing child has
//! rank 0. Children are kept so the right child never has a larger rank than the left one, which
//! bounds the right spine by O(log n) and makes merging two heaps O(log n).

use crate::error::CheckError;
use crate::{LessFunc, Pointer};
use core::marker::PhantomData;
use core::{fmt, mem, ptr::null};

/// A trait to return internal mutable LeftistNode for specified heap.
///
/// # Safety
///
/// Implementors must ensure `get_node` returns a valid reference to the `LeftistNode`
/// embedded within `Self`, held in an `UnsafeCell`.
pub unsafe trait LeftistItem<Tag>: Sized {
    fn get_node(&self) -> &mut LeftistNode<Self, Tag>;
}

pub struct LeftistNode<T: Sized, Tag> {
    parent: *const T,
    left: *const T,
    right: *const T,
    s: usize,
    _phan: PhantomData<fn(&Tag)>,
}

unsafe impl<T, Tag> Send for LeftistNode<T, Tag> {}

impl<T, Tag> LeftistNode<T, Tag> {
    #[inline(always)]
    fn detach(&mut self) {
        self.parent = null();
        self.left = null();
        self.right = null();
        self.s = 0;
    }

    /// Rank of the node, 0 while it is not in a heap.
    #[inline]
    pub fn rank(&self) -> usize {
        self.s
    }
}

impl<T, Tag> Default for LeftistNode<T, Tag> {
    fn default() -> Self {
        Self { parent: null(), left: null(), right: null(), s: 0, _phan: Default::default() }
    }
}

impl<T, Tag> fmt::Debug for LeftistNode<T, Tag> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(s: {} left: {:p} right: {:p})", self.s, self.left, self.right)
    }
}

macro_rules! leftist_node {
    ($data: expr) => {
        unsafe { (*$data).get_node() }
    };
}

pub struct LeftistHeap<P, Tag>
where
    P: Pointer,
    P::Target: LeftistItem<Tag>,
{
    root: *const P::Target,
    count: usize,
    is_less: LessFunc<P::Target>,
    _phan: PhantomData<fn(P, &Tag)>,
}

impl<P, Tag> LeftistHeap<P, Tag>
where
    P: Pointer,
    P::Target: LeftistItem<Tag>,
{
    pub fn new(is_less: LessFunc<P::Target>) -> Self {
        LeftistHeap { root: null(), count: 0, is_less, _phan: Default::default() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root.is_null()
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
    fn rank(data: *const P::Target) -> usize {
        if data.is_null() { 0 } else { leftist_node!(data).s }
    }

    // Swaps the children if needed and recomputes the rank. Returns whether the rank changed.
    #[inline(always)]
    fn fix_rank(data: *const P::Target) -> bool {
        let node = leftist_node!(data);
        let left_s = Self::rank(node.left);
        let mut right_s = Self::rank(node.right);
        if left_s < right_s {
            mem::swap(&mut node.left, &mut node.right);
            right_s = left_s;
        }
        let old = node.s;
        node.s = right_s + 1;
        old != node.s
    }

    /*
     * Merge two non-empty heaps. Walk down the right spines, always continuing with the smaller
     * of the two current roots and chaining the visited nodes through their parent links. Then
     * walk back up that chain, hanging each subtree as the right child of the node above it and
     * restoring the leftist shape on the way. The new root's parent link is left for the caller.
     */
    fn merge_nodes(&self, a: *const P::Target, b: *const P::Target) -> *const P::Target {
        let (mut smaller, mut bigger) = if self.less(b, a) { (b, a) } else { (a, b) };
        let new_root = smaller;
        let mut top = smaller;
        loop {
            let next = leftist_node!(smaller).right;
            if next.is_null() {
                break;
            }
            if self.less(next, bigger) {
                smaller = next;
            } else {
                smaller = bigger;
                bigger = next;
            }
            leftist_node!(smaller).parent = top;
            top = smaller;
        }

        let mut last = bigger;
        leftist_node!(bigger).parent = top;
        loop {
            leftist_node!(top).right = last;
            Self::fix_rank(top);
            if top == new_root {
                return top;
            }
            last = top;
            top = leftist_node!(top).parent;
        }
    }

    pub fn insert(&mut self, item: P) {
        let ptr = item.into_raw();
        let node = leftist_node!(ptr);
        debug_assert!(node.s == 0, "element already in heap");
        node.detach();
        node.s = 1;
        self.count += 1;
        if self.root.is_null() {
            self.root = ptr;
        } else {
            self.root = self.merge_nodes(self.root, ptr);
        }
        leftist_node!(self.root).parent = null();
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
        debug_assert!(self.contains(item), "element is not in this heap");
        let ptr = item as *const P::Target;
        self.unlink(ptr);
        unsafe { P::from_raw(ptr) }
    }

    /// Whether `item` is linked into this heap, found by following parent links to the root.
    pub fn contains(&self, item: &P::Target) -> bool {
        if self.root.is_null() || item.get_node().s == 0 {
            return false;
        }
        let mut top = item as *const P::Target;
        loop {
            let parent = leftist_node!(top).parent;
            if parent.is_null() {
                return top == self.root;
            }
            top = parent;
        }
    }

    fn unlink(&mut self, data: *const P::Target) {
        let node = leftist_node!(data);
        let parent = node.parent;
        let (left, right) = (node.left, node.right);
        let child = match (left.is_null(), right.is_null()) {
            (true, true) => null(),
            (false, true) => left,
            (true, false) => right,
            (false, false) => self.merge_nodes(left, right),
        };
        if !child.is_null() {
            leftist_node!(child).parent = parent;
        }
        if parent.is_null() {
            self.root = child;
        } else {
            let parent_node = leftist_node!(parent);
            if parent_node.left == data {
                parent_node.left = child;
            } else {
                parent_node.right = child;
            }
            // The replacing subtree may be shallower; fix ranks until they stop changing.
            let mut up = parent;
            while !up.is_null() && Self::fix_rank(up) {
                up = leftist_node!(up).parent;
            }
        }
        self.count -= 1;
        node.detach();
    }

    /// Moves every element of `other` into this heap, leaving `other` empty.
    pub fn merge(&mut self, other: &mut Self) {
        if other.root.is_null() {
            return;
        }
        if self.root.is_null() {
            self.root = other.root;
        } else {
            self.root = self.merge_nodes(self.root, other.root);
            leftist_node!(self.root).parent = null();
        }
        self.count += other.count;
        log::trace!("leftist_heap: merged {} nodes, {} total", other.count, self.count);
        other.root = null();
        other.count = 0;
    }

    /// Verifies heap order, parent links, the leftist shape and the stored ranks.
    pub fn check(&self) -> Result<(), CheckError> {
        let r = if self.root.is_null() {
            Ok(0)
        } else if !leftist_node!(self.root).parent.is_null() {
            Err(CheckError::RootHasParent)
        } else {
            self.check_node(self.root)
        };
        let r = match r {
            Ok(found) if found == self.count => Ok(()),
            Ok(found) => Err(CheckError::CountMismatch { expected: self.count, found }),
            Err(e) => Err(e),
        };
        r.inspect_err(|e| log::debug!("leftist_heap: check failed: {}", e))
    }

    // Returns the number of nodes below and including `root`. The left path can be as long as
    // the heap, so walk with an explicit stack.
    fn check_node(&self, root: *const P::Target) -> Result<usize, CheckError> {
        let mut stack = vec![root];
        let mut count = 0;
        while let Some(data) = stack.pop() {
            count += 1;
            let node = leftist_node!(data);
            for child in [node.left, node.right] {
                if child.is_null() {
                    continue;
                }
                if leftist_node!(child).parent != data {
                    return Err(CheckError::BrokenParentLink);
                }
                if self.less(child, data) {
                    return Err(CheckError::HeapOrder);
                }
                stack.push(child);
            }
            let left_s = Self::rank(node.left);
            let right_s = Self::rank(node.right);
            if right_s > left_s || node.s != right_s + 1 {
                return Err(CheckError::LeftistRank);
            }
        }
        Ok(count)
    }
}

impl<P, Tag> Drop for LeftistHeap<P, Tag>
where
    P: Pointer,
    P::Target: LeftistItem<Tag>,
{
    fn drop(&mut self) {
        if mem::needs_drop::<P>() {
            if self.count > 0 {
                log::trace!("leftist_heap: releasing {} nodes on drop", self.count);
            }
            while let Some(p) = self.poll() {
                drop(p);
            }
        }
    }
}
