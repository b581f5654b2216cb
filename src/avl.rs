//! An intrusive AVL tree implementation.
//!
//! The tree keeps its leftmost and rightmost nodes cached, so `first`/`last` are O(1) and
//! inserting below the current minimum or at/above the current maximum skips the root-to-leaf
//! descent entirely. Elements that compare equal are kept in insertion order.
//!
//! Every node carries a parent link and a three-state balance factor. After an insertion at most
//! one single or double rotation restores the height invariant; a removal may rotate once per
//! level on its way back to the root.

use crate::error::{CheckError, Error};
use crate::{CmpFunc, Direction, LessFunc, Pointer};
use alloc::rc::Rc;
use alloc::sync::Arc;
use core::cmp::Ordering;
use core::marker::PhantomData;
use core::{fmt, mem, ptr::null};

/// A trait to return internal mutable AvlNode for specified tree.
///
/// The tag is used to distinguish different AvlNodes within the same item,
/// allowing an item to belong to multiple trees simultaneously.
/// For only one ownership, you can use `()`.
///
/// # Safety
///
/// Implementors must ensure `get_node` returns a valid reference to the `AvlNode`
/// embedded within `Self`. Users must use `UnsafeCell` to hold `AvlNode` to support
/// interior mutability required by tree operations.
pub unsafe trait AvlItem<Tag>: Sized {
    fn get_node(&self) -> &mut AvlNode<Self, Tag>;
}

/// Height relation between the two subtrees of a node.
#[derive(PartialEq, Eq, Debug, Copy, Clone, Default)]
pub enum AvlBalance {
    #[default]
    Balanced,
    LeftHeavy,
    RightHeavy,
}

impl AvlBalance {
    #[inline(always)]
    fn heavy(dir: Direction) -> Self {
        match dir {
            Direction::Left => AvlBalance::LeftHeavy,
            Direction::Right => AvlBalance::RightHeavy,
        }
    }
}

pub struct AvlNode<T: Sized, Tag> {
    left: *const T,
    right: *const T,
    parent: *const T,
    balance: AvlBalance,
    _phan: PhantomData<fn(&Tag)>,
}

unsafe impl<T, Tag> Send for AvlNode<T, Tag> {}

impl<T: AvlItem<Tag>, Tag> AvlNode<T, Tag> {
    #[inline(always)]
    fn detach(&mut self) {
        self.left = null();
        self.right = null();
        self.parent = null();
        self.balance = AvlBalance::Balanced;
    }

    #[inline(always)]
    fn get_child(&self, dir: Direction) -> *const T {
        match dir {
            Direction::Left => self.left,
            Direction::Right => self.right,
        }
    }

    #[inline(always)]
    fn set_child(&mut self, dir: Direction, child: *const T) {
        match dir {
            Direction::Left => self.left = child,
            Direction::Right => self.right = child,
        }
    }

    #[inline(always)]
    fn is_detached(&self) -> bool {
        self.left.is_null() && self.right.is_null() && self.parent.is_null()
    }

    #[inline]
    pub fn parent(&self) -> Option<&T> {
        unsafe { self.parent.as_ref() }
    }

    #[inline]
    pub fn left(&self) -> Option<&T> {
        unsafe { self.left.as_ref() }
    }

    #[inline]
    pub fn right(&self) -> Option<&T> {
        unsafe { self.right.as_ref() }
    }

    #[inline]
    pub fn balance(&self) -> AvlBalance {
        self.balance
    }
}

impl<T, Tag> Default for AvlNode<T, Tag> {
    fn default() -> Self {
        Self {
            left: null(),
            right: null(),
            parent: null(),
            balance: AvlBalance::Balanced,
            _phan: Default::default(),
        }
    }
}

impl<T: AvlItem<Tag>, Tag> fmt::Debug for AvlNode<T, Tag> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({:?} ", self.balance)?;

        if !self.left.is_null() {
            write!(f, "left: {:p} ", self.left)?;
        } else {
            write!(f, "left: none ")?;
        }

        if !self.right.is_null() {
            write!(f, "right: {:p}", self.right)?;
        } else {
            write!(f, "right: none")?;
        }
        write!(f, ")")
    }
}

macro_rules! avl_node {
    ($data: expr) => {
        unsafe { (*$data).get_node() }
    };
}

pub struct AvlTree<P, Tag>
where
    P: Pointer,
    P::Target: AvlItem<Tag>,
{
    root: *const P::Target,
    leftmost: *const P::Target,
    rightmost: *const P::Target,
    count: usize,
    is_less: LessFunc<P::Target>,
    _phan: PhantomData<fn(P, &Tag)>,
}

impl<P, Tag> AvlTree<P, Tag>
where
    P: Pointer,
    P::Target: AvlItem<Tag>,
{
    /// Creates an empty tree ordered by `is_less`.
    pub fn new(is_less: LessFunc<P::Target>) -> Self {
        AvlTree {
            root: null(),
            leftmost: null(),
            rightmost: null(),
            count: 0,
            is_less,
            _phan: Default::default(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root.is_null()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn root(&self) -> Option<&P::Target> {
        unsafe { self.root.as_ref() }
    }

    /// The smallest element, kept cached.
    #[inline]
    pub fn first(&self) -> Option<&P::Target> {
        unsafe { self.leftmost.as_ref() }
    }

    /// The largest element, kept cached.
    #[inline]
    pub fn last(&self) -> Option<&P::Target> {
        unsafe { self.rightmost.as_ref() }
    }

    /// Links `new_data` into the tree. Elements equal to existing ones go after them.
    pub fn insert(&mut self, new_data: P) {
        let new_ptr = new_data.into_raw();
        let node = avl_node!(new_ptr);
        debug_assert!(node.is_detached() && self.root != new_ptr, "node is already linked");
        node.detach();
        self.count += 1;

        if self.root.is_null() {
            self.root = new_ptr;
            self.leftmost = new_ptr;
            self.rightmost = new_ptr;
            return;
        }

        let is_less = self.is_less;
        let item = unsafe { &*new_ptr };
        let (here, which_child) = if is_less(item, unsafe { &*self.leftmost }) {
            let here = self.leftmost;
            self.leftmost = new_ptr;
            (here, Direction::Left)
        } else if !is_less(item, unsafe { &*self.rightmost }) {
            let here = self.rightmost;
            self.rightmost = new_ptr;
            (here, Direction::Right)
        } else {
            let mut here = self.root;
            loop {
                let dir =
                    if is_less(item, unsafe { &*here }) { Direction::Left } else { Direction::Right };
                let child = avl_node!(here).get_child(dir);
                if child.is_null() {
                    break (here, dir);
                }
                here = child;
            }
        };
        node.parent = here;
        avl_node!(here).set_child(which_child, new_ptr);

        self.rebalance_after_insert(new_ptr);
    }

    /*
     * Back up the tree modifying the balance of all nodes above the insertion point. A node that
     * was balanced now leans towards the new leaf and its height grew, so keep going. A node that
     * leaned the other way is now balanced and the height did not change, so stop. A node that
     * already leaned this way needs one rotation, after which the subtree has its old height.
     */
    fn rebalance_after_insert(&mut self, mut child: *const P::Target) {
        loop {
            let parent = avl_node!(child).parent;
            if parent.is_null() {
                return;
            }
            let parent_node = avl_node!(parent);
            let dir = self.parent_direction(child, parent);
            if parent_node.balance == AvlBalance::Balanced {
                parent_node.balance = AvlBalance::heavy(dir);
                child = parent;
            } else if parent_node.balance == AvlBalance::heavy(dir) {
                if avl_node!(child).balance == AvlBalance::heavy(dir.reverse()) {
                    self.rotate_double(parent, dir);
                } else {
                    self.rotate_single(parent, dir);
                }
                return;
            } else {
                parent_node.balance = AvlBalance::Balanced;
                return;
            }
        }
    }

    #[inline(always)]
    fn parent_direction(&self, data: *const P::Target, parent: *const P::Target) -> Direction {
        if avl_node!(parent).left == data { Direction::Left } else { Direction::Right }
    }

    // Point the link that held `old` (a child slot of `parent`, or the root) at `new`.
    #[inline(always)]
    fn replace_child(
        &mut self, parent: *const P::Target, old: *const P::Target, new: *const P::Target,
    ) {
        if parent.is_null() {
            self.root = new;
        } else {
            let parent_node = avl_node!(parent);
            if parent_node.left == old {
                parent_node.left = new;
            } else {
                debug_assert_eq!(parent_node.right, old);
                parent_node.right = new;
            }
        }
    }

    /*
     * `data` is too heavy on side `dir`. Its child on that side becomes the subtree root and
     * `data` moves down on the other side, adopting the child's inner subtree.
     *
     * When the child leaned the same way (always the case after an insertion) both end up
     * balanced. When the child was balanced (only after a removal) the subtree height is
     * unchanged and both keep leaning, in opposite directions.
     *
     * Returns the new subtree root.
     */
    fn rotate_single(&mut self, data: *const P::Target, dir: Direction) -> *const P::Target {
        let dir_inverse = dir.reverse();
        let node = avl_node!(data);
        let child = node.get_child(dir);
        let child_node = avl_node!(child);
        let (node_balance, child_balance) = if child_node.balance == AvlBalance::heavy(dir) {
            (AvlBalance::Balanced, AvlBalance::Balanced)
        } else {
            (AvlBalance::heavy(dir), AvlBalance::heavy(dir_inverse))
        };
        let parent = node.parent;

        let inner = child_node.get_child(dir_inverse);
        node.set_child(dir, inner);
        if !inner.is_null() {
            avl_node!(inner).parent = data;
        }
        child_node.set_child(dir_inverse, data);
        node.parent = child;
        node.balance = node_balance;
        child_node.parent = parent;
        child_node.balance = child_balance;
        self.replace_child(parent, data, child);
        child
    }

    /*
     * `data` is too heavy on side `dir` and its child on that side leans inwards. The inner
     * grandchild becomes the subtree root with `data` and the child as its two children; the
     * grandchild's own subtrees are handed out to them. The new root is always balanced.
     */
    fn rotate_double(&mut self, data: *const P::Target, dir: Direction) -> *const P::Target {
        let dir_inverse = dir.reverse();
        let node = avl_node!(data);
        let child = node.get_child(dir);
        let child_node = avl_node!(child);
        let grand = child_node.get_child(dir_inverse);
        let grand_node = avl_node!(grand);
        let (node_balance, child_balance) = if grand_node.balance == AvlBalance::heavy(dir_inverse)
        {
            (AvlBalance::Balanced, AvlBalance::heavy(dir))
        } else if grand_node.balance == AvlBalance::heavy(dir) {
            (AvlBalance::heavy(dir_inverse), AvlBalance::Balanced)
        } else {
            (AvlBalance::Balanced, AvlBalance::Balanced)
        };
        let parent = node.parent;

        let grand_inner = grand_node.get_child(dir_inverse);
        let grand_outer = grand_node.get_child(dir);
        node.set_child(dir, grand_inner);
        if !grand_inner.is_null() {
            avl_node!(grand_inner).parent = data;
        }
        child_node.set_child(dir_inverse, grand_outer);
        if !grand_outer.is_null() {
            avl_node!(grand_outer).parent = child;
        }
        grand_node.set_child(dir_inverse, data);
        grand_node.set_child(dir, child);

        node.parent = grand;
        node.balance = node_balance;
        child_node.parent = grand;
        child_node.balance = child_balance;
        grand_node.parent = parent;
        grand_node.balance = AvlBalance::Balanced;
        self.replace_child(parent, data, grand);
        grand
    }

    /// Unlinks `del` from the tree and hands its ownership back.
    ///
    /// # Safety
    ///
    /// `del` must be linked into this tree.
    pub unsafe fn remove(&mut self, del: &P::Target) -> P {
        debug_assert!(self.contains(del), "node is not linked into this tree");
        let del_ptr = del as *const P::Target;
        self.unlink(del_ptr);
        unsafe { P::from_raw(del_ptr) }
    }

    /// Like [AvlTree::remove], but verifies that `del` belongs to this tree first.
    pub fn try_remove(&mut self, del: &P::Target) -> Result<P, Error> {
        if !self.contains(del) {
            log::debug!("avl: refusing to remove {:p}, not linked into this tree", del);
            return Err(Error::NotLinked);
        }
        Ok(unsafe { self.remove(del) })
    }

    #[inline]
    pub fn pop_first(&mut self) -> Option<P> {
        let first = self.leftmost;
        if first.is_null() {
            return None;
        }
        self.unlink(first);
        Some(unsafe { P::from_raw(first) })
    }

    #[inline]
    pub fn pop_last(&mut self) -> Option<P> {
        let last = self.rightmost;
        if last.is_null() {
            return None;
        }
        self.unlink(last);
        Some(unsafe { P::from_raw(last) })
    }

    /// Whether `data` is linked into this tree, found by following parent links to the root.
    pub fn contains(&self, data: &P::Target) -> bool {
        if self.root.is_null() {
            return false;
        }
        let mut top = data as *const P::Target;
        loop {
            let parent = avl_node!(top).parent;
            if parent.is_null() {
                return top == self.root;
            }
            top = parent;
        }
    }

    fn unlink(&mut self, del: *const P::Target) {
        let del_node = avl_node!(del);
        let left = del_node.left;
        let right = del_node.right;
        let parent = del_node.parent;

        // The subtree below `shrunk_parent` on side `shrunk_dir` lost one level.
        let shrunk_parent: *const P::Target;
        let mut shrunk_dir = Direction::Left;

        if !left.is_null() && !right.is_null() {
            /*
             * Two children: the in-order successor (leftmost of the right subtree) has no left
             * child. Splice it out of its position and let it take over the removed node's
             * place, links and balance.
             */
            let successor = self.bottom_child_ref(right, Direction::Left);
            let successor_node = avl_node!(successor);
            let x = successor_node.right;

            avl_node!(left).parent = successor;
            successor_node.left = left;
            if successor != right {
                let successor_parent = successor_node.parent;
                if !x.is_null() {
                    avl_node!(x).parent = successor_parent;
                }
                avl_node!(successor_parent).left = x;
                successor_node.right = right;
                avl_node!(right).parent = successor;
                shrunk_parent = successor_parent;
            } else {
                shrunk_parent = successor;
                shrunk_dir = Direction::Right;
            }
            self.replace_child(parent, del, successor);
            successor_node.parent = parent;
            successor_node.balance = del_node.balance;
        } else {
            let x = if left.is_null() { right } else { left };
            if !parent.is_null() {
                shrunk_dir = self.parent_direction(del, parent);
            }
            shrunk_parent = parent;
            if !x.is_null() {
                avl_node!(x).parent = parent;
            }
            self.replace_child(parent, del, x);

            if self.leftmost == del {
                self.leftmost =
                    if right.is_null() { parent } else { self.bottom_child_ref(x, Direction::Left) };
            }
            if self.rightmost == del {
                self.rightmost =
                    if left.is_null() { parent } else { self.bottom_child_ref(x, Direction::Right) };
            }
        }

        self.count -= 1;
        del_node.detach();
        if !shrunk_parent.is_null() {
            self.rebalance_after_delete(shrunk_parent, shrunk_dir);
        }
    }

    /*
     * Walk up from the node whose `dir` subtree got shorter. A balanced node just starts leaning
     * the other way and absorbs the change. A node that leaned towards `dir` becomes balanced and
     * passes the shrink upwards. A node that leaned away is rotated; the rotation only leaves the
     * height unchanged (and stops the walk) when the sibling subtree was balanced.
     */
    fn rebalance_after_delete(&mut self, mut data: *const P::Target, mut dir: Direction) {
        loop {
            let node = avl_node!(data);
            let dir_inverse = dir.reverse();
            let top = if node.balance == AvlBalance::Balanced {
                node.balance = AvlBalance::heavy(dir_inverse);
                return;
            } else if node.balance == AvlBalance::heavy(dir) {
                node.balance = AvlBalance::Balanced;
                data
            } else {
                let sibling_balance = avl_node!(node.get_child(dir_inverse)).balance;
                if sibling_balance == AvlBalance::heavy(dir) {
                    self.rotate_double(data, dir_inverse)
                } else {
                    let top = self.rotate_single(data, dir_inverse);
                    if sibling_balance == AvlBalance::Balanced {
                        return;
                    }
                    top
                }
            };
            let parent = avl_node!(top).parent;
            if parent.is_null() {
                return;
            }
            dir = self.parent_direction(top, parent);
            data = parent;
        }
    }

    /// Searches for an element equal to `val`. With duplicates any one of them may be returned.
    pub fn find<'a, K>(&'a self, val: &K, cmp_func: CmpFunc<K, P::Target>) -> Option<&'a P::Target> {
        let mut data = self.root;
        while !data.is_null() {
            let item = unsafe { &*data };
            match cmp_func(val, item) {
                Ordering::Equal => return Some(item),
                Ordering::Less => data = avl_node!(data).left,
                Ordering::Greater => data = avl_node!(data).right,
            }
        }
        None
    }

    /// The first element that is not less than `val`.
    pub fn find_larger_eq<'a, K>(
        &'a self, val: &K, cmp_func: CmpFunc<K, P::Target>,
    ) -> Option<&'a P::Target> {
        let mut data = self.root;
        let mut candidate: *const P::Target = null();
        while !data.is_null() {
            if cmp_func(val, unsafe { &*data }) == Ordering::Greater {
                data = avl_node!(data).right;
            } else {
                candidate = data;
                data = avl_node!(data).left;
            }
        }
        unsafe { candidate.as_ref() }
    }

    #[inline(always)]
    fn bottom_child_ref(&self, mut data: *const P::Target, dir: Direction) -> *const P::Target {
        loop {
            let child = avl_node!(data).get_child(dir);
            if !child.is_null() {
                data = child;
            } else {
                return data;
            }
        }
    }

    pub fn next(&self, data: &P::Target) -> Option<&P::Target> {
        self.walk_dir(data, Direction::Right)
    }

    pub fn prev(&self, data: &P::Target) -> Option<&P::Target> {
        self.walk_dir(data, Direction::Left)
    }

    #[inline]
    pub fn walk_dir(&self, data: &P::Target, dir: Direction) -> Option<&P::Target> {
        let dir_inverse = dir.reverse();
        let node = data.get_node();
        let temp = node.get_child(dir);
        if !temp.is_null() {
            return unsafe { self.bottom_child_ref(temp, dir_inverse).as_ref() };
        }
        let mut data_ptr = data as *const P::Target;
        let mut parent = node.parent;
        while !parent.is_null() {
            if self.parent_direction(data_ptr, parent) == dir_inverse {
                return unsafe { parent.as_ref() };
            }
            data_ptr = parent;
            parent = avl_node!(parent).parent;
        }
        None
    }

    /// In-order iterator from the smallest element.
    pub fn iter(&self) -> AvlIter<'_, P, Tag> {
        AvlIter { tree: self, cur: self.first() }
    }

    /// Verifies parent links, ordering, balance factors, the cached bounds and the count.
    pub fn check(&self) -> Result<(), CheckError> {
        self.check_inner().inspect_err(|e| log::debug!("avl: check failed: {}", e))
    }

    fn check_inner(&self) -> Result<(), CheckError> {
        if self.root.is_null() {
            if !self.leftmost.is_null() {
                return Err(CheckError::StaleLeftmost);
            }
            if !self.rightmost.is_null() {
                return Err(CheckError::StaleRightmost);
            }
            if self.count != 0 {
                return Err(CheckError::CountMismatch { expected: self.count, found: 0 });
            }
            return Ok(());
        }
        if !avl_node!(self.root).parent.is_null() {
            return Err(CheckError::RootHasParent);
        }
        let mut visited = 0;
        self.check_node(self.root, &mut visited)?;
        if visited != self.count {
            return Err(CheckError::CountMismatch { expected: self.count, found: visited });
        }
        if self.leftmost != self.bottom_child_ref(self.root, Direction::Left) {
            return Err(CheckError::StaleLeftmost);
        }
        if self.rightmost != self.bottom_child_ref(self.root, Direction::Right) {
            return Err(CheckError::StaleRightmost);
        }
        let mut prev: Option<&P::Target> = None;
        for item in self.iter() {
            if let Some(prev) = prev {
                if (self.is_less)(item, prev) {
                    return Err(CheckError::OutOfOrder);
                }
            }
            prev = Some(item);
        }
        Ok(())
    }

    // Returns the height of the subtree rooted at `data`.
    fn check_node(&self, data: *const P::Target, visited: &mut usize) -> Result<usize, CheckError> {
        *visited += 1;
        let node = avl_node!(data);
        let mut heights = [0usize; 2];
        for dir in [Direction::Left, Direction::Right] {
            let child = node.get_child(dir);
            if !child.is_null() {
                if avl_node!(child).parent != data {
                    return Err(CheckError::BrokenParentLink);
                }
                heights[dir as usize] = self.check_node(child, visited)?;
            }
        }
        let (left, right) = (heights[0], heights[1]);
        let expected = match left.cmp(&right) {
            Ordering::Equal => AvlBalance::Balanced,
            Ordering::Greater if left == right + 1 => AvlBalance::LeftHeavy,
            Ordering::Less if right == left + 1 => AvlBalance::RightHeavy,
            _ => return Err(CheckError::BalanceMismatch { left, right }),
        };
        if node.balance != expected {
            return Err(CheckError::BalanceMismatch { left, right });
        }
        Ok(left.max(right) + 1)
    }

    /// Panics when [AvlTree::check] fails.
    pub fn validate(&self) {
        if let Err(e) = self.check() {
            panic!("invalid avl tree: {}", e);
        }
    }
}

pub struct AvlIter<'a, P, Tag>
where
    P: Pointer,
    P::Target: AvlItem<Tag>,
{
    tree: &'a AvlTree<P, Tag>,
    cur: Option<&'a P::Target>,
}

impl<'a, P, Tag> Iterator for AvlIter<'a, P, Tag>
where
    P: Pointer,
    P::Target: AvlItem<Tag>,
{
    type Item = &'a P::Target;

    fn next(&mut self) -> Option<Self::Item> {
        let cur = self.cur?;
        self.cur = self.tree.next(cur);
        Some(cur)
    }
}

impl<P, Tag> Drop for AvlTree<P, Tag>
where
    P: Pointer,
    P::Target: AvlItem<Tag>,
{
    fn drop(&mut self) {
        if mem::needs_drop::<P>() {
            if self.count > 0 {
                log::trace!("avl: releasing {} nodes on drop", self.count);
            }
            while let Some(p) = self.pop_first() {
                drop(p);
            }
        }
    }
}

impl<T, Tag> AvlTree<Arc<T>, Tag>
where
    T: AvlItem<Tag>,
{
    /// Unlinks the element `node` points to and releases the tree's reference.
    pub fn remove_ref(&mut self, node: &Arc<T>) -> Result<(), Error> {
        self.try_remove(node).map(drop)
    }
}

impl<T, Tag> AvlTree<Rc<T>, Tag>
where
    T: AvlItem<Tag>,
{
    /// Unlinks the element `node` points to and releases the tree's reference.
    pub fn remove_ref(&mut self, node: &Rc<T>) -> Result<(), Error> {
        self.try_remove(node).map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::init_logger;
    use core::cell::UnsafeCell;
    use core::fmt::Write;
    use proptest::prelude::*;
    use rand::Rng;
    use std::time::Instant;

    struct IntAvlNode {
        pub value: i64,
        pub node: UnsafeCell<AvlNode<Self, ()>>,
    }

    impl fmt::Debug for IntAvlNode {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "{} {:#?}", self.value, self.node)
        }
    }

    unsafe impl AvlItem<()> for IntAvlNode {
        fn get_node(&self) -> &mut AvlNode<Self, ()> {
            unsafe { &mut *self.node.get() }
        }
    }

    type IntAvlTree = AvlTree<Box<IntAvlNode>, ()>;

    fn new_intnode(i: i64) -> Box<IntAvlNode> {
        Box::new(IntAvlNode { node: UnsafeCell::new(AvlNode::default()), value: i })
    }

    fn new_inttree() -> IntAvlTree {
        AvlTree::new(is_less_int_node)
    }

    fn is_less_int_node(a: &IntAvlNode, b: &IntAvlNode) -> bool {
        a.value < b.value
    }

    fn cmp_int(a: &i64, b: &IntAvlNode) -> Ordering {
        a.cmp(&b.value)
    }

    // "value" plus "<"/">" for a left/right lean, then "(left,right)" unless it is a leaf.
    fn fmt_subtree(data: Option<&IntAvlNode>, out: &mut String) {
        let Some(data) = data else {
            out.push('-');
            return;
        };
        let node = data.get_node();
        write!(out, "{}", data.value).unwrap();
        match node.balance() {
            AvlBalance::Balanced => {}
            AvlBalance::LeftHeavy => out.push('<'),
            AvlBalance::RightHeavy => out.push('>'),
        }
        if node.left().is_some() || node.right().is_some() {
            out.push('(');
            fmt_subtree(node.left(), out);
            out.push(',');
            fmt_subtree(node.right(), out);
            out.push(')');
        }
    }

    impl AvlTree<Box<IntAvlNode>, ()> {
        fn shape(&self) -> String {
            let mut out = String::new();
            fmt_subtree(self.root(), &mut out);
            out
        }

        fn insert_ints(&mut self, values: &[i64]) {
            for &v in values {
                self.insert(new_intnode(v));
                self.validate();
            }
        }

        fn remove_int(&mut self, i: i64) -> bool {
            let Some(data) = self.find(&i, cmp_int) else {
                println!("not found {}", i);
                return false;
            };
            let data = data as *const IntAvlNode;
            let node = self.try_remove(unsafe { &*data }).unwrap();
            assert_eq!(node.value, i);
            assert!(node.get_node().is_detached());
            true
        }

        fn values(&self) -> Vec<i64> {
            self.iter().map(|n| n.value).collect()
        }
    }

    #[test]
    fn int_avl_tree_empty() {
        init_logger();
        let mut tree = new_inttree();
        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
        assert!(tree.root().is_none());
        assert!(tree.first().is_none());
        assert!(tree.last().is_none());
        assert!(tree.pop_first().is_none());
        assert!(tree.find(&1, cmp_int).is_none());
        assert!(!tree.remove_int(1));
        tree.validate();
    }

    #[test]
    fn int_avl_tree_insert_one() {
        let mut tree = new_inttree();
        tree.insert_ints(&[13]);
        assert!(!tree.is_empty());
        assert_eq!(tree.len(), 1);
        let root = tree.root().unwrap();
        assert_eq!(root.value, 13);
        assert!(root.get_node().parent().is_none());
        assert!(core::ptr::eq(tree.first().unwrap(), root));
        assert!(core::ptr::eq(tree.last().unwrap(), root));
        assert_eq!(tree.shape(), "13");
    }

    #[test]
    fn int_avl_tree_insert_two() {
        let mut tree = new_inttree();
        tree.insert_ints(&[13, 14]);
        assert_eq!(tree.shape(), "13>(-,14)");
        assert_eq!(tree.first().unwrap().value, 13);
        assert_eq!(tree.last().unwrap().value, 14);

        let mut tree = new_inttree();
        tree.insert_ints(&[14, 13]);
        assert_eq!(tree.shape(), "14<(13,-)");
    }

    #[test]
    fn int_avl_tree_rotations() {
        for order in [[13, 14, 15], [15, 14, 13], [13, 15, 14], [15, 13, 14]] {
            let mut tree = new_inttree();
            tree.insert_ints(&order);
            assert_eq!(tree.shape(), "14(13,15)", "insert order {:?}", order);
            assert_eq!(tree.first().unwrap().value, 13);
            assert_eq!(tree.last().unwrap().value, 15);
            let root = tree.root().unwrap();
            let left = root.get_node().left().unwrap();
            let right = root.get_node().right().unwrap();
            assert!(core::ptr::eq(left.get_node().parent().unwrap(), root));
            assert!(core::ptr::eq(right.get_node().parent().unwrap(), root));
        }
    }

    #[test]
    fn int_avl_tree_complex_insert() {
        let mut tree = new_inttree();
        tree.insert_ints(&[13, 14, 15, 12, 11, 17, 16, 8, 9, 1]);
        assert_eq!(tree.shape(), "14<(9(8<(1,-),12(11,13)),16(15,17))");
        assert_eq!(tree.first().unwrap().value, 1);
        assert_eq!(tree.last().unwrap().value, 17);
        assert_eq!(tree.values(), vec![1, 8, 9, 11, 12, 13, 14, 15, 16, 17]);
    }

    #[test]
    fn int_avl_tree_remove_leaf() {
        let mut tree = new_inttree();
        tree.insert_ints(&[15, 14, 13, 12, 11]);
        assert_eq!(tree.shape(), "14<(12(11,13),15)");
        assert!(tree.remove_int(11));
        tree.validate();
        assert_eq!(tree.shape(), "14<(12>(-,13),15)");
        assert_eq!(tree.first().unwrap().value, 12);
    }

    #[test]
    fn int_avl_tree_remove_left_child_only() {
        let mut tree = new_inttree();
        tree.insert_ints(&[15, 14, 12, 11]);
        assert_eq!(tree.shape(), "14<(12<(11,-),15)");
        assert!(tree.remove_int(12));
        tree.validate();
        assert_eq!(tree.shape(), "14(11,15)");
    }

    #[test]
    fn int_avl_tree_remove_right_child_only() {
        let mut tree = new_inttree();
        tree.insert_ints(&[15, 14, 12, 13]);
        assert_eq!(tree.shape(), "14<(12>(-,13),15)");
        assert!(tree.remove_int(12));
        tree.validate();
        assert_eq!(tree.shape(), "14(13,15)");
        assert_eq!(tree.first().unwrap().value, 13);
    }

    #[test]
    fn int_avl_tree_remove_both_children() {
        let mut tree = new_inttree();
        tree.insert_ints(&[15, 14, 13, 12, 11]);
        assert!(tree.remove_int(12));
        tree.validate();
        assert_eq!(tree.shape(), "14<(13<(11,-),15)");
    }

    #[test]
    fn int_avl_tree_remove_deep_children() {
        let mut tree = new_inttree();
        tree.insert_ints(&[15, 14, 13, 12, 11]);
        assert!(tree.remove_int(14));
        tree.validate();
        assert_eq!(tree.shape(), "12>(11,15<(13,-))");
        assert!(tree.root().unwrap().get_node().parent().is_none());
        assert_eq!(tree.last().unwrap().value, 15);
    }

    #[test]
    fn int_avl_tree_remove_root_distant_successor() {
        let mut tree = new_inttree();
        tree.insert_ints(&[13, 14, 15, 12, 11, 17, 16, 8, 9, 1]);
        assert!(tree.remove_int(14));
        tree.validate();
        assert_eq!(tree.shape(), "15<(9(8<(1,-),12(11,13)),16>(-,17))");
    }

    #[test]
    fn int_avl_tree_remove_to_empty() {
        let mut tree = new_inttree();
        tree.insert_ints(&[1]);
        assert!(tree.remove_int(1));
        assert!(tree.is_empty());
        assert!(tree.first().is_none());
        assert!(tree.last().is_none());
        tree.validate();
    }

    #[test]
    fn int_avl_tree_order() {
        let max;
        #[cfg(miri)]
        {
            max = 200;
        }
        #[cfg(not(miri))]
        {
            max = 20000;
        }
        let mut tree = new_inttree();
        let start_ts = Instant::now();
        for i in 0..max {
            tree.insert(new_intnode(i));
        }
        println!("insert {} ascending in {:?}", max, start_ts.elapsed());
        tree.validate();
        assert_eq!(tree.len(), max as usize);
        assert_eq!(tree.first().unwrap().value, 0);
        assert_eq!(tree.last().unwrap().value, max - 1);

        let mut expected = 0;
        tree.iter().for_each(|n| {
            assert_eq!(n.value, expected);
            expected += 1;
        });

        for i in (0..max).rev() {
            let data = tree.find(&i, cmp_int).unwrap();
            if i > 0 {
                assert_eq!(tree.prev(data).unwrap().value, i - 1);
            } else {
                assert!(tree.prev(data).is_none());
            }
        }

        let start_ts = Instant::now();
        for i in 0..max {
            assert_eq!(tree.pop_last().unwrap().value, max - 1 - i);
        }
        println!("pop_last {} in {:?}", max, start_ts.elapsed());
        tree.validate();
        assert!(tree.is_empty());
    }

    #[test]
    fn int_avl_tree_equal_keys() {
        let mut tree = new_inttree();
        let mut ptrs = Vec::new();
        for v in [5, 3, 5, 7, 5, 3] {
            let node = new_intnode(v);
            ptrs.push((v, &*node as *const IntAvlNode));
            tree.insert(node);
            tree.validate();
        }
        // Equal keys come out in the order they were inserted.
        let mut expected = ptrs.clone();
        expected.sort_by_key(|(v, _)| *v);
        let found: Vec<_> = tree.iter().map(|n| (n.value, n as *const IntAvlNode)).collect();
        assert_eq!(found, expected);

        // Removing a middle duplicate keeps the rest in order.
        let (_, middle) = expected.remove(3);
        let node = tree.try_remove(unsafe { &*middle }).unwrap();
        assert_eq!(node.value, 5);
        tree.validate();
        let found: Vec<_> = tree.iter().map(|n| (n.value, n as *const IntAvlNode)).collect();
        assert_eq!(found, expected);
    }

    #[test]
    fn int_avl_tree_find_larger_eq() {
        let mut tree = new_inttree();
        tree.insert_ints(&[10, 20, 30, 40]);
        assert_eq!(tree.find_larger_eq(&5, cmp_int).unwrap().value, 10);
        assert_eq!(tree.find_larger_eq(&20, cmp_int).unwrap().value, 20);
        assert_eq!(tree.find_larger_eq(&21, cmp_int).unwrap().value, 30);
        assert!(tree.find_larger_eq(&41, cmp_int).is_none());
    }

    #[test]
    fn int_avl_tree_try_remove_foreign() {
        init_logger();
        let mut tree = new_inttree();
        let mut other = new_inttree();
        tree.insert_ints(&[1, 2, 3]);
        other.insert_ints(&[1, 2, 3]);

        let foreign = other.find(&2, cmp_int).unwrap() as *const IntAvlNode;
        assert!(!tree.contains(unsafe { &*foreign }));
        assert_eq!(tree.try_remove(unsafe { &*foreign }).err(), Some(Error::NotLinked));
        let foreign_root = other.root().unwrap() as *const IntAvlNode;
        assert_eq!(tree.try_remove(unsafe { &*foreign_root }).err(), Some(Error::NotLinked));

        let detached = new_intnode(2);
        assert_eq!(tree.try_remove(&detached).err(), Some(Error::NotLinked));
        assert_eq!(tree.len(), 3);
        tree.validate();
        other.validate();
    }

    #[test]
    fn int_avl_tree_reinsert() {
        let mut tree = new_inttree();
        tree.insert_ints(&[4, 2, 6, 1, 3, 5, 7]);
        let node = tree.pop_first().unwrap();
        assert_eq!(node.value, 1);
        let mut other = new_inttree();
        other.insert(node);
        other.validate();
        assert_eq!(tree.values(), vec![2, 3, 4, 5, 6, 7]);
        assert_eq!(other.values(), vec![1]);
    }

    #[test]
    fn int_avl_tree_random() {
        let count;
        #[cfg(miri)]
        {
            count = 200;
        }
        #[cfg(not(miri))]
        {
            count = 5000;
        }
        let mut rng = rand::thread_rng();
        let mut tree = new_inttree();
        let mut insert_order: Vec<*const IntAvlNode> = Vec::with_capacity(count);
        for _ in 0..count {
            let node = new_intnode(rng.gen_range(0..count as i64 * 4));
            insert_order.push(&*node);
            tree.insert(node);
        }
        tree.validate();

        // Drain through the minimum: values come out sorted.
        let mut drained = Vec::with_capacity(count);
        let mut last = i64::MIN;
        while let Some(node) = tree.pop_first() {
            assert!(node.value >= last);
            last = node.value;
            drained.push(node);
        }
        tree.validate();
        assert_eq!(drained.len(), count);

        // Reinsert and remove in the original insertion order.
        for node in drained {
            tree.insert(node);
        }
        tree.validate();
        for (i, ptr) in insert_order.iter().enumerate() {
            let node = unsafe { tree.remove(&**ptr) };
            drop(node);
            if i % 97 == 0 {
                tree.validate();
            }
        }
        tree.validate();
        assert!(tree.is_empty());
    }

    #[test]
    fn arc_avl_tree_remove_ref() {
        let mut tree = AvlTree::<Arc<IntAvlNode>, ()>::new(is_less_int_node);
        let node = Arc::new(IntAvlNode { node: UnsafeCell::new(AvlNode::default()), value: 200 });
        tree.insert(node.clone());
        assert_eq!(tree.len(), 1);
        assert_eq!(Arc::strong_count(&node), 2);

        tree.remove_ref(&node).unwrap();
        assert_eq!(tree.len(), 0);
        assert_eq!(Arc::strong_count(&node), 1);
        assert_eq!(tree.remove_ref(&node), Err(Error::NotLinked));
    }

    #[test]
    fn arc_avl_tree_drop_releases() {
        let node = Arc::new(IntAvlNode { node: UnsafeCell::new(AvlNode::default()), value: 1 });
        {
            let mut tree = AvlTree::<Arc<IntAvlNode>, ()>::new(is_less_int_node);
            tree.insert(node.clone());
            for i in 2..10 {
                tree.insert(Arc::new(IntAvlNode {
                    node: UnsafeCell::new(AvlNode::default()),
                    value: i,
                }));
            }
            assert_eq!(Arc::strong_count(&node), 2);
        }
        assert_eq!(Arc::strong_count(&node), 1);
        assert!(node.get_node().is_detached());
    }

    proptest! {
        #[test]
        fn avl_tree_matches_sorted_model(
            ops in prop::collection::vec((any::<bool>(), 0i64..48), 0..256)
        ) {
            let mut tree = new_inttree();
            let mut model: Vec<i64> = Vec::new();
            for (is_insert, value) in ops {
                if is_insert {
                    tree.insert(new_intnode(value));
                    let pos = model.partition_point(|v| *v <= value);
                    model.insert(pos, value);
                } else if let Ok(pos) = model.binary_search(&value) {
                    model.remove(pos);
                    prop_assert!(tree.remove_int(value));
                } else {
                    prop_assert!(tree.find(&value, cmp_int).is_none());
                }
                prop_assert_eq!(tree.check(), Ok(()));
                prop_assert_eq!(tree.len(), model.len());
            }
            prop_assert_eq!(tree.values(), model.clone());
            prop_assert_eq!(tree.first().map(|n| n.value), model.first().copied());
            prop_assert_eq!(tree.last().map(|n| n.value), model.last().copied());
        }
    }
}
