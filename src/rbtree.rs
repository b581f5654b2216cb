//! An intrusive red-black tree implementation.
//!
//! Shares the surface of [crate::avl::AvlTree]: cached leftmost/rightmost nodes, the same
//! insertion fast paths and the same stable placement of equal elements. Balancing follows the
//! classic colour rules: the root is black, no red node has a red child, and every root-to-leaf
//! path crosses the same number of black nodes.

use crate::error::{CheckError, Error};
use crate::{CmpFunc, Direction, LessFunc, Pointer};
use alloc::rc::Rc;
use alloc::sync::Arc;
use core::cmp::Ordering;
use core::marker::PhantomData;
use core::{fmt, mem, ptr::null};

/// A trait to return internal mutable RbNode for specified tree.
///
/// The tag is used to distinguish different RbNodes within the same item,
/// allowing an item to belong to multiple trees simultaneously.
///
/// # Safety
///
/// Implementors must ensure `get_node` returns a valid reference to the `RbNode`
/// embedded within `Self`, held in an `UnsafeCell`.
pub unsafe trait RbItem<Tag>: Sized {
    fn get_node(&self) -> &mut RbNode<Self, Tag>;
}

#[derive(PartialEq, Eq, Debug, Copy, Clone, Default)]
pub enum RbColor {
    #[default]
    Red,
    Black,
}

pub struct RbNode<T: Sized, Tag> {
    left: *const T,
    right: *const T,
    parent: *const T,
    color: RbColor,
    _phan: PhantomData<fn(&Tag)>,
}

unsafe impl<T, Tag> Send for RbNode<T, Tag> {}

impl<T: RbItem<Tag>, Tag> RbNode<T, Tag> {
    #[inline(always)]
    fn detach(&mut self) {
        self.left = null();
        self.right = null();
        self.parent = null();
        self.color = RbColor::Red;
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
    pub fn color(&self) -> RbColor {
        self.color
    }
}

impl<T, Tag> Default for RbNode<T, Tag> {
    fn default() -> Self {
        Self {
            left: null(),
            right: null(),
            parent: null(),
            color: RbColor::Red,
            _phan: Default::default(),
        }
    }
}

impl<T: RbItem<Tag>, Tag> fmt::Debug for RbNode<T, Tag> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({:?} left: {:p} right: {:p})", self.color, self.left, self.right)
    }
}

macro_rules! rb_node {
    ($data: expr) => {
        unsafe { (*$data).get_node() }
    };
}

pub struct RbTree<P, Tag>
where
    P: Pointer,
    P::Target: RbItem<Tag>,
{
    root: *const P::Target,
    leftmost: *const P::Target,
    rightmost: *const P::Target,
    count: usize,
    is_less: LessFunc<P::Target>,
    _phan: PhantomData<fn(P, &Tag)>,
}

impl<P, Tag> RbTree<P, Tag>
where
    P: Pointer,
    P::Target: RbItem<Tag>,
{
    /// Creates an empty tree ordered by `is_less`.
    pub fn new(is_less: LessFunc<P::Target>) -> Self {
        RbTree {
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

    #[inline]
    pub fn first(&self) -> Option<&P::Target> {
        unsafe { self.leftmost.as_ref() }
    }

    #[inline]
    pub fn last(&self) -> Option<&P::Target> {
        unsafe { self.rightmost.as_ref() }
    }

    #[inline(always)]
    fn is_black(data: *const P::Target) -> bool {
        data.is_null() || rb_node!(data).color == RbColor::Black
    }

    #[inline(always)]
    fn parent_direction(&self, data: *const P::Target, parent: *const P::Target) -> Direction {
        if rb_node!(parent).left == data { Direction::Left } else { Direction::Right }
    }

    #[inline(always)]
    fn replace_child(
        &mut self, parent: *const P::Target, old: *const P::Target, new: *const P::Target,
    ) {
        if parent.is_null() {
            self.root = new;
        } else {
            let parent_node = rb_node!(parent);
            if parent_node.left == old {
                parent_node.left = new;
            } else {
                debug_assert_eq!(parent_node.right, old);
                parent_node.right = new;
            }
        }
    }

    /// Moves `data` down to side `dir`; its child on the other side takes its place.
    fn rotate(&mut self, data: *const P::Target, dir: Direction) -> *const P::Target {
        let dir_inverse = dir.reverse();
        let node = rb_node!(data);
        let child = node.get_child(dir_inverse);
        let child_node = rb_node!(child);
        let parent = node.parent;

        let inner = child_node.get_child(dir);
        node.set_child(dir_inverse, inner);
        if !inner.is_null() {
            rb_node!(inner).parent = data;
        }
        child_node.set_child(dir, data);
        node.parent = child;
        child_node.parent = parent;
        self.replace_child(parent, data, child);
        child
    }

    /// Links `new_data` into the tree. Elements equal to existing ones go after them.
    pub fn insert(&mut self, new_data: P) {
        let new_ptr = new_data.into_raw();
        let node = rb_node!(new_ptr);
        debug_assert!(node.is_detached() && self.root != new_ptr, "node is already linked");
        node.detach();
        self.count += 1;

        if self.root.is_null() {
            node.color = RbColor::Black;
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
                let child = rb_node!(here).get_child(dir);
                if child.is_null() {
                    break (here, dir);
                }
                here = child;
            }
        };
        node.parent = here;
        rb_node!(here).set_child(which_child, new_ptr);

        self.rebalance_after_insert(new_ptr);
    }

    /*
     * The new node is red. While its parent is red too: with a red uncle, push the blackness
     * down from the grandparent and continue from there; with a black uncle, rotate an inner
     * grandchild to the outside, then rotate the grandparent towards the uncle and recolour.
     */
    fn rebalance_after_insert(&mut self, mut data: *const P::Target) {
        loop {
            let mut parent = rb_node!(data).parent;
            if Self::is_black(parent) {
                break;
            }
            // A red parent is never the root, so the grandparent exists.
            let grand = rb_node!(parent).parent;
            let parent_dir = self.parent_direction(parent, grand);
            let uncle = rb_node!(grand).get_child(parent_dir.reverse());
            if !Self::is_black(uncle) {
                rb_node!(parent).color = RbColor::Black;
                rb_node!(uncle).color = RbColor::Black;
                rb_node!(grand).color = RbColor::Red;
                data = grand;
                continue;
            }
            if rb_node!(parent).get_child(parent_dir.reverse()) == data {
                self.rotate(parent, parent_dir);
                parent = data;
            }
            rb_node!(parent).color = RbColor::Black;
            rb_node!(grand).color = RbColor::Red;
            self.rotate(grand, parent_dir.reverse());
            break;
        }
        rb_node!(self.root).color = RbColor::Black;
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

    /// Like [RbTree::remove], but verifies that `del` belongs to this tree first.
    pub fn try_remove(&mut self, del: &P::Target) -> Result<P, Error> {
        if !self.contains(del) {
            log::debug!("rbtree: refusing to remove {:p}, not linked into this tree", del);
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
            let parent = rb_node!(top).parent;
            if parent.is_null() {
                return top == self.root;
            }
            top = parent;
        }
    }

    fn unlink(&mut self, del: *const P::Target) {
        let del_node = rb_node!(del);
        let left = del_node.left;
        let right = del_node.right;
        let parent = del_node.parent;

        // `x` (possibly null) now sits at side `x_dir` of `x_parent`.
        let x: *const P::Target;
        let x_parent: *const P::Target;
        let mut x_dir = Direction::Left;
        let removed_color: RbColor;

        if !left.is_null() && !right.is_null() {
            // The successor takes over the removed node's place and colour; its own colour is
            // the one that disappears from the tree.
            let successor = self.bottom_child_ref(right, Direction::Left);
            let successor_node = rb_node!(successor);
            x = successor_node.right;

            rb_node!(left).parent = successor;
            successor_node.left = left;
            if successor != right {
                let successor_parent = successor_node.parent;
                if !x.is_null() {
                    rb_node!(x).parent = successor_parent;
                }
                rb_node!(successor_parent).left = x;
                successor_node.right = right;
                rb_node!(right).parent = successor;
                x_parent = successor_parent;
            } else {
                x_parent = successor;
                x_dir = Direction::Right;
            }
            self.replace_child(parent, del, successor);
            successor_node.parent = parent;
            removed_color = successor_node.color;
            successor_node.color = del_node.color;
        } else {
            x = if left.is_null() { right } else { left };
            if !parent.is_null() {
                x_dir = self.parent_direction(del, parent);
            }
            x_parent = parent;
            if !x.is_null() {
                rb_node!(x).parent = parent;
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
            removed_color = del_node.color;
        }

        self.count -= 1;
        del_node.detach();
        if removed_color == RbColor::Black {
            self.rebalance_after_delete(x, x_parent, x_dir);
        }
    }

    /*
     * A black node left the path through `x`, so that path is one black short. A red `x` just
     * turns black. Otherwise look at the sibling `w`: a red sibling is rotated up first so the
     * sibling is black. If both of its children are black, colour it red and move the deficit one
     * level up. Otherwise make sure its far child is red, then rotate the parent towards `x`,
     * which restores the count for good.
     */
    fn rebalance_after_delete(
        &mut self, mut x: *const P::Target, mut parent: *const P::Target, mut dir: Direction,
    ) {
        while x != self.root && Self::is_black(x) {
            let dir_inverse = dir.reverse();
            let mut w = rb_node!(parent).get_child(dir_inverse);
            if !Self::is_black(w) {
                rb_node!(w).color = RbColor::Black;
                rb_node!(parent).color = RbColor::Red;
                self.rotate(parent, dir);
                w = rb_node!(parent).get_child(dir_inverse);
            }
            let w_node = rb_node!(w);
            if Self::is_black(w_node.get_child(dir)) && Self::is_black(w_node.get_child(dir_inverse))
            {
                w_node.color = RbColor::Red;
                x = parent;
                parent = rb_node!(x).parent;
                if !parent.is_null() {
                    dir = self.parent_direction(x, parent);
                }
                continue;
            }
            if Self::is_black(w_node.get_child(dir_inverse)) {
                rb_node!(w_node.get_child(dir)).color = RbColor::Black;
                w_node.color = RbColor::Red;
                self.rotate(w, dir_inverse);
                w = rb_node!(parent).get_child(dir_inverse);
            }
            let w_node = rb_node!(w);
            w_node.color = rb_node!(parent).color;
            rb_node!(parent).color = RbColor::Black;
            let far = w_node.get_child(dir_inverse);
            if !far.is_null() {
                rb_node!(far).color = RbColor::Black;
            }
            self.rotate(parent, dir);
            return;
        }
        if !x.is_null() {
            rb_node!(x).color = RbColor::Black;
        }
    }

    /// Searches for an element equal to `val`. With duplicates any one of them may be returned.
    pub fn find<'a, K>(&'a self, val: &K, cmp_func: CmpFunc<K, P::Target>) -> Option<&'a P::Target> {
        let mut data = self.root;
        while !data.is_null() {
            let item = unsafe { &*data };
            match cmp_func(val, item) {
                Ordering::Equal => return Some(item),
                Ordering::Less => data = rb_node!(data).left,
                Ordering::Greater => data = rb_node!(data).right,
            }
        }
        None
    }

    #[inline(always)]
    fn bottom_child_ref(&self, mut data: *const P::Target, dir: Direction) -> *const P::Target {
        loop {
            let child = rb_node!(data).get_child(dir);
            if child.is_null() {
                return data;
            }
            data = child;
        }
    }

    pub fn next(&self, data: &P::Target) -> Option<&P::Target> {
        self.walk_dir(data, Direction::Right)
    }

    pub fn prev(&self, data: &P::Target) -> Option<&P::Target> {
        self.walk_dir(data, Direction::Left)
    }

    pub fn walk_dir(&self, data: &P::Target, dir: Direction) -> Option<&P::Target> {
        let node = data.get_node();
        let child = node.get_child(dir);
        if !child.is_null() {
            return unsafe { self.bottom_child_ref(child, dir.reverse()).as_ref() };
        }
        let mut data_ptr = data as *const P::Target;
        let mut parent = node.parent;
        while !parent.is_null() && rb_node!(parent).get_child(dir) == data_ptr {
            data_ptr = parent;
            parent = rb_node!(parent).parent;
        }
        unsafe { parent.as_ref() }
    }

    pub fn iter(&self) -> RbIter<'_, P, Tag> {
        RbIter { tree: self, cur: self.first() }
    }

    /// Verifies parent links, ordering, the colour rules, the cached bounds and the count.
    pub fn check(&self) -> Result<(), CheckError> {
        self.check_inner().inspect_err(|e| log::debug!("rbtree: check failed: {}", e))
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
        let root_node = rb_node!(self.root);
        if !root_node.parent.is_null() {
            return Err(CheckError::RootHasParent);
        }
        if root_node.color != RbColor::Black {
            return Err(CheckError::RedRoot);
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

    // Returns the black height of the subtree rooted at `data`, not counting null leaves.
    fn check_node(&self, data: *const P::Target, visited: &mut usize) -> Result<usize, CheckError> {
        *visited += 1;
        let node = rb_node!(data);
        let mut black_heights = [0usize; 2];
        for dir in [Direction::Left, Direction::Right] {
            let child = node.get_child(dir);
            if child.is_null() {
                continue;
            }
            let child_node = rb_node!(child);
            if child_node.parent != data {
                return Err(CheckError::BrokenParentLink);
            }
            if node.color == RbColor::Red && child_node.color == RbColor::Red {
                return Err(CheckError::RedViolation);
            }
            black_heights[dir as usize] = self.check_node(child, visited)?;
        }
        let (left, right) = (black_heights[0], black_heights[1]);
        if left != right {
            return Err(CheckError::BlackHeightMismatch { left, right });
        }
        Ok(left + if node.color == RbColor::Black { 1 } else { 0 })
    }

    /// Panics when [RbTree::check] fails.
    pub fn validate(&self) {
        if let Err(e) = self.check() {
            panic!("invalid rbtree: {}", e);
        }
    }
}

pub struct RbIter<'a, P, Tag>
where
    P: Pointer,
    P::Target: RbItem<Tag>,
{
    tree: &'a RbTree<P, Tag>,
    cur: Option<&'a P::Target>,
}

impl<'a, P, Tag> Iterator for RbIter<'a, P, Tag>
where
    P: Pointer,
    P::Target: RbItem<Tag>,
{
    type Item = &'a P::Target;

    fn next(&mut self) -> Option<Self::Item> {
        let cur = self.cur?;
        self.cur = self.tree.next(cur);
        Some(cur)
    }
}

impl<P, Tag> Drop for RbTree<P, Tag>
where
    P: Pointer,
    P::Target: RbItem<Tag>,
{
    fn drop(&mut self) {
        if mem::needs_drop::<P>() {
            if self.count > 0 {
                log::trace!("rbtree: releasing {} nodes on drop", self.count);
            }
            while let Some(p) = self.pop_first() {
                drop(p);
            }
        }
    }
}

impl<T, Tag> RbTree<Arc<T>, Tag>
where
    T: RbItem<Tag>,
{
    pub fn remove_ref(&mut self, node: &Arc<T>) -> Result<(), Error> {
        self.try_remove(node).map(drop)
    }
}

impl<T, Tag> RbTree<Rc<T>, Tag>
where
    T: RbItem<Tag>,
{
    pub fn remove_ref(&mut self, node: &Rc<T>) -> Result<(), Error> {
        self.try_remove(node).map(drop)
    }
}
