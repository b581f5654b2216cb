//! Errors reported by checked operations and structural checks.

use thiserror::Error;

/// A checked operation was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("node is not linked into this container")]
    NotLinked,
}

/// A structural invariant does not hold. Returned by the `check` method of each container.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckError {
    #[error("root node has a parent link")]
    RootHasParent,
    #[error("child does not link back to its parent")]
    BrokenParentLink,
    #[error("in-order sequence is not sorted")]
    OutOfOrder,
    #[error("balance factor disagrees with subtree heights {left}/{right}")]
    BalanceMismatch { left: usize, right: usize },
    #[error("root node is red")]
    RedRoot,
    #[error("red node has a red child")]
    RedViolation,
    #[error("black height differs between subtrees: {left} vs {right}")]
    BlackHeightMismatch { left: usize, right: usize },
    #[error("cached leftmost node is stale")]
    StaleLeftmost,
    #[error("cached rightmost node is stale")]
    StaleRightmost,
    #[error("cached minimum is stale")]
    StaleMinimum,
    #[error("length is {expected} but {found} nodes are linked")]
    CountMismatch { expected: usize, found: usize },
    #[error("child is less than its parent")]
    HeapOrder,
    #[error("heap position is {found}, expected {expected}")]
    HeapIndex { expected: usize, found: usize },
    #[error("leftist rank violated")]
    LeftistRank,
    #[error("bitmap disagrees with bucket {priority}")]
    StaleBitmap { priority: usize },
}
