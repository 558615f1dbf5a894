//! B-tree engine.
//!
//! An ordered index over (key, object) pairs with duplicate keys handled by
//! per-leaf overflow chains rather than by splitting equal keys across
//! leaves.

mod tree;

pub use tree::BTree;
