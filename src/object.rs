//! Contracts for stored objects and metric evaluators.
//!
//! The trees are generic over the user's object type and never look inside
//! it: objects cross the page boundary as byte slices and are compared only
//! through a metric evaluator. Both concerns are traits so the storage and
//! query engines stay swappable, like the page-manager contract.

/// A user object that can be stored in an index.
///
/// The serialized form is opaque to the engine; the only requirements are a
/// stable byte encoding and a durable identifier. The identifier (OID) breaks
/// ties whenever two result entries share a key, which is what makes query
/// output reproducible.
pub trait DataObject: Clone + PartialEq {
    /// Size of the serialized form in bytes
    fn serialized_size(&self) -> usize;

    /// Serialize into a byte vector
    fn serialize(&self) -> Vec<u8>;

    /// Rebuild an object from its serialized form
    fn deserialize(bytes: &[u8]) -> Self;

    /// The durable object identifier used for reproducible tie-breaking
    fn oid(&self) -> u64;
}

/// A metric evaluator over a stored object type.
///
/// `distance` is assumed non-negative and symmetric; wherever the engine uses
/// pruning bounds it additionally assumes the triangle inequality holds.
pub trait Metric<O: DataObject> {
    /// Distance between two objects
    fn distance(&self, a: &O, b: &O) -> f64;

    /// Cheap pre-test evaluated before `distance`.
    ///
    /// Scans skip an object when this returns `false`, short-circuiting the
    /// (possibly expensive) distance evaluation. The default accepts
    /// everything.
    fn filter(&self, _a: &O, _b: &O) -> bool {
        true
    }
}
