//! Built-in stage behaviors.
//!
//! Small behaviors covering the common pipeline shapes: identity
//! ([`pass`]), map/flat-map ([`xform`]), and keyed accumulation
//! ([`reduce`]). They double as reference implementations of the behavior
//! contract, including archive/handoff on the stateful one.

pub mod pass;
pub mod reduce;
pub mod xform;

pub use pass::PassSpec;
pub use reduce::{key_partitioner, keyed, reduce_arg, KeyedInput, ReduceArg, ReduceSpec};
pub use xform::{xform_arg, XformArg, XformSpec};
