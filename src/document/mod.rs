//! The host page: an element tree with selector queries
//!
//! Mount points live in the body; stylesheet and script nodes inserted by
//! the resource loader live in the head.

mod selector;
mod tree;

pub use selector::{AttributeMatch, Compound, Selector};
pub use tree::{Document, Element, NodeId};
