//! Provides types that represent the user's declared state, e.g. catalog files and the
//! dependency graph over their resources.

pub mod catalog;
pub mod graph;
pub mod resource;

#[doc(inline)]
pub use catalog::Catalog;

#[doc(inline)]
pub use graph::Graph;

#[doc(inline)]
pub use resource::{Resource, ResourceId};
