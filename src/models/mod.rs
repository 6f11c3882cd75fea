//! Data model shared by sources, the engine and index processors.
//!
//! - [`NodePath`] / [`Location`] - where a node lives in a workspace
//! - [`Properties`] - a node's property set
//! - [`Request`] - one content mutation plus its processing status
//! - [`Subgraph`] - the result of one bounded-depth read

pub mod location;
pub mod property;
pub mod request;
pub mod subgraph;

pub use location::{Location, NodePath, Segment};
pub use property::{Properties, PropertyValue};
pub use request::{Request, RequestKind, RequestStatus};
pub use subgraph::{Subgraph, SubgraphNode};
