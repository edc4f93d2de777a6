//! Workflow graph model.
//!
//! A workflow definition is a list of node descriptors whose inputs name
//! their upstream sources. [`GraphBuilder`] turns a definition into a
//! [`Graph`] of typed nodes, [`serialize`] turns it back, and
//! [`TopologicalLayout`] places nodes in rank columns. Node types come from
//! a [`NodeTypeRegistry`].

pub mod builder;
pub mod edge;
pub mod graph;
pub mod layout;
pub mod node;
pub mod preview;
pub mod registry;
pub mod resolver;
pub mod serializer;

pub use builder::{BuildReport, GraphBuilder};
pub use edge::GraphEdge;
pub use graph::Graph;
pub use layout::{Layout, TopologicalLayout};
pub use node::{ExecutionStatus, GraphNode, InputSlot, Position};
pub use preview::OutputPreview;
pub use registry::{NodeTypeRegistry, NodeTypeSpec, SlotSpec};
pub use resolver::find_connections;
pub use serializer::{serialize, verify_round_trip};
