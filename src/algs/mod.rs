//! Process-level plumbing: collectives, wire records and graph partitioners.

pub mod communicator;
pub mod dual_graph;
pub mod metis_partition;
pub mod wire;

pub use communicator::{CollectiveExt, Communicator, LocalComm, NoComm};
pub use dual_graph::DualGraph;
