pub mod cycle_detection;
pub mod scc;
pub mod want_graph;
