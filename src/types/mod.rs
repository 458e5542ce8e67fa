pub mod report;
pub mod topology;

pub use report::{ProbeKind, ProbeStats, Report};
pub use topology::{ClusterNodes, NodeRole, NodeView};
