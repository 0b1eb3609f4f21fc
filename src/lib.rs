// Tideway - Agentless Infrastructure Execution
//
// Declare desired state for a fleet of hosts, diff it against gathered
// facts, and apply the resulting commands over SSH (or locally) with
// bounded parallelism and per-host failure isolation.

pub mod connectors;
pub mod engine;
pub mod facts;
pub mod inventory;
pub mod ops;
pub mod output;

pub use connectors::{AutoConnector, Connection, Connector, HostKeyPolicy, SshConnector};
pub use engine::{CancelToken, EngineConfig, Executor, HostPlan, RunReport};
pub use facts::{FactCache, FactQuery, FactRegistry, Value};
pub use inventory::{Host, HostGroup, Inventory};
pub use ops::{load_deploy_file, Command, DeclaredOp, DeployPlan, Operation};
pub use output::{OutputFormat, OutputWriter, TidewayError};

/// Version of the Tideway tool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::connectors::{AutoConnector, Connection, Connector, SshConnector};
    pub use crate::engine::{EngineConfig, Executor, RunReport};
    pub use crate::inventory::{Host, Inventory};
    pub use crate::ops::{load_deploy_file, DeclaredOp, Operation};
    pub use crate::output::{OutputFormat, OutputWriter, TidewayError};
}
