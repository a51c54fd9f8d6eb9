//! Node Upgrade Agent: drives a single node through one upgrade attempt
//! and reports progress via the node annotation (§4.2).

mod decision;
mod reconciler;

pub use reconciler::{run_controller, AgentState};
