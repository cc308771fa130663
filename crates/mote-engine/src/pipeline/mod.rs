//! Frame sequencing: role ring, pass plans and the orchestrator that submits
//! them.

mod orchestrator;
mod pass;
mod ring;

pub use orchestrator::Orchestrator;
pub(crate) use orchestrator::run_pass;
pub use pass::{PassKind, PassPlan};
pub use ring::RoleRing;
