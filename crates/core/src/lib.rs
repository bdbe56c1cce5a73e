//! Finding model, agent contract, env scoping, retry driver, JSON response
//! utilities, the result cache, and the router itself.

pub mod cache;
pub mod json;
pub mod model;
pub mod redact;
pub mod retry;
pub mod router;
pub mod summary;

pub use model::{
    AgentContext, AgentMetrics, AgentResult, DiffFile, DiffStatus, FailureStage, Finding,
    Provider, Severity,
};
pub use router::{Agent, Router};
pub use summary::RunSummary;
