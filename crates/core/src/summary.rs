//! A run summary covering every agent that participated, regardless of
//! outcome — spec §4.1/§7 require skipped and failed agents to "appear in
//! the run summary with their reason".

use serde::{Deserialize, Serialize};

use crate::model::{AgentMetrics, FailureStage, Finding};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentOutcome {
    Success { finding_count: usize },
    Failure { error: String, failure_stage: FailureStage },
    Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub agent_id: String,
    pub outcome: AgentOutcome,
    pub metrics: AgentMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub findings: Vec<Finding>,
    pub agents: Vec<AgentSummary>,
}

impl RunSummary {
    pub fn success_count(&self) -> usize {
        self.agents
            .iter()
            .filter(|a| matches!(a.outcome, AgentOutcome::Success { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.agents
            .iter()
            .filter(|a| matches!(a.outcome, AgentOutcome::Failure { .. }))
            .count()
    }
}
