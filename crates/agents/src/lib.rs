//! The four built-in agents: two LLM-backed (remote providers, local
//! Ollama) and two static (semgrep subprocess, in-process control-flow
//! analysis). Spec §4.2-§4.4.

pub mod control_flow;
pub mod llm;
pub mod ollama;
pub mod semgrep;

pub use control_flow::ControlFlowAgent;
pub use llm::LlmAgent;
pub use ollama::OllamaAgent;
pub use semgrep::SemgrepAgent;
