//! Parley agent - negotiating agents, reasoning gateways and round coordination
//!
//! This crate turns the core negotiation protocol into running conversations:
//! - Keeps each agent's view of the conversation (`conversation`)
//! - Renders role-specific prompts from configuration (`disposition`)
//! - Parses the strict `TRUE_<price>` / `FALSE_<price>` decision grammar (`decision`)
//! - Talks to the reasoning oracle (`llm`, `http`)
//! - Drives rounds to agreement or abort and hands off to settlement (`coordinator`)
//!
//! # Key Types
//!
//! - `NegotiatingAgent` - one party, its log and its gateway (see `negotiator`)
//! - `NegotiationCoordinator` - the round state machine over exactly two agents
//! - `ReasoningGateway` - pluggable trait for OpenAI/Anthropic/Ollama or scripted replies
//! - `NegotiationRuntime` - wiring from `AppConfig`
//!
//! # Safety Principle
//!
//! The model only ever proposes. A decision counts only when it matches the
//! grammar exactly, and the binding price is computed here, never taken from
//! model output.

pub mod conversation;
pub mod coordinator;
pub mod decision;
pub mod disposition;
pub mod http;
pub mod llm;
pub mod negotiator;
pub mod runtime;

pub use conversation::{ClipWindow, ConversationLog, Utterance};
pub use coordinator::{
    AbortReason, CommitmentOutcome, CoordinatorSettings, NegotiationCoordinator, NegotiationError,
    NegotiationOutcome,
};
pub use decision::{parse_decision, MalformedDecision};
pub use disposition::{Disposition, DispositionError, Persona};
pub use http::HttpReasoningGateway;
pub use llm::{GatewayCall, GatewayError, ReasoningGateway, ScriptedGateway};
pub use negotiator::{DecisionError, NegotiatingAgent};
pub use runtime::NegotiationRuntime;
