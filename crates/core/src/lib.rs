//! Parley core - negotiation domain, flow state machine and collaborator seams
//!
//! This crate holds everything the negotiation protocol needs that does not
//! talk to a reasoning oracle:
//! - Domain types: parties, decisions, the binding price rule (`domain`)
//! - The round state machine shared by every coordinator (`flows`)
//! - The settlement capability and its in-memory ledger (`settlement`)
//! - Audit events, configuration loading and the error taxonomy

pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod settlement;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use domain::deal::{
    BindingPrice, CommitmentHandle, NegotiationId, ResourceId, SettlementInstruction,
    SettlementReceipt, TransactDecision,
};
pub use domain::party::{AgentId, Role};
pub use errors::{ApplicationError, DomainError};
pub use flows::{FlowEngine, NegotiationAction, NegotiationEvent, NegotiationState};
pub use settlement::{InMemorySettlementLedger, SettlementError, SettlementService};
