pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, NegotiationTransitionError, TwoPartyFlow};
pub use states::{NegotiationAction, NegotiationEvent, NegotiationState, TransitionOutcome};
