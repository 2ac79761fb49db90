use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{NegotiationAction, NegotiationEvent, NegotiationState, TransitionOutcome};

pub trait FlowDefinition {
    fn initial_state(&self) -> NegotiationState;
    fn transition(
        &self,
        current: &NegotiationState,
        event: &NegotiationEvent,
    ) -> Result<TransitionOutcome, NegotiationTransitionError>;
}

/// Round-based flow between exactly two parties.
#[derive(Clone, Debug, Default)]
pub struct TwoPartyFlow;

impl FlowDefinition for TwoPartyFlow {
    fn initial_state(&self) -> NegotiationState {
        NegotiationState::Init
    }

    fn transition(
        &self,
        current: &NegotiationState,
        event: &NegotiationEvent,
    ) -> Result<TransitionOutcome, NegotiationTransitionError> {
        transition_two_party(current, event)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> NegotiationState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &NegotiationState,
        event: &NegotiationEvent,
    ) -> Result<TransitionOutcome, NegotiationTransitionError> {
        self.flow.transition(current, event)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &NegotiationState,
        event: &NegotiationEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, NegotiationTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit.negotiation_id.clone(),
                        audit.round,
                        "flow.transition_applied",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", format!("{:?}", outcome.from))
                    .with_metadata("to", format!("{:?}", outcome.to))
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit.negotiation_id.clone(),
                        audit.round,
                        "flow.transition_rejected",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<TwoPartyFlow> {
    fn default() -> Self {
        Self::new(TwoPartyFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NegotiationTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: NegotiationState, event: NegotiationEvent },
}

fn transition_two_party(
    current: &NegotiationState,
    event: &NegotiationEvent,
) -> Result<TransitionOutcome, NegotiationTransitionError> {
    use NegotiationAction::{ComposeMessages, Halt, ReconcilePrice, RequestDecisions, Settle};
    use NegotiationEvent::{
        AgreementWithheld, BothAccepted, Cancelled, GatewayFailed, GatewayTimedOut,
        MessagesExchanged, RoundLimitReached, RoundStarted,
    };
    use NegotiationState::{Aborted, Agreed, Continue, Deciding, Exchanging, Init};

    if current.is_terminal() {
        return Err(NegotiationTransitionError::InvalidTransition {
            state: *current,
            event: *event,
        });
    }

    let (to, actions) = match (current, event) {
        (Init, RoundStarted) | (Continue, RoundStarted) => (Exchanging, vec![ComposeMessages]),
        (Exchanging, MessagesExchanged) => (Deciding, vec![RequestDecisions]),
        (Deciding, BothAccepted) => (Agreed, vec![ReconcilePrice, Settle]),
        (Deciding, AgreementWithheld) => (Continue, Vec::new()),
        (Continue, RoundLimitReached) => (Aborted, vec![Halt]),
        (_, GatewayTimedOut) | (_, GatewayFailed) | (_, Cancelled) => (Aborted, vec![Halt]),
        _ => {
            return Err(NegotiationTransitionError::InvalidTransition {
                state: *current,
                event: *event,
            });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: *event, actions })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, AuditOutcome, InMemoryAuditSink};
    use crate::domain::deal::NegotiationId;
    use crate::flows::engine::{FlowEngine, NegotiationTransitionError};
    use crate::flows::states::{NegotiationAction, NegotiationEvent, NegotiationState};

    #[test]
    fn round_that_reaches_agreement() {
        let engine = FlowEngine::default();
        let mut state = engine.initial_state();
        assert_eq!(state, NegotiationState::Init);

        let started = engine.apply(&state, &NegotiationEvent::RoundStarted).expect("start round");
        assert_eq!(started.actions, vec![NegotiationAction::ComposeMessages]);
        state = started.to;

        state = engine.apply(&state, &NegotiationEvent::MessagesExchanged).expect("exchange").to;
        assert_eq!(state, NegotiationState::Deciding);

        let agreed = engine.apply(&state, &NegotiationEvent::BothAccepted).expect("agree");
        assert_eq!(agreed.to, NegotiationState::Agreed);
        assert_eq!(
            agreed.actions,
            vec![NegotiationAction::ReconcilePrice, NegotiationAction::Settle]
        );
    }

    #[test]
    fn withheld_agreement_loops_back_to_exchanging() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(&NegotiationState::Deciding, &NegotiationEvent::AgreementWithheld)
            .expect("withhold");
        assert_eq!(outcome.to, NegotiationState::Continue);

        let next = engine.apply(&outcome.to, &NegotiationEvent::RoundStarted).expect("next round");
        assert_eq!(next.to, NegotiationState::Exchanging);
    }

    #[test]
    fn round_limit_only_applies_between_rounds() {
        let engine = FlowEngine::default();
        let aborted = engine
            .apply(&NegotiationState::Continue, &NegotiationEvent::RoundLimitReached)
            .expect("abort");
        assert_eq!(aborted.to, NegotiationState::Aborted);

        let rejected =
            engine.apply(&NegotiationState::Exchanging, &NegotiationEvent::RoundLimitReached);
        assert!(rejected.is_err());
    }

    #[test]
    fn timeouts_abort_mid_round() {
        let engine = FlowEngine::default();
        for state in [NegotiationState::Exchanging, NegotiationState::Deciding] {
            let outcome =
                engine.apply(&state, &NegotiationEvent::GatewayTimedOut).expect("timeout aborts");
            assert_eq!(outcome.to, NegotiationState::Aborted);
            assert_eq!(outcome.actions, vec![NegotiationAction::Halt]);
        }
    }

    #[test]
    fn terminal_states_reject_every_event() {
        let engine = FlowEngine::default();
        for state in [NegotiationState::Agreed, NegotiationState::Aborted] {
            let result = engine.apply(&state, &NegotiationEvent::RoundStarted);
            assert_eq!(
                result,
                Err(NegotiationTransitionError::InvalidTransition {
                    state,
                    event: NegotiationEvent::RoundStarted,
                })
            );
        }
    }

    #[test]
    fn audited_transitions_record_applied_and_rejected() {
        let engine = FlowEngine::default();
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(NegotiationId("neg-1".to_string()), 1, "coordinator");

        let _ = engine.apply_with_audit(
            &NegotiationState::Init,
            &NegotiationEvent::RoundStarted,
            &sink,
            &audit,
        );
        let _ = engine.apply_with_audit(
            &NegotiationState::Init,
            &NegotiationEvent::BothAccepted,
            &sink,
            &audit,
        );

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "flow.transition_applied");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("Exchanging"));
        assert_eq!(events[1].outcome, AuditOutcome::Rejected);
    }
}
