use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiationState {
    Init,
    Exchanging,
    Deciding,
    Continue,
    Agreed,
    Aborted,
}

impl NegotiationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Agreed | Self::Aborted)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiationEvent {
    RoundStarted,
    MessagesExchanged,
    BothAccepted,
    AgreementWithheld,
    RoundLimitReached,
    GatewayTimedOut,
    GatewayFailed,
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiationAction {
    ComposeMessages,
    RequestDecisions,
    ReconcilePrice,
    Settle,
    Halt,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: NegotiationState,
    pub to: NegotiationState,
    pub event: NegotiationEvent,
    pub actions: Vec<NegotiationAction>,
}
