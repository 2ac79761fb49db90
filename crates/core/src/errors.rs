use thiserror::Error;

use crate::flows::NegotiationTransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    FlowTransition(#[from] NegotiationTransitionError),
    #[error("price arithmetic overflowed")]
    PriceOverflow,
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("reasoning gateway unavailable: {0}")]
    Gateway(String),
    #[error("settlement failure: {0}")]
    Settlement(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    /// Stable machine-readable class used in operator output.
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Domain(_) => "domain_invariant",
            Self::Gateway(_) => "gateway_unavailable",
            Self::Settlement(_) => "settlement_failure",
            Self::Configuration(_) => "config_validation",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Configuration(_) => 2,
            Self::Gateway(_) => 4,
            Self::Settlement(_) => 5,
            Self::Domain(_) => 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, DomainError};
    use crate::flows::{NegotiationEvent, NegotiationState, NegotiationTransitionError};

    #[test]
    fn domain_error_maps_to_domain_class() {
        let error = ApplicationError::from(DomainError::InvariantViolation(
            "binding price requires both parties to accept".to_owned(),
        ));

        assert_eq!(error.error_class(), "domain_invariant");
        assert_eq!(error.exit_code(), 6);
    }

    #[test]
    fn flow_transition_error_is_transparent() {
        let error = DomainError::from(NegotiationTransitionError::InvalidTransition {
            state: NegotiationState::Agreed,
            event: NegotiationEvent::RoundStarted,
        });

        assert_eq!(error.to_string(), "invalid transition from Agreed using event RoundStarted");
    }

    #[test]
    fn gateway_and_settlement_have_distinct_exit_codes() {
        let gateway = ApplicationError::Gateway("connection refused".to_owned());
        let settlement = ApplicationError::Settlement("insufficient funds".to_owned());

        assert_eq!(gateway.error_class(), "gateway_unavailable");
        assert_eq!(settlement.error_class(), "settlement_failure");
        assert_ne!(gateway.exit_code(), settlement.exit_code());
    }
}
