use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::party::AgentId;
use crate::errors::DomainError;

/// The asset under negotiation (token id equivalent).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(pub String);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NegotiationId(pub String);

impl NegotiationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for NegotiationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactDecision {
    pub accepted: bool,
    pub proposed_price: Decimal,
}

impl TransactDecision {
    pub fn accept(proposed_price: Decimal) -> Self {
        Self { accepted: true, proposed_price }
    }

    /// A refusal never carries a price.
    pub fn refuse() -> Self {
        Self { accepted: false, proposed_price: Decimal::ZERO }
    }
}

/// Price both parties commit to once they have independently accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingPrice(Decimal);

impl BindingPrice {
    /// Arithmetic mean of the two proposed prices. Both decisions must be acceptances.
    pub fn reconcile(
        first: &TransactDecision,
        second: &TransactDecision,
    ) -> Result<Self, DomainError> {
        if !first.accepted || !second.accepted {
            return Err(DomainError::InvariantViolation(
                "binding price requires both parties to accept".to_string(),
            ));
        }

        let sum = first
            .proposed_price
            .checked_add(second.proposed_price)
            .ok_or(DomainError::PriceOverflow)?;
        let mean = sum.checked_div(Decimal::TWO).ok_or(DomainError::PriceOverflow)?;
        Ok(Self(mean.normalize()))
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for BindingPrice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementInstruction {
    pub resource_id: ResourceId,
    pub price: BindingPrice,
    pub from: AgentId,
    pub to: AgentId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub receipt_id: String,
    pub resource_id: ResourceId,
    pub price: BindingPrice,
    pub from: AgentId,
    pub to: AgentId,
    pub settled_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentHandle {
    pub commitment_id: String,
    pub resource_id: ResourceId,
    pub deployer: AgentId,
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{BindingPrice, TransactDecision};
    use crate::errors::DomainError;

    #[test]
    fn binding_price_is_mean_of_accepted_prices() {
        let seller = TransactDecision::accept(Decimal::new(10, 1));
        let buyer = TransactDecision::accept(Decimal::new(5, 1));

        let price = BindingPrice::reconcile(&seller, &buyer).expect("both accepted");
        assert_eq!(price.amount(), Decimal::new(75, 2));
        assert_eq!(price.to_string(), "0.75");
    }

    #[test]
    fn binding_price_is_symmetric() {
        let a = TransactDecision::accept(Decimal::new(-3, 0));
        let b = TransactDecision::accept(Decimal::new(12, 0));

        assert_eq!(BindingPrice::reconcile(&a, &b).ok(), BindingPrice::reconcile(&b, &a).ok());
    }

    #[test]
    fn binding_price_rejects_refusal() {
        let seller = TransactDecision::accept(Decimal::ONE);
        let result = BindingPrice::reconcile(&seller, &TransactDecision::refuse());
        assert!(matches!(result, Err(DomainError::InvariantViolation(_))));
    }

    #[test]
    fn binding_price_reports_overflow_instead_of_panicking() {
        let a = TransactDecision::accept(Decimal::MAX);
        let b = TransactDecision::accept(Decimal::MAX);
        assert_eq!(BindingPrice::reconcile(&a, &b), Err(DomainError::PriceOverflow));
    }

    #[test]
    fn refusal_carries_zero_price() {
        let refusal = TransactDecision::refuse();
        assert!(!refusal.accepted);
        assert_eq!(refusal.proposed_price, Decimal::ZERO);
    }
}
