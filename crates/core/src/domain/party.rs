use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Seller,
    Buyer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Seller => "seller",
            Self::Buyer => "buyer",
        }
    }

    pub fn counterpart(&self) -> Role {
        match self {
            Self::Seller => Self::Buyer,
            Self::Buyer => Self::Seller,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "seller" => Ok(Self::Seller),
            "buyer" => Ok(Self::Buyer),
            other => Err(DomainError::InvariantViolation(format!(
                "unsupported role `{other}` (expected seller|buyer)"
            ))),
        }
    }
}

/// Identity key of a negotiating party, rendered as `{role}_{number}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(role: Role, number: u32) -> Self {
        Self(format!("{}_{number}", role.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{AgentId, Role};

    #[test]
    fn agent_id_combines_role_and_number() {
        assert_eq!(AgentId::new(Role::Seller, 1).as_str(), "seller_1");
        assert_eq!(AgentId::new(Role::Buyer, 42).to_string(), "buyer_42");
    }

    #[test]
    fn role_parses_case_insensitively_and_rejects_unknown() {
        assert_eq!(" Buyer ".parse::<Role>().ok(), Some(Role::Buyer));
        assert_eq!(Role::Seller.counterpart(), Role::Buyer);
        assert!("broker".parse::<Role>().is_err());
    }
}
