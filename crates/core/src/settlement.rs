//! Settlement capability consumed by the negotiation core.
//!
//! The chain client (contract deployment, signing, receipt waiting) lives
//! outside this workspace. `SettlementService` is the seam it plugs into;
//! `InMemorySettlementLedger` is the in-process implementation used by the
//! CLI and the test suites.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::domain::deal::{CommitmentHandle, ResourceId, SettlementInstruction, SettlementReceipt};
use crate::domain::party::AgentId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SettlementError {
    #[error("resource `{resource_id}` is not owned by `{expected_owner}`")]
    NotOwner { resource_id: ResourceId, expected_owner: AgentId },
    #[error("resource `{0}` is unknown to the ledger")]
    UnknownResource(ResourceId),
    #[error("settlement price must not be negative (got {0})")]
    NegativePrice(Decimal),
    #[error("`{account}` cannot cover {required} (balance {available})")]
    InsufficientFunds { account: AgentId, required: Decimal, available: Decimal },
    #[error("commitment `{0}` has not been deployed")]
    UnknownCommitment(String),
    #[error("commitment arithmetic out of range for ({a}, {b})")]
    ArithmeticOutOfRange { a: u64, b: u64 },
    #[error("settlement backend failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait SettlementService: Send + Sync {
    /// Moves the resource from `instruction.from` to `instruction.to` for the binding price.
    async fn transfer(
        &self,
        instruction: &SettlementInstruction,
    ) -> Result<SettlementReceipt, SettlementError>;

    async fn deploy_commitment(
        &self,
        resource_id: &ResourceId,
        deployer: &AgentId,
    ) -> Result<CommitmentHandle, SettlementError>;

    async fn execute(
        &self,
        handle: &CommitmentHandle,
        a: u64,
        b: u64,
    ) -> Result<u64, SettlementError>;

    async fn resolve(
        &self,
        handle: &CommitmentHandle,
        a: u64,
        b: u64,
    ) -> Result<u64, SettlementError>;
}

#[derive(Debug, Default)]
struct LedgerState {
    owners: HashMap<ResourceId, AgentId>,
    balances: HashMap<AgentId, Decimal>,
    transfers: Vec<SettlementReceipt>,
    commitments: HashMap<String, CommitmentHandle>,
}

/// Ownership and balance book kept in process memory.
#[derive(Clone, Debug, Default)]
pub struct InMemorySettlementLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemorySettlementLedger {
    pub fn mint(&self, resource_id: ResourceId, owner: AgentId) {
        self.lock().owners.insert(resource_id, owner);
    }

    pub fn credit(&self, account: AgentId, amount: Decimal) {
        let mut state = self.lock();
        let balance = state.balances.entry(account).or_insert(Decimal::ZERO);
        *balance += amount;
    }

    pub fn owner_of(&self, resource_id: &ResourceId) -> Option<AgentId> {
        self.lock().owners.get(resource_id).cloned()
    }

    pub fn balance_of(&self, account: &AgentId) -> Decimal {
        self.lock().balances.get(account).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn transfers(&self) -> Vec<SettlementReceipt> {
        self.lock().transfers.clone()
    }

    pub fn commitments(&self) -> Vec<CommitmentHandle> {
        self.lock().commitments.values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn commitment(&self, handle: &CommitmentHandle) -> Result<(), SettlementError> {
        if self.lock().commitments.contains_key(&handle.commitment_id) {
            Ok(())
        } else {
            Err(SettlementError::UnknownCommitment(handle.commitment_id.clone()))
        }
    }
}

#[async_trait]
impl SettlementService for InMemorySettlementLedger {
    async fn transfer(
        &self,
        instruction: &SettlementInstruction,
    ) -> Result<SettlementReceipt, SettlementError> {
        let price = instruction.price.amount();
        if price.is_sign_negative() && !price.is_zero() {
            return Err(SettlementError::NegativePrice(price));
        }

        let mut state = self.lock();
        match state.owners.get(&instruction.resource_id) {
            None => return Err(SettlementError::UnknownResource(instruction.resource_id.clone())),
            Some(owner) if owner != &instruction.from => {
                return Err(SettlementError::NotOwner {
                    resource_id: instruction.resource_id.clone(),
                    expected_owner: instruction.from.clone(),
                });
            }
            Some(_) => {}
        }

        let available = state.balances.get(&instruction.to).copied().unwrap_or(Decimal::ZERO);
        if available < price {
            return Err(SettlementError::InsufficientFunds {
                account: instruction.to.clone(),
                required: price,
                available,
            });
        }

        state.balances.insert(instruction.to.clone(), available - price);
        *state.balances.entry(instruction.from.clone()).or_insert(Decimal::ZERO) += price;
        state.owners.insert(instruction.resource_id.clone(), instruction.to.clone());

        let receipt = SettlementReceipt {
            receipt_id: Uuid::new_v4().to_string(),
            resource_id: instruction.resource_id.clone(),
            price: instruction.price,
            from: instruction.from.clone(),
            to: instruction.to.clone(),
            settled_at: Utc::now(),
        };
        state.transfers.push(receipt.clone());

        info!(
            event_name = "settlement.transfer.recorded",
            resource_id = %receipt.resource_id,
            price = %receipt.price,
            from = %receipt.from,
            to = %receipt.to,
            "resource ownership transferred"
        );
        Ok(receipt)
    }

    async fn deploy_commitment(
        &self,
        resource_id: &ResourceId,
        deployer: &AgentId,
    ) -> Result<CommitmentHandle, SettlementError> {
        let mut state = self.lock();
        match state.owners.get(resource_id) {
            None => return Err(SettlementError::UnknownResource(resource_id.clone())),
            Some(owner) if owner != deployer => {
                return Err(SettlementError::NotOwner {
                    resource_id: resource_id.clone(),
                    expected_owner: deployer.clone(),
                });
            }
            Some(_) => {}
        }

        let handle = CommitmentHandle {
            commitment_id: Uuid::new_v4().to_string(),
            resource_id: resource_id.clone(),
            deployer: deployer.clone(),
        };
        state.commitments.insert(handle.commitment_id.clone(), handle.clone());
        Ok(handle)
    }

    async fn execute(
        &self,
        handle: &CommitmentHandle,
        a: u64,
        b: u64,
    ) -> Result<u64, SettlementError> {
        self.commitment(handle)?;
        a.checked_add(b).ok_or(SettlementError::ArithmeticOutOfRange { a, b })
    }

    async fn resolve(
        &self,
        handle: &CommitmentHandle,
        a: u64,
        b: u64,
    ) -> Result<u64, SettlementError> {
        self.commitment(handle)?;
        a.checked_sub(b).ok_or(SettlementError::ArithmeticOutOfRange { a, b })
    }
}
