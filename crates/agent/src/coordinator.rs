//! Round orchestration between exactly one seller and one buyer.
//!
//! Each round the seller composes first and its message is fanned out to its
//! peers; the buyer then composes with the seller's message already in view.
//! Both agents then decide independently. Every gateway call is bounded by the
//! configured timeout and an optional cancellation signal; either one moves the
//! negotiation straight to `Aborted` without touching settlement.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parley_core::config::{CommitmentConfig, NegotiationConfig};
use parley_core::flows::TwoPartyFlow;
use parley_core::{
    AgentId, ApplicationError, AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink,
    BindingPrice, CommitmentHandle, DomainError, FlowEngine, InMemoryAuditSink, NegotiationEvent,
    NegotiationId, NegotiationState, ResourceId, Role, SettlementError, SettlementInstruction,
    SettlementReceipt, SettlementService, TransactDecision,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::disposition::DispositionError;
use crate::llm::GatewayError;
use crate::negotiator::{DecisionError, NegotiatingAgent};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub max_rounds: u32,
    pub call_timeout: Duration,
    pub resource_id: ResourceId,
    pub commitment: Option<CommitmentConfig>,
}

impl CoordinatorSettings {
    pub fn from_config(config: &NegotiationConfig) -> Self {
        Self {
            max_rounds: config.max_rounds,
            call_timeout: config.call_timeout(),
            resource_id: ResourceId(config.resource_id.clone()),
            commitment: config.commitment,
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            call_timeout: Duration::from_secs(60),
            resource_id: ResourceId("token-0".to_string()),
            commitment: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    RoundLimit,
    GatewayTimeout,
    Cancelled,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundLimit => "round_limit",
            Self::GatewayTimeout => "gateway_timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommitmentOutcome {
    pub handle: CommitmentHandle,
    pub execute_result: u64,
    pub resolve_result: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NegotiationOutcome {
    Agreed {
        rounds: u32,
        binding_price: BindingPrice,
        receipt: SettlementReceipt,
        commitment: Option<CommitmentOutcome>,
    },
    Aborted {
        rounds: u32,
        reason: AbortReason,
    },
}

impl NegotiationOutcome {
    pub fn rounds(&self) -> u32 {
        match self {
            Self::Agreed { rounds, .. } | Self::Aborted { rounds, .. } => *rounds,
        }
    }

    pub fn is_agreed(&self) -> bool {
        matches!(self, Self::Agreed { .. })
    }
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("a negotiation needs one seller and one buyer, got `{first}` and `{second}`")]
    InvalidParties { first: AgentId, second: AgentId },
    #[error("negotiation has already run (state {0:?})")]
    AlreadyRun(NegotiationState),
    #[error("reasoning gateway failed for `{agent}` in round {round}: {source}")]
    Gateway { agent: AgentId, round: u32, source: GatewayError },
    #[error("settlement failed at binding price {binding_price}: {source}")]
    Settlement { binding_price: BindingPrice, source: SettlementError },
    #[error("commitment failed after settlement receipt `{receipt_id}`: {source}")]
    Commitment { receipt_id: String, source: SettlementError },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Disposition(#[from] DispositionError),
}

impl From<NegotiationError> for ApplicationError {
    fn from(error: NegotiationError) -> Self {
        match error {
            NegotiationError::Domain(domain) => ApplicationError::Domain(domain),
            NegotiationError::AlreadyRun(_) => {
                ApplicationError::Domain(DomainError::InvariantViolation(error.to_string()))
            }
            NegotiationError::Gateway { .. } => ApplicationError::Gateway(error.to_string()),
            NegotiationError::Settlement { .. } | NegotiationError::Commitment { .. } => {
                ApplicationError::Settlement(error.to_string())
            }
            NegotiationError::InvalidParties { .. } | NegotiationError::Disposition(_) => {
                ApplicationError::Configuration(error.to_string())
            }
        }
    }
}

enum RoundStep<T> {
    Proceed(T),
    Halted(NegotiationOutcome),
}

enum Interrupt {
    TimedOut,
    Cancelled,
}

pub struct NegotiationCoordinator {
    id: NegotiationId,
    seller: NegotiatingAgent,
    buyer: NegotiatingAgent,
    settlement: Arc<dyn SettlementService>,
    audit: Arc<dyn AuditSink>,
    engine: FlowEngine<TwoPartyFlow>,
    settings: CoordinatorSettings,
    state: NegotiationState,
    round: u32,
    binding_price: Option<BindingPrice>,
    cancel: Option<watch::Receiver<bool>>,
}

impl NegotiationCoordinator {
    /// Pairs the two agents and registers each as the other's only peer.
    pub fn new(
        first: NegotiatingAgent,
        second: NegotiatingAgent,
        settlement: Arc<dyn SettlementService>,
        settings: CoordinatorSettings,
    ) -> Result<Self, NegotiationError> {
        let (mut seller, mut buyer) = match (first.role(), second.role()) {
            (Role::Seller, Role::Buyer) => (first, second),
            (Role::Buyer, Role::Seller) => (second, first),
            _ => {
                return Err(NegotiationError::InvalidParties {
                    first: first.id().clone(),
                    second: second.id().clone(),
                });
            }
        };
        seller.register_peer(buyer.id().clone());
        buyer.register_peer(seller.id().clone());

        let engine = FlowEngine::default();
        let state = engine.initial_state();
        Ok(Self {
            id: NegotiationId::generate(),
            seller,
            buyer,
            settlement,
            audit: Arc::new(InMemoryAuditSink::default()),
            engine,
            settings,
            state,
            round: 0,
            binding_price: None,
            cancel: None,
        })
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Aborts at the next gateway suspension point once the value turns `true`.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn id(&self) -> &NegotiationId {
        &self.id
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn binding_price(&self) -> Option<BindingPrice> {
        self.binding_price
    }

    pub fn seller(&self) -> &NegotiatingAgent {
        &self.seller
    }

    pub fn buyer(&self) -> &NegotiatingAgent {
        &self.buyer
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Returns `(seller, buyer)` so they can be reset and paired again.
    pub fn into_agents(self) -> (NegotiatingAgent, NegotiatingAgent) {
        (self.seller, self.buyer)
    }

    pub async fn run(&mut self) -> Result<NegotiationOutcome, NegotiationError> {
        if self.state != NegotiationState::Init {
            return Err(NegotiationError::AlreadyRun(self.state));
        }

        info!(
            event_name = "negotiation.started",
            negotiation_id = %self.id,
            seller = %self.seller.id(),
            buyer = %self.buyer.id(),
            resource_id = %self.settings.resource_id,
            max_rounds = self.settings.max_rounds,
            "negotiation started"
        );

        loop {
            self.round += 1;
            self.advance(NegotiationEvent::RoundStarted)?;
            info!(
                event_name = "negotiation.round.started",
                negotiation_id = %self.id,
                round = self.round,
                "round started"
            );

            for role in [Role::Seller, Role::Buyer] {
                if let RoundStep::Halted(outcome) = self.compose(role).await? {
                    return Ok(outcome);
                }
            }
            self.advance(NegotiationEvent::MessagesExchanged)?;

            let seller = match self.decide(Role::Seller).await? {
                RoundStep::Proceed(decision) => decision,
                RoundStep::Halted(outcome) => return Ok(outcome),
            };
            let buyer = match self.decide(Role::Buyer).await? {
                RoundStep::Proceed(decision) => decision,
                RoundStep::Halted(outcome) => return Ok(outcome),
            };

            if seller.accepted && buyer.accepted {
                self.advance(NegotiationEvent::BothAccepted)?;
                return self.settle(seller, buyer).await;
            }

            self.advance(NegotiationEvent::AgreementWithheld)?;
            info!(
                event_name = "negotiation.round.withheld",
                negotiation_id = %self.id,
                round = self.round,
                seller_accepted = seller.accepted,
                buyer_accepted = buyer.accepted,
                "agreement withheld"
            );

            if self.round >= self.settings.max_rounds {
                return self.abort(NegotiationEvent::RoundLimitReached, AbortReason::RoundLimit);
            }
        }
    }

    async fn compose(&mut self, role: Role) -> Result<RoundStep<()>, NegotiationError> {
        let limit = self.settings.call_timeout;
        let cancel = self.cancel.clone();
        let agent = self.agent_mut(role);
        let agent_id = agent.id().clone();

        let result = guarded(limit, cancel, agent.compose_message()).await;
        match result {
            Ok(Ok(text)) => {
                self.deliver(role, &text);
                Ok(RoundStep::Proceed(()))
            }
            Ok(Err(source)) => Err(self.gateway_failed(agent_id, source)),
            Err(interrupt) => self.interrupted(interrupt).map(RoundStep::Halted),
        }
    }

    fn deliver(&mut self, sender: Role, text: &str) {
        let (from, to) = match sender {
            Role::Seller => (&self.seller, &mut self.buyer),
            Role::Buyer => (&self.buyer, &mut self.seller),
        };
        let speaker = from.id().clone();
        if from.is_peer(to.id()) {
            to.receive_message(&speaker, text);
        }

        info!(
            event_name = "negotiation.utterance.delivered",
            negotiation_id = %self.id,
            round = self.round,
            speaker = %speaker,
            words = text.split_whitespace().count(),
            "utterance delivered"
        );
        self.audit.emit(
            self.audit_event(
                "conversation.utterance_recorded",
                AuditCategory::Conversation,
                speaker.as_str(),
                AuditOutcome::Success,
            )
            .with_metadata("text", text),
        );
    }

    async fn decide(&mut self, role: Role) -> Result<RoundStep<TransactDecision>, NegotiationError> {
        let limit = self.settings.call_timeout;
        let cancel = self.cancel.clone();
        let agent = self.agent(role);
        let agent_id = agent.id().clone();

        let result = guarded(limit, cancel, agent.decide()).await;
        match result {
            Ok(Ok(decision)) => {
                self.audit.emit(
                    self.audit_event(
                        "decision.recorded",
                        AuditCategory::Decision,
                        agent_id.as_str(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("accepted", decision.accepted.to_string())
                    .with_metadata("proposed_price", decision.proposed_price.to_string()),
                );
                Ok(RoundStep::Proceed(decision))
            }
            Ok(Err(DecisionError::Malformed(malformed))) => {
                warn!(
                    event_name = "negotiation.decision.malformed",
                    negotiation_id = %self.id,
                    round = self.round,
                    agent = %agent_id,
                    error = %malformed,
                    "malformed decision treated as refusal"
                );
                self.audit.emit(
                    self.audit_event(
                        "decision.malformed",
                        AuditCategory::Decision,
                        agent_id.as_str(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", malformed.to_string()),
                );
                Ok(RoundStep::Proceed(TransactDecision::refuse()))
            }
            Ok(Err(DecisionError::Gateway(source))) => Err(self.gateway_failed(agent_id, source)),
            Err(interrupt) => self.interrupted(interrupt).map(RoundStep::Halted),
        }
    }

    async fn settle(
        &mut self,
        seller: TransactDecision,
        buyer: TransactDecision,
    ) -> Result<NegotiationOutcome, NegotiationError> {
        let binding_price = BindingPrice::reconcile(&seller, &buyer)?;
        self.binding_price = Some(binding_price);
        info!(
            event_name = "negotiation.agreed",
            negotiation_id = %self.id,
            round = self.round,
            seller_price = %seller.proposed_price,
            buyer_price = %buyer.proposed_price,
            binding_price = %binding_price,
            "both parties accepted"
        );

        let instruction = SettlementInstruction {
            resource_id: self.settings.resource_id.clone(),
            price: binding_price,
            from: self.seller.id().clone(),
            to: self.buyer.id().clone(),
        };
        let receipt = match self.settlement.transfer(&instruction).await {
            Ok(receipt) => receipt,
            Err(source) => {
                error!(
                    event_name = "negotiation.settlement.failed",
                    negotiation_id = %self.id,
                    binding_price = %binding_price,
                    error = %source,
                    "settlement transfer failed"
                );
                self.audit.emit(
                    self.audit_event(
                        "settlement.transfer_failed",
                        AuditCategory::Settlement,
                        "coordinator",
                        AuditOutcome::Failed,
                    )
                    .with_metadata("binding_price", binding_price.to_string())
                    .with_metadata("error", source.to_string()),
                );
                return Err(NegotiationError::Settlement { binding_price, source });
            }
        };
        self.audit.emit(
            self.audit_event(
                "settlement.transfer_completed",
                AuditCategory::Settlement,
                "coordinator",
                AuditOutcome::Success,
            )
            .with_metadata("receipt_id", receipt.receipt_id.clone())
            .with_metadata("binding_price", binding_price.to_string()),
        );

        let commitment = match self.settings.commitment {
            Some(plan) => Some(self.commit(plan, &receipt).await?),
            None => None,
        };

        Ok(NegotiationOutcome::Agreed { rounds: self.round, binding_price, receipt, commitment })
    }

    /// The buyer, as the new owner, deploys the commitment and drives both calls.
    async fn commit(
        &self,
        plan: CommitmentConfig,
        receipt: &SettlementReceipt,
    ) -> Result<CommitmentOutcome, NegotiationError> {
        let failed = |source: SettlementError| NegotiationError::Commitment {
            receipt_id: receipt.receipt_id.clone(),
            source,
        };

        let handle = self
            .settlement
            .deploy_commitment(&receipt.resource_id, self.buyer.id())
            .await
            .map_err(failed)?;
        let [a, b] = plan.execute_args;
        let execute_result = self.settlement.execute(&handle, a, b).await.map_err(failed)?;
        let [a, b] = plan.resolve_args;
        let resolve_result = self.settlement.resolve(&handle, a, b).await.map_err(failed)?;

        info!(
            event_name = "negotiation.commitment.completed",
            negotiation_id = %self.id,
            commitment_id = %handle.commitment_id,
            execute_result,
            resolve_result,
            "commitment executed and resolved"
        );
        Ok(CommitmentOutcome { handle, execute_result, resolve_result })
    }

    fn interrupted(&mut self, interrupt: Interrupt) -> Result<NegotiationOutcome, NegotiationError> {
        match interrupt {
            Interrupt::TimedOut => {
                self.abort(NegotiationEvent::GatewayTimedOut, AbortReason::GatewayTimeout)
            }
            Interrupt::Cancelled => self.abort(NegotiationEvent::Cancelled, AbortReason::Cancelled),
        }
    }

    fn abort(
        &mut self,
        event: NegotiationEvent,
        reason: AbortReason,
    ) -> Result<NegotiationOutcome, NegotiationError> {
        self.advance(event)?;
        warn!(
            event_name = "negotiation.aborted",
            negotiation_id = %self.id,
            round = self.round,
            reason = reason.as_str(),
            "negotiation aborted without settlement"
        );
        Ok(NegotiationOutcome::Aborted { rounds: self.round, reason })
    }

    fn gateway_failed(&mut self, agent: AgentId, source: GatewayError) -> NegotiationError {
        if let Err(error) = self.advance(NegotiationEvent::GatewayFailed) {
            return error;
        }
        error!(
            event_name = "negotiation.gateway.failed",
            negotiation_id = %self.id,
            round = self.round,
            agent = %agent,
            error = %source,
            "reasoning gateway failed"
        );
        NegotiationError::Gateway { agent, round: self.round, source }
    }

    fn advance(&mut self, event: NegotiationEvent) -> Result<(), NegotiationError> {
        let context = AuditContext::new(self.id.clone(), self.round, "coordinator");
        let outcome = self
            .engine
            .apply_with_audit(&self.state, &event, self.audit.as_ref(), &context)
            .map_err(DomainError::from)?;
        debug!(
            event_name = "negotiation.state.transitioned",
            negotiation_id = %self.id,
            round = self.round,
            from = ?outcome.from,
            to = ?outcome.to,
            actions = ?outcome.actions,
            "state transitioned"
        );
        self.state = outcome.to;
        Ok(())
    }

    fn audit_event(
        &self,
        event_type: &str,
        category: AuditCategory,
        actor: &str,
        outcome: AuditOutcome,
    ) -> AuditEvent {
        AuditEvent::new(self.id.clone(), self.round, event_type, category, actor, outcome)
    }

    fn agent(&self, role: Role) -> &NegotiatingAgent {
        match role {
            Role::Seller => &self.seller,
            Role::Buyer => &self.buyer,
        }
    }

    fn agent_mut(&mut self, role: Role) -> &mut NegotiatingAgent {
        match role {
            Role::Seller => &mut self.seller,
            Role::Buyer => &mut self.buyer,
        }
    }
}

async fn guarded<F>(
    limit: Duration,
    cancel: Option<watch::Receiver<bool>>,
    call: F,
) -> Result<F::Output, Interrupt>
where
    F: Future,
{
    let timed = tokio::time::timeout(limit, call);
    let Some(mut cancel) = cancel else {
        return timed.await.map_err(|_| Interrupt::TimedOut);
    };
    if *cancel.borrow_and_update() {
        return Err(Interrupt::Cancelled);
    }

    tokio::select! {
        result = timed => result.map_err(|_| Interrupt::TimedOut),
        () = cancellation(&mut cancel) => Err(Interrupt::Cancelled),
    }
}

async fn cancellation(cancel: &mut watch::Receiver<bool>) {
    loop {
        if cancel.changed().await.is_err() {
            // Sender dropped without cancelling.
            std::future::pending::<()>().await;
        }
        if *cancel.borrow_and_update() {
            return;
        }
    }
}
