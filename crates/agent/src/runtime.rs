use std::sync::Arc;

use parley_core::config::AppConfig;
use parley_core::{AuditSink, InMemoryAuditSink, Role, SettlementService};

use crate::conversation::ClipWindow;
use crate::coordinator::{
    CoordinatorSettings, NegotiationCoordinator, NegotiationError, NegotiationOutcome,
};
use crate::disposition::{Disposition, DispositionError, Persona};
use crate::llm::ReasoningGateway;
use crate::negotiator::NegotiatingAgent;

/// Builds agents and coordinators from loaded configuration.
pub struct NegotiationRuntime {
    config: AppConfig,
    settlement: Arc<dyn SettlementService>,
    audit: Arc<dyn AuditSink>,
}

impl NegotiationRuntime {
    pub fn new(config: AppConfig, settlement: Arc<dyn SettlementService>) -> Self {
        Self { config, settlement, audit: Arc::new(InMemoryAuditSink::default()) }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn agent(
        &self,
        role: Role,
        gateway: Arc<dyn ReasoningGateway>,
    ) -> Result<NegotiatingAgent, DispositionError> {
        let party = match role {
            Role::Seller => &self.config.seller,
            Role::Buyer => &self.config.buyer,
        };
        let disposition = Disposition::new(party.number, Persona::from_config(role, party))?;
        let window =
            ClipWindow::new(self.config.negotiation.keep_first, self.config.negotiation.keep_last);

        Ok(NegotiatingAgent::new(disposition, gateway)
            .with_clip_window(window)
            .with_streaming(self.config.gateway.streaming))
    }

    /// Both agents share one gateway handle; each keeps its own log.
    pub fn coordinator(
        &self,
        gateway: Arc<dyn ReasoningGateway>,
    ) -> Result<NegotiationCoordinator, NegotiationError> {
        let seller = self.agent(Role::Seller, gateway.clone())?;
        let buyer = self.agent(Role::Buyer, gateway)?;
        let settings = CoordinatorSettings::from_config(&self.config.negotiation);

        Ok(NegotiationCoordinator::new(seller, buyer, self.settlement.clone(), settings)?
            .with_audit_sink(self.audit.clone()))
    }

    pub async fn negotiate(
        &self,
        gateway: Arc<dyn ReasoningGateway>,
    ) -> Result<NegotiationOutcome, NegotiationError> {
        self.coordinator(gateway)?.run().await
    }
}
