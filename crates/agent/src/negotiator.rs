use std::collections::BTreeSet;
use std::sync::Arc;

use parley_core::{AgentId, Role, TransactDecision};
use thiserror::Error;
use tracing::debug;

use crate::conversation::{ClipWindow, ConversationLog, Utterance};
use crate::decision::{parse_decision, MalformedDecision};
use crate::disposition::Disposition;
use crate::llm::{GatewayError, ReasoningGateway};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecisionError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Malformed(#[from] MalformedDecision),
}

/// One side of a negotiation: a disposition, its own view of the conversation
/// and the gateway it reasons through.
pub struct NegotiatingAgent {
    disposition: Disposition,
    log: ConversationLog,
    peers: BTreeSet<AgentId>,
    draft: Option<String>,
    gateway: Arc<dyn ReasoningGateway>,
    window: ClipWindow,
    streaming: bool,
}

impl NegotiatingAgent {
    pub fn new(disposition: Disposition, gateway: Arc<dyn ReasoningGateway>) -> Self {
        Self {
            disposition,
            log: ConversationLog::new(),
            peers: BTreeSet::new(),
            draft: None,
            gateway,
            window: ClipWindow::default(),
            streaming: false,
        }
    }

    pub fn with_clip_window(mut self, window: ClipWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn id(&self) -> &AgentId {
        self.disposition.id()
    }

    pub fn role(&self) -> Role {
        self.disposition.role()
    }

    pub fn disposition(&self) -> &Disposition {
        &self.disposition
    }

    /// Adds a fan-out relation. Returns `false` when the peer was already
    /// registered or is this agent itself.
    pub fn register_peer(&mut self, peer: AgentId) -> bool {
        if &peer == self.id() {
            return false;
        }
        self.peers.insert(peer)
    }

    pub fn peers(&self) -> impl Iterator<Item = &AgentId> {
        self.peers.iter()
    }

    pub fn is_peer(&self, id: &AgentId) -> bool {
        self.peers.contains(id)
    }

    pub fn set_draft(&mut self, draft: impl Into<String>) {
        self.draft = Some(draft.into());
    }

    pub fn take_draft(&mut self) -> Option<String> {
        self.draft.take()
    }

    pub fn draft(&self) -> Option<&str> {
        self.draft.as_deref()
    }

    pub fn transcript(&self) -> &[Utterance] {
        self.log.snapshot()
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    /// Clears history and draft between sessions. Peer relations are kept.
    pub fn reset(&mut self) {
        self.log.reset();
        self.draft = None;
    }

    /// Asks the gateway for this agent's next message and records it in the
    /// agent's own log. The draft is consumed only when the call succeeds.
    pub async fn compose_message(&mut self) -> Result<String, GatewayError> {
        let mut context = self.log.render(self.window);
        if let Some(draft) = self.draft.as_deref() {
            if !context.is_empty() {
                context.push('\n');
            }
            context.push_str(draft);
        }

        let reply = self
            .gateway
            .generate(self.disposition.system_message(), &context, self.streaming)
            .await?;

        self.draft = None;
        let id = self.id().clone();
        self.log.append(id, reply.clone());
        debug!(
            event_name = "agent.message.composed",
            agent = %self.id(),
            log_len = self.log.len(),
            "composed outbound message"
        );
        Ok(reply)
    }

    pub fn receive_message(&mut self, speaker: &AgentId, text: &str) {
        self.log.append(speaker.clone(), text);
    }

    pub async fn decide(&self) -> Result<TransactDecision, DecisionError> {
        let context = self.log.render(self.window);
        let raw = self
            .gateway
            .generate(self.disposition.decision_message(), &context, self.streaming)
            .await?;

        let decision = parse_decision(&raw)?;
        debug!(
            event_name = "agent.decision.parsed",
            agent = %self.id(),
            accepted = decision.accepted,
            proposed_price = %decision.proposed_price,
            "parsed transact decision"
        );
        Ok(decision)
    }
}
