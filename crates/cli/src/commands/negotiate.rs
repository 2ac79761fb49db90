use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use parley_agent::{
    HttpReasoningGateway, NegotiationOutcome, NegotiationRuntime, ReasoningGateway,
    ScriptedGateway, Utterance,
};
use parley_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use parley_core::{AgentId, ApplicationError, InMemoryAuditSink, InMemorySettlementLedger, ResourceId, Role};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::watch;

use crate::commands::CommandResult;

const COMMAND: &str = "negotiate";
const EXIT_ABORTED: u8 = 3;

#[derive(Clone, Debug)]
pub struct NegotiateArgs {
    pub config_path: Option<PathBuf>,
    pub script_path: Option<PathBuf>,
    pub max_rounds: Option<u32>,
    pub resource_id: Option<String>,
    pub buyer_funds: Decimal,
    /// Installs the log subscriber and a Ctrl-C cancellation handler.
    pub interactive: bool,
}

impl Default for NegotiateArgs {
    fn default() -> Self {
        Self {
            config_path: None,
            script_path: None,
            max_rounds: None,
            resource_id: None,
            buyer_funds: Decimal::ONE_HUNDRED,
            interactive: false,
        }
    }
}

#[derive(Debug, Serialize)]
struct NegotiationReport {
    command: &'static str,
    status: &'static str,
    negotiation_id: String,
    outcome: NegotiationOutcome,
    transcript: Vec<Utterance>,
    audit_events: usize,
}

pub fn run(args: NegotiateArgs) -> CommandResult {
    let options = LoadOptions {
        config_path: args.config_path.clone(),
        require_file: args.config_path.is_some(),
        overrides: ConfigOverrides {
            max_rounds: args.max_rounds,
            resource_id: args.resource_id.clone(),
            ..ConfigOverrides::default()
        },
    };
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(COMMAND, "config_validation", error.to_string(), 2)
        }
    };
    if args.interactive {
        crate::init_logging(&config.logging);
    }

    let gateway: Arc<dyn ReasoningGateway> = match &args.script_path {
        Some(path) => match load_script(path) {
            Ok(gateway) => Arc::new(gateway),
            Err(error) => {
                return CommandResult::failure(COMMAND, "config_validation", format!("{error:#}"), 2)
            }
        },
        None => match HttpReasoningGateway::from_config(&config.gateway) {
            Ok(gateway) => Arc::new(gateway),
            Err(error) => {
                return CommandResult::from_error(
                    COMMAND,
                    &ApplicationError::Gateway(error.to_string()),
                )
            }
        },
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(COMMAND, "runtime_unavailable", error.to_string(), 1)
        }
    };

    runtime.block_on(negotiate(config, gateway, args.buyer_funds, args.interactive))
}

/// Reads a JSON array of replies. Both agents share the queue, consumed per round as
/// seller message, buyer message, seller decision, buyer decision.
fn load_script(path: &Path) -> Result<ScriptedGateway> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read gateway script `{}`", path.display()))?;
    let replies: Vec<String> = serde_json::from_str(&raw)
        .with_context(|| format!("gateway script `{}` must be a JSON array of strings", path.display()))?;
    Ok(ScriptedGateway::new(replies))
}

async fn negotiate(
    config: AppConfig,
    gateway: Arc<dyn ReasoningGateway>,
    buyer_funds: Decimal,
    interactive: bool,
) -> CommandResult {
    let ledger = InMemorySettlementLedger::default();
    ledger.mint(
        ResourceId(config.negotiation.resource_id.clone()),
        AgentId::new(Role::Seller, config.seller.number),
    );
    ledger.credit(AgentId::new(Role::Buyer, config.buyer.number), buyer_funds);

    let audit = InMemoryAuditSink::default();
    let runtime = NegotiationRuntime::new(config, Arc::new(ledger))
        .with_audit_sink(Arc::new(audit.clone()));
    let coordinator = match runtime.coordinator(gateway) {
        Ok(coordinator) => coordinator,
        Err(error) => return CommandResult::from_error(COMMAND, &ApplicationError::from(error)),
    };

    let (cancel, watcher) = watch::channel(false);
    let mut coordinator = coordinator.with_cancellation(watcher);
    let interrupt = interactive.then(|| {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = cancel.send(true);
            }
        })
    });

    let result = coordinator.run().await;
    if let Some(interrupt) = interrupt {
        interrupt.abort();
    }

    match result {
        Ok(outcome) => {
            let (status, exit_code) =
                if outcome.is_agreed() { ("agreed", 0) } else { ("aborted", EXIT_ABORTED) };
            CommandResult::report(
                exit_code,
                &NegotiationReport {
                    command: COMMAND,
                    status,
                    negotiation_id: coordinator.id().to_string(),
                    outcome,
                    transcript: coordinator.seller().transcript().to_vec(),
                    audit_events: audit.events().len(),
                },
            )
        }
        Err(error) => CommandResult::from_error(COMMAND, &ApplicationError::from(error)),
    }
}
