use parley_agent::parse_decision;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::commands::CommandResult;

const COMMAND: &str = "check-decision";

#[derive(Debug, Serialize)]
struct DecisionReport {
    command: &'static str,
    status: &'static str,
    accepted: bool,
    proposed_price: Decimal,
}

pub fn run(output: &str) -> CommandResult {
    match parse_decision(output) {
        Ok(decision) => CommandResult::report(
            0,
            &DecisionReport {
                command: COMMAND,
                status: "ok",
                accepted: decision.accepted,
                proposed_price: decision.proposed_price,
            },
        ),
        Err(error) => CommandResult::failure(COMMAND, "malformed_decision", error.to_string(), 1),
    }
}
