use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use parley_cli::commands::{check_decision, config, negotiate};
use serde_json::Value;

const AGREEING_SCRIPT: &str = r#"[
    "The NFT is yours for 1.4 ETH.",
    "I was thinking 0.3 ETH.",
    "FALSE_<0>",
    "FALSE_<0>",
    "I can come down to 1.0 ETH.",
    "0.5 ETH and we have a deal.",
    "TRUE_<1.0>",
    "TRUE_<0.5>"
]"#;

#[test]
fn negotiate_with_script_settles_at_mean_price() {
    let dir = tempfile::tempdir().expect("temp dir");
    let script = write_file(&dir, "replies.json", AGREEING_SCRIPT);

    with_env(&[("PARLEY_NEGOTIATION_MAX_ROUNDS", "3")], || {
        let result = negotiate::run(negotiate::NegotiateArgs {
            script_path: Some(script.clone()),
            ..negotiate::NegotiateArgs::default()
        });
        assert_eq!(result.exit_code, 0, "expected agreement: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "negotiate");
        assert_eq!(payload["status"], "agreed");
        assert_eq!(payload["outcome"]["status"], "agreed");
        assert_eq!(payload["outcome"]["rounds"], 2);
        assert_eq!(payload["outcome"]["binding_price"], "0.75");
        assert_eq!(payload["outcome"]["receipt"]["from"], "seller_1");
        assert_eq!(payload["outcome"]["receipt"]["to"], "buyer_2");
        assert_eq!(payload["transcript"].as_array().map(Vec::len), Some(4));
        assert_eq!(payload["transcript"][1]["speaker"], "buyer_2");
    });
}

#[test]
fn negotiate_reports_abort_at_round_limit() {
    let dir = tempfile::tempdir().expect("temp dir");
    let script = write_file(
        &dir,
        "replies.json",
        r#"["2 ETH.", "0.1 ETH.", "FALSE_<0>", "TRUE_<0.1>"]"#,
    );

    with_env(&[], || {
        let result = negotiate::run(negotiate::NegotiateArgs {
            script_path: Some(script.clone()),
            max_rounds: Some(1),
            ..negotiate::NegotiateArgs::default()
        });
        assert_eq!(result.exit_code, 3, "expected aborted exit code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "aborted");
        assert_eq!(payload["outcome"]["reason"], "round_limit");
        assert_eq!(payload["outcome"]["rounds"], 1);
    });
}

#[test]
fn negotiate_reports_gateway_failure_when_script_runs_dry() {
    let dir = tempfile::tempdir().expect("temp dir");
    let script = write_file(&dir, "replies.json", r#"["Only one reply."]"#);

    with_env(&[], || {
        let result = negotiate::run(negotiate::NegotiateArgs {
            script_path: Some(script.clone()),
            ..negotiate::NegotiateArgs::default()
        });
        assert_eq!(result.exit_code, 4, "expected gateway failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "gateway_unavailable");
    });
}

#[test]
fn negotiate_reports_settlement_failure_for_unfunded_buyer() {
    let dir = tempfile::tempdir().expect("temp dir");
    let script = write_file(&dir, "replies.json", AGREEING_SCRIPT);

    with_env(&[], || {
        let result = negotiate::run(negotiate::NegotiateArgs {
            script_path: Some(script.clone()),
            buyer_funds: rust_decimal::Decimal::new(1, 1),
            ..negotiate::NegotiateArgs::default()
        });
        assert_eq!(result.exit_code, 5, "expected settlement failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "settlement_failure");
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("0.75"), "binding price is reported: {message}");
    });
}

#[test]
fn negotiate_rejects_invalid_config() {
    with_env(&[("PARLEY_NEGOTIATION_MAX_ROUNDS", "0")], || {
        let result = negotiate::run(negotiate::NegotiateArgs::default());
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "negotiate");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn negotiate_rejects_unreadable_script() {
    with_env(&[], || {
        let result = negotiate::run(negotiate::NegotiateArgs {
            script_path: Some(PathBuf::from("does-not-exist/replies.json")),
            ..negotiate::NegotiateArgs::default()
        });
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("failed to read gateway script"));
    });
}

#[test]
fn check_decision_reports_parsed_values() {
    let result = check_decision::run("TRUE_<1.0>");
    assert_eq!(result.exit_code, 0);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["command"], "check-decision");
    assert_eq!(payload["accepted"], true);
    assert_eq!(payload["proposed_price"], "1.0");
}

#[test]
fn check_decision_fails_closed_on_unknown_token() {
    let result = check_decision::run("MAYBE_<1.0>");
    assert_eq!(result.exit_code, 1);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["status"], "error");
    assert_eq!(payload["error_class"], "malformed_decision");
}

#[test]
fn config_attributes_sources_and_redacts_api_key() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = write_file(
        &dir,
        "parley.toml",
        "[negotiation]\nmax_rounds = 4\n\n[seller]\ntarget_price = \"1.5\"\n",
    );

    with_env(
        &[
            ("PARLEY_GATEWAY_PROVIDER", "openai"),
            ("PARLEY_GATEWAY_API_KEY", "sk-live-secret"),
            ("PARLEY_LOG_LEVEL", "debug"),
        ],
        || {
            let result = config::run(Some(&path));
            assert_eq!(result.exit_code, 0, "expected config output: {}", result.output);

            let output = &result.output;
            assert!(output.contains("- gateway.provider = openai (source: env (PARLEY_GATEWAY_PROVIDER))"));
            assert!(output.contains("- gateway.api_key = sk-*** (source: env (PARLEY_GATEWAY_API_KEY))"));
            assert!(!output.contains("sk-live-secret"));
            assert!(output.contains("- negotiation.max_rounds = 4 (source: file ("));
            assert!(output.contains("- seller.target_price = 1.5 (source: file ("));
            assert!(output.contains("- buyer.target_price = 0.5 (source: default)"));
            assert!(output.contains("- logging.level = debug (source: env (PARLEY_LOG_LEVEL))"));
        },
    );
}

#[test]
fn config_reports_validation_failure() {
    with_env(&[("PARLEY_GATEWAY_PROVIDER", "anthropic")], || {
        let result = config::run(None);
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "config");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("write fixture");
    path
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "PARLEY_GATEWAY_PROVIDER",
        "PARLEY_GATEWAY_API_KEY",
        "PARLEY_GATEWAY_BASE_URL",
        "PARLEY_GATEWAY_MODEL",
        "PARLEY_GATEWAY_TIMEOUT_SECS",
        "PARLEY_GATEWAY_MAX_RETRIES",
        "PARLEY_GATEWAY_STREAMING",
        "PARLEY_NEGOTIATION_MAX_ROUNDS",
        "PARLEY_NEGOTIATION_KEEP_FIRST",
        "PARLEY_NEGOTIATION_KEEP_LAST",
        "PARLEY_NEGOTIATION_CALL_TIMEOUT_SECS",
        "PARLEY_NEGOTIATION_RESOURCE_ID",
        "PARLEY_SELLER_NUMBER",
        "PARLEY_SELLER_TARGET_PRICE",
        "PARLEY_SELLER_MAX_WORDS",
        "PARLEY_BUYER_NUMBER",
        "PARLEY_BUYER_TARGET_PRICE",
        "PARLEY_BUYER_MAX_WORDS",
        "PARLEY_LOGGING_LEVEL",
        "PARLEY_LOGGING_FORMAT",
        "PARLEY_LOG_LEVEL",
        "PARLEY_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
