use std::env;
use std::fs;
use std::path::Path;

use parley_core::config::{resolve_config_path, AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

use crate::commands::CommandResult;

struct Field {
    key_path: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

pub fn run(config_path: Option<&Path>) -> CommandResult {
    let options = LoadOptions {
        config_path: config_path.map(Path::to_path_buf),
        require_file: config_path.is_some(),
        ..LoadOptions::default()
    };
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            )
        }
    };

    let config_file_path = resolve_config_path(config_path);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key_path,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key_path, &field.value, source));
    }

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let api_key = match &config.gateway.api_key {
        Some(key) => redact_token(key.expose_secret()),
        None => "<unset>".to_string(),
    };
    let commitment = match &config.negotiation.commitment {
        Some(plan) => format!("execute{:?} resolve{:?}", plan.execute_args, plan.resolve_args),
        None => "<unset>".to_string(),
    };

    vec![
        Field {
            key_path: "gateway.provider",
            value: config.gateway.provider.as_str().to_string(),
            env_keys: &["PARLEY_GATEWAY_PROVIDER"],
        },
        Field {
            key_path: "gateway.model",
            value: config.gateway.model.clone(),
            env_keys: &["PARLEY_GATEWAY_MODEL"],
        },
        Field {
            key_path: "gateway.base_url",
            value: config.gateway.base_url.clone().unwrap_or_else(|| "<provider default>".to_string()),
            env_keys: &["PARLEY_GATEWAY_BASE_URL"],
        },
        Field { key_path: "gateway.api_key", value: api_key, env_keys: &["PARLEY_GATEWAY_API_KEY"] },
        Field {
            key_path: "gateway.timeout_secs",
            value: config.gateway.timeout_secs.to_string(),
            env_keys: &["PARLEY_GATEWAY_TIMEOUT_SECS"],
        },
        Field {
            key_path: "gateway.max_retries",
            value: config.gateway.max_retries.to_string(),
            env_keys: &["PARLEY_GATEWAY_MAX_RETRIES"],
        },
        Field {
            key_path: "gateway.streaming",
            value: config.gateway.streaming.to_string(),
            env_keys: &["PARLEY_GATEWAY_STREAMING"],
        },
        Field {
            key_path: "negotiation.max_rounds",
            value: config.negotiation.max_rounds.to_string(),
            env_keys: &["PARLEY_NEGOTIATION_MAX_ROUNDS"],
        },
        Field {
            key_path: "negotiation.keep_first",
            value: config.negotiation.keep_first.to_string(),
            env_keys: &["PARLEY_NEGOTIATION_KEEP_FIRST"],
        },
        Field {
            key_path: "negotiation.keep_last",
            value: config.negotiation.keep_last.to_string(),
            env_keys: &["PARLEY_NEGOTIATION_KEEP_LAST"],
        },
        Field {
            key_path: "negotiation.call_timeout_secs",
            value: config.negotiation.call_timeout_secs.to_string(),
            env_keys: &["PARLEY_NEGOTIATION_CALL_TIMEOUT_SECS"],
        },
        Field {
            key_path: "negotiation.resource_id",
            value: config.negotiation.resource_id.clone(),
            env_keys: &["PARLEY_NEGOTIATION_RESOURCE_ID"],
        },
        Field { key_path: "negotiation.commitment", value: commitment, env_keys: &[] },
        Field {
            key_path: "seller.number",
            value: config.seller.number.to_string(),
            env_keys: &["PARLEY_SELLER_NUMBER"],
        },
        Field {
            key_path: "seller.target_price",
            value: config.seller.target_price.to_string(),
            env_keys: &["PARLEY_SELLER_TARGET_PRICE"],
        },
        Field {
            key_path: "seller.max_words",
            value: config.seller.max_words.to_string(),
            env_keys: &["PARLEY_SELLER_MAX_WORDS"],
        },
        Field {
            key_path: "buyer.number",
            value: config.buyer.number.to_string(),
            env_keys: &["PARLEY_BUYER_NUMBER"],
        },
        Field {
            key_path: "buyer.target_price",
            value: config.buyer.target_price.to_string(),
            env_keys: &["PARLEY_BUYER_TARGET_PRICE"],
        },
        Field {
            key_path: "buyer.max_words",
            value: config.buyer.max_words.to_string(),
            env_keys: &["PARLEY_BUYER_MAX_WORDS"],
        },
        Field {
            key_path: "logging.level",
            value: config.logging.level.clone(),
            env_keys: &["PARLEY_LOGGING_LEVEL", "PARLEY_LOG_LEVEL"],
        },
        Field {
            key_path: "logging.format",
            value: format!("{:?}", config.logging.format),
            env_keys: &["PARLEY_LOGGING_FORMAT", "PARLEY_LOG_FORMAT"],
        },
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
