use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub negotiation: NegotiationConfig,
    pub seller: PartyConfig,
    pub buyer: PartyConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub provider: GatewayProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub streaming: bool,
}

#[derive(Clone, Debug)]
pub struct NegotiationConfig {
    pub max_rounds: u32,
    pub keep_first: usize,
    pub keep_last: usize,
    pub call_timeout_secs: u64,
    pub resource_id: String,
    pub commitment: Option<CommitmentConfig>,
}

impl NegotiationConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Arguments for the post-settlement commitment calls made by the buyer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentConfig {
    pub execute_args: [u64; 2],
    pub resolve_args: [u64; 2],
}

#[derive(Clone, Debug)]
pub struct PartyConfig {
    pub number: u32,
    pub target_price: Decimal,
    pub max_words: u32,
    pub persona_template: Option<String>,
    pub decision_template: Option<String>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Ollama,
}

impl GatewayProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub gateway_provider: Option<GatewayProvider>,
    pub gateway_model: Option<String>,
    pub gateway_base_url: Option<String>,
    pub gateway_api_key: Option<String>,
    pub max_rounds: Option<u32>,
    pub resource_id: Option<String>,
    pub seller_target_price: Option<Decimal>,
    pub buyer_target_price: Option<Decimal>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig {
                provider: GatewayProvider::Ollama,
                api_key: None,
                base_url: None,
                model: "llama3.1".to_string(),
                timeout_secs: 30,
                max_retries: 2,
                streaming: false,
            },
            negotiation: NegotiationConfig {
                max_rounds: 10,
                keep_first: 1,
                keep_last: 5,
                call_timeout_secs: 60,
                resource_id: "token-0".to_string(),
                commitment: None,
            },
            seller: PartyConfig {
                number: 1,
                target_price: Decimal::ONE,
                max_words: 150,
                persona_template: None,
                decision_template: None,
            },
            buyer: PartyConfig {
                number: 2,
                target_price: Decimal::new(5, 1),
                max_words: 150,
                persona_template: None,
                decision_template: None,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl FromStr for GatewayProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported gateway provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("parley.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(gateway) = patch.gateway {
            if let Some(provider) = gateway.provider {
                self.gateway.provider = provider;
            }
            if let Some(api_key_value) = gateway.api_key {
                self.gateway.api_key = Some(secret_value(api_key_value));
            }
            if let Some(base_url) = gateway.base_url {
                self.gateway.base_url = Some(base_url);
            }
            if let Some(model) = gateway.model {
                self.gateway.model = model;
            }
            if let Some(timeout_secs) = gateway.timeout_secs {
                self.gateway.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = gateway.max_retries {
                self.gateway.max_retries = max_retries;
            }
            if let Some(streaming) = gateway.streaming {
                self.gateway.streaming = streaming;
            }
        }

        if let Some(negotiation) = patch.negotiation {
            if let Some(max_rounds) = negotiation.max_rounds {
                self.negotiation.max_rounds = max_rounds;
            }
            if let Some(keep_first) = negotiation.keep_first {
                self.negotiation.keep_first = keep_first;
            }
            if let Some(keep_last) = negotiation.keep_last {
                self.negotiation.keep_last = keep_last;
            }
            if let Some(call_timeout_secs) = negotiation.call_timeout_secs {
                self.negotiation.call_timeout_secs = call_timeout_secs;
            }
            if let Some(resource_id) = negotiation.resource_id {
                self.negotiation.resource_id = resource_id;
            }
            if let Some(commitment) = negotiation.commitment {
                self.negotiation.commitment = Some(commitment);
            }
        }

        if let Some(seller) = patch.seller {
            self.seller.apply_patch(seller);
        }
        if let Some(buyer) = patch.buyer {
            self.buyer.apply_patch(buyer);
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PARLEY_GATEWAY_PROVIDER") {
            self.gateway.provider = value.parse()?;
        }
        if let Some(value) = read_env("PARLEY_GATEWAY_API_KEY") {
            self.gateway.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PARLEY_GATEWAY_BASE_URL") {
            self.gateway.base_url = Some(value);
        }
        if let Some(value) = read_env("PARLEY_GATEWAY_MODEL") {
            self.gateway.model = value;
        }
        if let Some(value) = read_env("PARLEY_GATEWAY_TIMEOUT_SECS") {
            self.gateway.timeout_secs = parse_env("PARLEY_GATEWAY_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_GATEWAY_MAX_RETRIES") {
            self.gateway.max_retries = parse_env("PARLEY_GATEWAY_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("PARLEY_GATEWAY_STREAMING") {
            self.gateway.streaming = parse_env("PARLEY_GATEWAY_STREAMING", &value)?;
        }

        if let Some(value) = read_env("PARLEY_NEGOTIATION_MAX_ROUNDS") {
            self.negotiation.max_rounds = parse_env("PARLEY_NEGOTIATION_MAX_ROUNDS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_NEGOTIATION_KEEP_FIRST") {
            self.negotiation.keep_first = parse_env("PARLEY_NEGOTIATION_KEEP_FIRST", &value)?;
        }
        if let Some(value) = read_env("PARLEY_NEGOTIATION_KEEP_LAST") {
            self.negotiation.keep_last = parse_env("PARLEY_NEGOTIATION_KEEP_LAST", &value)?;
        }
        if let Some(value) = read_env("PARLEY_NEGOTIATION_CALL_TIMEOUT_SECS") {
            self.negotiation.call_timeout_secs =
                parse_env("PARLEY_NEGOTIATION_CALL_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_NEGOTIATION_RESOURCE_ID") {
            self.negotiation.resource_id = value;
        }

        if let Some(value) = read_env("PARLEY_SELLER_NUMBER") {
            self.seller.number = parse_env("PARLEY_SELLER_NUMBER", &value)?;
        }
        if let Some(value) = read_env("PARLEY_SELLER_TARGET_PRICE") {
            self.seller.target_price = parse_env("PARLEY_SELLER_TARGET_PRICE", &value)?;
        }
        if let Some(value) = read_env("PARLEY_SELLER_MAX_WORDS") {
            self.seller.max_words = parse_env("PARLEY_SELLER_MAX_WORDS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_BUYER_NUMBER") {
            self.buyer.number = parse_env("PARLEY_BUYER_NUMBER", &value)?;
        }
        if let Some(value) = read_env("PARLEY_BUYER_TARGET_PRICE") {
            self.buyer.target_price = parse_env("PARLEY_BUYER_TARGET_PRICE", &value)?;
        }
        if let Some(value) = read_env("PARLEY_BUYER_MAX_WORDS") {
            self.buyer.max_words = parse_env("PARLEY_BUYER_MAX_WORDS", &value)?;
        }

        let log_level = read_env("PARLEY_LOGGING_LEVEL").or_else(|| read_env("PARLEY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PARLEY_LOGGING_FORMAT").or_else(|| read_env("PARLEY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(provider) = overrides.gateway_provider {
            self.gateway.provider = provider;
        }
        if let Some(model) = overrides.gateway_model {
            self.gateway.model = model;
        }
        if let Some(base_url) = overrides.gateway_base_url {
            self.gateway.base_url = Some(base_url);
        }
        if let Some(api_key) = overrides.gateway_api_key {
            self.gateway.api_key = Some(secret_value(api_key));
        }
        if let Some(max_rounds) = overrides.max_rounds {
            self.negotiation.max_rounds = max_rounds;
        }
        if let Some(resource_id) = overrides.resource_id {
            self.negotiation.resource_id = resource_id;
        }
        if let Some(target_price) = overrides.seller_target_price {
            self.seller.target_price = target_price;
        }
        if let Some(target_price) = overrides.buyer_target_price {
            self.buyer.target_price = target_price;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_gateway(&self.gateway)?;
        validate_negotiation(&self.negotiation)?;
        validate_party("seller", &self.seller)?;
        validate_party("buyer", &self.buyer)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

impl PartyConfig {
    fn apply_patch(&mut self, patch: PartyPatch) {
        if let Some(number) = patch.number {
            self.number = number;
        }
        if let Some(target_price) = patch.target_price {
            self.target_price = target_price;
        }
        if let Some(max_words) = patch.max_words {
            self.max_words = max_words;
        }
        if let Some(persona_template) = patch.persona_template {
            self.persona_template = Some(persona_template);
        }
        if let Some(decision_template) = patch.decision_template {
            self.decision_template = Some(decision_template);
        }
    }
}

/// Finds the config file the loader would read: the explicit path if it exists,
/// else `parley.toml` or `config/parley.toml`.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("parley.toml"), PathBuf::from("config/parley.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_gateway(gateway: &GatewayConfig) -> Result<(), ConfigError> {
    if gateway.timeout_secs == 0 || gateway.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "gateway.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if gateway.model.trim().is_empty() {
        return Err(ConfigError::Validation("gateway.model must not be empty".to_string()));
    }

    if matches!(gateway.provider, GatewayProvider::OpenAi | GatewayProvider::Anthropic) {
        let missing = gateway
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "gateway.api_key is required for openai/anthropic providers".to_string(),
            ));
        }
    }

    if let Some(base_url) = &gateway.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "gateway.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_negotiation(negotiation: &NegotiationConfig) -> Result<(), ConfigError> {
    if negotiation.max_rounds == 0 || negotiation.max_rounds > 1_000 {
        return Err(ConfigError::Validation(
            "negotiation.max_rounds must be in range 1..=1000".to_string(),
        ));
    }

    if negotiation.keep_last == 0 {
        return Err(ConfigError::Validation(
            "negotiation.keep_last must be greater than zero".to_string(),
        ));
    }

    if negotiation.call_timeout_secs == 0 || negotiation.call_timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "negotiation.call_timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    if negotiation.resource_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "negotiation.resource_id must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_party(section: &str, party: &PartyConfig) -> Result<(), ConfigError> {
    if party.max_words == 0 {
        return Err(ConfigError::Validation(format!(
            "{section}.max_words must be greater than zero"
        )));
    }

    let blank_template = [&party.persona_template, &party.decision_template]
        .into_iter()
        .any(|template| template.as_ref().is_some_and(|value| value.trim().is_empty()));
    if blank_template {
        return Err(ConfigError::Validation(format!(
            "{section} prompt templates must not be blank when provided"
        )));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    gateway: Option<GatewayPatch>,
    negotiation: Option<NegotiationPatch>,
    seller: Option<PartyPatch>,
    buyer: Option<PartyPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct GatewayPatch {
    provider: Option<GatewayProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    streaming: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct NegotiationPatch {
    max_rounds: Option<u32>,
    keep_first: Option<usize>,
    keep_last: Option<usize>,
    call_timeout_secs: Option<u64>,
    resource_id: Option<String>,
    commitment: Option<CommitmentConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct PartyPatch {
    number: Option<u32>,
    target_price: Option<Decimal>,
    max_words: Option<u32>,
    persona_template: Option<String>,
    decision_template: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
