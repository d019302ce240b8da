use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;

use crate::error::{ApmError, ApmResult};

/// Agent configuration.
///
/// Loaded from the environment (`APM_*` variables, `.env` honoured) or from a
/// TOML file. Every field has a default so partial files are fine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApmConfig {
    /// Master switch; when false nothing is recorded or exported
    pub active: bool,
    pub app_name: String,
    pub cli: CliConfig,
    pub spans: SpansConfig,
    pub transactions: TransactionsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Whether console commands (scheduler, workers) are instrumented
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpansConfig {
    /// Cap on spans exported per collector for a single transaction flush
    #[serde(alias = "maxTraceItems")]
    pub max_trace_items: usize,
    /// Refuse to stop a transaction that is not the innermost open one
    #[serde(alias = "strictTransactionOrder")]
    pub strict_transaction_order: bool,
    pub querylog: QueryLogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryLogConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TransactionsConfig {
    /// Regexes; matching transaction names are not recorded
    #[serde(alias = "ignorePatterns")]
    pub ignore_patterns: Vec<String>,
}

impl Default for ApmConfig {
    fn default() -> Self {
        Self {
            active: true,
            app_name: "app".to_string(),
            cli: CliConfig::default(),
            spans: SpansConfig::default(),
            transactions: TransactionsConfig::default(),
        }
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self { active: true }
    }
}

impl Default for SpansConfig {
    fn default() -> Self {
        Self {
            max_trace_items: 1000,
            strict_transaction_order: false,
            querylog: QueryLogConfig::default(),
        }
    }
}

impl Default for QueryLogConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl ApmConfig {
    /// Read configuration from `APM_*` environment variables, loading `.env` first.
    pub fn from_env() -> ApmResult<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source. Unset variables keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> ApmResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("APM_ACTIVE") {
            config.active = parse_bool("APM_ACTIVE", &value)?;
        }
        if let Some(value) = lookup("APM_CLI_ACTIVE") {
            config.cli.active = parse_bool("APM_CLI_ACTIVE", &value)?;
        }
        if let Some(value) = lookup("APM_APP_NAME") {
            config.app_name = value;
        }
        if let Some(value) = lookup("APM_MAX_TRACE_ITEMS") {
            config.spans.max_trace_items = value.trim().parse().map_err(|_| {
                ApmError::Config(format!(
                    "APM_MAX_TRACE_ITEMS must be a non-negative integer, got '{}'",
                    value
                ))
            })?;
        }
        if let Some(value) = lookup("APM_STRICT_TRANSACTION_ORDER") {
            config.spans.strict_transaction_order =
                parse_bool("APM_STRICT_TRANSACTION_ORDER", &value)?;
        }
        if let Some(value) = lookup("APM_QUERYLOG_ENABLED") {
            config.spans.querylog.enabled = parse_bool("APM_QUERYLOG_ENABLED", &value)?;
        }
        if let Some(value) = lookup("APM_IGNORE_PATTERNS") {
            config.transactions.ignore_patterns = value
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }

        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> ApmResult<Self> {
        toml::from_str(contents).map_err(|e| ApmError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> ApmResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&contents)?;
        log::info!("[APM] Loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    /// The agent records nothing when inactive, or when running a console
    /// command while console instrumentation is off.
    pub fn is_agent_disabled(&self, running_in_console: bool) -> bool {
        !self.active || (running_in_console && !self.cli.active)
    }

    /// Dotted-key boolean lookup, e.g. `spans.querylog.enabled`.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match key {
            "active" => Some(self.active),
            "cli.active" => Some(self.cli.active),
            "spans.querylog.enabled" => Some(self.spans.querylog.enabled),
            "spans.strictTransactionOrder" | "spans.strict_transaction_order" => {
                Some(self.spans.strict_transaction_order)
            }
            _ => None,
        }
    }

    /// Dotted-key integer lookup, e.g. `spans.maxTraceItems`.
    pub fn get_usize(&self, key: &str) -> Option<usize> {
        match key {
            "spans.maxTraceItems" | "spans.max_trace_items" => Some(self.spans.max_trace_items),
            _ => None,
        }
    }

    /// Flattened view used for logging the effective configuration.
    pub fn summary(&self) -> HashMap<&'static str, String> {
        let mut out = HashMap::new();
        out.insert("active", self.active.to_string());
        out.insert("app_name", self.app_name.clone());
        out.insert("cli.active", self.cli.active.to_string());
        out.insert("spans.maxTraceItems", self.spans.max_trace_items.to_string());
        out.insert("spans.querylog.enabled", self.spans.querylog.enabled.to_string());
        out.insert(
            "spans.strictTransactionOrder",
            self.spans.strict_transaction_order.to_string(),
        );
        out.insert(
            "transactions.ignorePatterns",
            self.transactions.ignore_patterns.join(","),
        );
        out
    }
}

fn parse_bool(key: &str, value: &str) -> ApmResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ApmError::Config(format!("{} must be a boolean, got '{}'", key, other))),
    }
}
