// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client and route configuration.
//!
//! Supports both programmatic and file-based configuration.

use crate::broker::is_valid_pattern;
use crate::response::ResponseContains;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Client settings.
    #[serde(default)]
    pub client: ClientConfig,

    /// RPC routes to serve.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            client: ClientConfig::default(),
            routes: Vec::new(),
        }
    }
}

impl RpcConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.client.validate()?;
        for (i, route) in self.routes.iter().enumerate() {
            route
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("Route {}: {}", i, e)))?;
        }
        Ok(())
    }

    /// Add a route.
    pub fn add_route(&mut self, route: RouteConfig) {
        self.routes.push(route);
    }
}

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Client name (for identification in logs).
    #[serde(default = "default_client_name")]
    pub name: String,

    /// Reply queue name; empty lets the broker generate one.
    #[serde(default)]
    pub reply_queue: String,

    /// Timeout applied when a call does not set its own (milliseconds).
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Fields surfaced from replies.
    #[serde(default)]
    pub response_contains: ResponseContains,
}

fn default_client_name() -> String {
    "topic-rpc-client".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            reply_queue: String::new(),
            default_timeout_ms: default_timeout_ms(),
            response_contains: ResponseContains::default(),
        }
    }
}

impl ClientConfig {
    /// Create a new config builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "Client default_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Client config builder for fluent API
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    name: Option<String>,
    reply_queue: Option<String>,
    default_timeout: Option<Duration>,
    response_contains: Option<ResponseContains>,
}

impl ClientConfigBuilder {
    /// Set client name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set a fixed reply queue name
    pub fn reply_queue(mut self, queue: impl Into<String>) -> Self {
        self.reply_queue = Some(queue.into());
        self
    }

    /// Set default call timeout
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Set default reply field selection
    pub fn response_contains(mut self, policy: ResponseContains) -> Self {
        self.response_contains = Some(policy);
        self
    }

    /// Build the configuration
    pub fn build(self) -> ClientConfig {
        let defaults = ClientConfig::default();

        ClientConfig {
            name: self.name.unwrap_or(defaults.name),
            reply_queue: self.reply_queue.unwrap_or(defaults.reply_queue),
            default_timeout_ms: self
                .default_timeout
                .map(|t| t.as_millis() as u64)
                .unwrap_or(defaults.default_timeout_ms),
            response_contains: self
                .response_contains
                .unwrap_or(defaults.response_contains),
        }
    }
}

/// Configuration for a single server route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Topic exchange the queue is bound to.
    pub exchange: String,

    /// Queue consumed by this route.
    pub queue: String,

    /// Binding pattern (`*` one word, `#` zero or more words).
    pub routing_key: String,

    /// Responder identity set on every reply.
    #[serde(default = "default_signature")]
    pub signature: String,

    /// Auto-acknowledge deliveries (plain routes only).
    #[serde(default)]
    pub no_ack: bool,

    /// Fields surfaced from requests.
    #[serde(default)]
    pub response_contains: ResponseContains,

    /// Maximum requests handled concurrently.
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,
}

fn default_signature() -> String {
    "server".to_string()
}

fn default_prefetch() -> usize {
    16
}

impl RouteConfig {
    /// Create a new route.
    pub fn new(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            routing_key: routing_key.into(),
            signature: default_signature(),
            no_ack: false,
            response_contains: ResponseContains::default(),
            prefetch: default_prefetch(),
        }
    }

    /// Set reply signature.
    pub fn signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }

    /// Set auto-acknowledge mode.
    pub fn no_ack(mut self, enabled: bool) -> Self {
        self.no_ack = enabled;
        self
    }

    /// Set request field selection.
    pub fn response_contains(mut self, policy: ResponseContains) -> Self {
        self.response_contains = policy;
        self
    }

    /// Set concurrent request limit.
    pub fn prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Validate the route.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exchange.is_empty() {
            return Err(ConfigError::Invalid("empty exchange".into()));
        }
        if self.queue.is_empty() {
            return Err(ConfigError::Invalid("empty queue".into()));
        }
        if self.routing_key.is_empty() {
            return Err(ConfigError::Invalid("empty routing_key".into()));
        }
        if !is_valid_pattern(&self.routing_key) {
            return Err(ConfigError::Invalid(format!(
                "invalid routing pattern '{}'",
                self.routing_key
            )));
        }
        if self.prefetch == 0 {
            return Err(ConfigError::Invalid("prefetch must be positive".into()));
        }
        Ok(())
    }
}
