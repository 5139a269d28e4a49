//! Pipeline configuration
//!
//! [`RequestlogsConfig`] is the user-facing, serde-deserializable option set,
//! loadable from `requestlogs.toml` and `REQUESTLOGS_` environment variables
//! through figment. Before a pipeline runs, the options are compiled into a
//! [`CompiledConfig`]: the ignore-path patterns become a [`PathMatcher`], the
//! secret list becomes a hash set, header names are validated. Compilation
//! failures are fatal at build/reload time, never deferred to request time.
//!
//! [`SharedConfig`] publishes the compiled snapshot through an `ArcSwap`:
//! a reload builds a fully-populated replacement and swaps it atomically, so
//! an in-flight exchange never observes a half-updated option set.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use http::HeaderName;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::matcher::PathMatcher;

/// Configuration options for the request logging pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestlogsConfig {
    /// Field names whose values are masked in bodies and query parameters,
    /// and header names (lower-case) masked in captured request headers
    #[serde(default = "default_secrets")]
    pub secrets: Vec<String>,

    /// HTTP methods eligible for logging; other methods bypass the pipeline
    /// entirely, before an entry is even created
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,

    /// Inbound header whose value, when a valid UUID, is reused as the
    /// exchange's correlation id (default: disabled)
    #[serde(default)]
    pub request_id_header: Option<String>,

    /// Escape non-ASCII characters (`\uXXXX`) in the JSON-encoded payload
    /// fields of the stored record
    #[serde(default = "default_true")]
    pub json_ensure_ascii: bool,

    /// User field consulted by the skip policy ("id" or "username")
    #[serde(default)]
    pub ignore_user_field: Option<String>,

    /// Values of `ignore_user_field` whose exchanges are never stored
    #[serde(default)]
    pub ignore_users: Vec<Value>,

    /// Skip patterns over the request path: exact strings, `prefix*`,
    /// `*suffix`, or `re:<regex>`
    #[serde(default)]
    pub ignore_paths: Vec<String>,

    /// Header resolved for the client address when the service sits behind a
    /// trusted proxy (first hop wins); default is the direct peer address
    #[serde(default)]
    pub trusted_proxy_header: Option<String>,

    /// Largest request/response body, in bytes, captured into a snapshot;
    /// bigger bodies are passed through unlogged
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

impl Default for RequestlogsConfig {
    fn default() -> Self {
        Self {
            secrets: default_secrets(),
            methods: default_methods(),
            request_id_header: None,
            json_ensure_ascii: true,
            ignore_user_field: None,
            ignore_users: Vec::new(),
            ignore_paths: Vec::new(),
            trusted_proxy_header: None,
            max_body_size: default_max_body_size(),
        }
    }
}

impl RequestlogsConfig {
    /// Load from `requestlogs.toml` in the working directory, overridden by
    /// `REQUESTLOGS_` environment variables
    pub fn load() -> Result<Self> {
        Self::load_from("requestlogs.toml")
    }

    /// Load from a specific TOML file, overridden by `REQUESTLOGS_`
    /// environment variables
    pub fn load_from(path: &str) -> Result<Self> {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("REQUESTLOGS_"))
            .extract()
            .map_err(|e| Error::config(e.to_string()))
    }
}

fn default_secrets() -> Vec<String> {
    vec![
        "password".to_string(),
        "password1".to_string(),
        "password2".to_string(),
        "token".to_string(),
        "authorization".to_string(),
    ]
}

fn default_methods() -> Vec<String> {
    vec![
        "GET".to_string(),
        "PUT".to_string(),
        "PATCH".to_string(),
        "POST".to_string(),
        "DELETE".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

fn default_max_body_size() -> usize {
    64 * 1024
}

/// Validated, pre-compiled form of [`RequestlogsConfig`]
///
/// Built once per (re)load; shared read-only across concurrent exchanges.
#[derive(Debug)]
pub struct CompiledConfig {
    /// Secret field names
    pub secrets: HashSet<String>,
    /// Eligible methods, upper-cased
    pub methods: HashSet<String>,
    /// Validated inbound correlation-id header
    pub request_id_header: Option<HeaderName>,
    /// ASCII-escape toggle for the JSON-encoded record fields
    pub json_ensure_ascii: bool,
    /// Skip-policy user field
    pub ignore_user_field: Option<String>,
    /// Skip-policy user values
    pub ignore_users: Vec<Value>,
    /// Compiled skip predicate over request paths
    pub ignore_paths: PathMatcher,
    /// Validated trusted-proxy header
    pub trusted_proxy_header: Option<HeaderName>,
    /// Body capture limit in bytes
    pub max_body_size: usize,
}

impl CompiledConfig {
    /// Compile and validate the option set
    pub fn compile(config: &RequestlogsConfig) -> Result<Self> {
        Ok(Self {
            secrets: config.secrets.iter().cloned().collect(),
            methods: config.methods.iter().map(|m| m.to_uppercase()).collect(),
            request_id_header: parse_header(config.request_id_header.as_deref())?,
            json_ensure_ascii: config.json_ensure_ascii,
            ignore_user_field: config.ignore_user_field.clone(),
            ignore_users: config.ignore_users.clone(),
            ignore_paths: PathMatcher::compile(&config.ignore_paths)?,
            trusted_proxy_header: parse_header(config.trusted_proxy_header.as_deref())?,
            max_body_size: config.max_body_size,
        })
    }
}

fn parse_header(name: Option<&str>) -> Result<Option<HeaderName>> {
    name.map(|n| {
        HeaderName::from_bytes(n.to_lowercase().as_bytes())
            .map_err(|e| Error::config(format!("invalid header name {n:?}: {e}")))
    })
    .transpose()
}

/// Atomically swappable handle to the compiled configuration
///
/// Cloning is cheap; all clones observe the same slot. [`reload`] publishes
/// a fully-built replacement, so exchanges that already took a snapshot keep
/// using the configuration they started with.
///
/// [`reload`]: SharedConfig::reload
#[derive(Clone, Debug)]
pub struct SharedConfig {
    inner: Arc<ArcSwap<CompiledConfig>>,
}

impl SharedConfig {
    /// Compile `config` and publish the result
    pub fn new(config: RequestlogsConfig) -> Result<Self> {
        let compiled = CompiledConfig::compile(&config)?;
        Ok(Self {
            inner: Arc::new(ArcSwap::from_pointee(compiled)),
        })
    }

    /// Replace the published configuration.
    ///
    /// Compilation happens before the swap: on error the previous
    /// configuration stays in effect untouched.
    pub fn reload(&self, config: RequestlogsConfig) -> Result<()> {
        let compiled = CompiledConfig::compile(&config)?;
        self.inner.store(Arc::new(compiled));
        Ok(())
    }

    /// Snapshot of the current configuration, stable for one exchange
    pub fn snapshot(&self) -> Arc<CompiledConfig> {
        self.inner.load_full()
    }
}
