//! Client configuration and per-call overrides.
//!
//! # Design
//! `Config` is built once, handed to `MachinesClient::new`, and never
//! mutated afterwards. Each call may carry an `Overrides` value;
//! `Config::merge` folds it over the defaults and returns a fresh `Config`
//! for that call only. An option set in the overrides wins, an option left
//! unset keeps the default. Header and query lists are merged entry by
//! entry rather than replaced wholesale.

use std::fmt;

use crate::retry::RetryPolicy;

pub const DEFAULT_BASE_URL: &str = "https://api.machines.dev/v1";

/// Header carrying the lease nonce on lease-protected machine operations.
pub const LEASE_NONCE_HEADER: &str = "fly-machine-lease-nonce";

pub const TOKEN_ENV: &str = "FLY_API_TOKEN";
pub const BASE_URL_ENV: &str = "FLY_API_BASE_URL";

#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    Bearer(String),
}

impl Auth {
    pub fn header_value(&self) -> String {
        match self {
            Auth::Bearer(token) => format!("Bearer {token}"),
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Bearer(_) => f.write_str("Bearer(<redacted>)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub auth: Option<Auth>,
    pub headers: Vec<(String, String)>,
    pub params: Vec<(String, String)>,
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth: None,
            headers: Vec::new(),
            params: Vec::new(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: trim_base_url(base_url),
            ..Self::default()
        }
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.auth = Some(Auth::Bearer(token.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        upsert_header(&mut self.headers, name.into(), value.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        upsert_param(&mut self.params, key.into(), value.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Reads `FLY_API_TOKEN` and `FLY_API_BASE_URL` from the process
    /// environment.
    pub fn from_env() -> Self {
        Self::from_env_vars(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, with the variable lookup supplied by the caller.
    /// Unset or blank variables leave the default in place.
    pub fn from_env_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = match present(BASE_URL_ENV) {
            Some(url) => Self::new(&url),
            None => Self::default(),
        };
        if let Some(token) = present(TOKEN_ENV) {
            config = config.with_bearer(token.trim());
        }
        config
    }

    /// Fold `overrides` over `self`, producing the configuration for a
    /// single call. `self` is left untouched.
    pub fn merge(&self, overrides: &Overrides) -> Config {
        let mut merged = self.clone();
        if let Some(base_url) = &overrides.base_url {
            merged.base_url = trim_base_url(base_url);
        }
        if let Some(auth) = &overrides.auth {
            merged.auth = Some(auth.clone());
        }
        for (name, value) in &overrides.headers {
            upsert_header(&mut merged.headers, name.clone(), value.clone());
        }
        for (key, value) in &overrides.params {
            upsert_param(&mut merged.params, key.clone(), value.clone());
        }
        if let Some(retry) = &overrides.retry {
            merged.retry = retry.clone();
        }
        merged
    }
}

/// Per-call transport options. Every field is optional; see `Config::merge`.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub auth: Option<Auth>,
    pub headers: Vec<(String, String)>,
    pub params: Vec<(String, String)>,
    pub retry: Option<RetryPolicy>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.auth = Some(Auth::Bearer(token.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        upsert_header(&mut self.headers, name.into(), value.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        upsert_param(&mut self.params, key.into(), value.into());
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Attach the nonce of a held lease.
    pub fn lease_nonce(self, nonce: impl Into<String>) -> Self {
        self.header(LEASE_NONCE_HEADER, nonce)
    }
}

fn trim_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

// Header names are case-insensitive, query keys are not.
pub(crate) fn upsert_header(headers: &mut Vec<(String, String)>, name: String, value: String) {
    match headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
        Some(entry) => entry.1 = value,
        None => headers.push((name, value)),
    }
}

pub(crate) fn upsert_param(params: &mut Vec<(String, String)>, key: String, value: String) {
    match params.iter_mut().find(|(k, _)| *k == key) {
        Some(entry) => entry.1 = value,
        None => params.push((key, value)),
    }
}
