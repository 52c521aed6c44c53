// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults, and the [`AppConfig`] loaded once at
//! startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory holding `access.redb` | `./data` |
//! | `RPC_URL` | HTTP JSON-RPC endpoint | `http://127.0.0.1:8545` |
//! | `RPC_WS_URL` | WebSocket endpoint for log subscriptions | derived from `RPC_URL` |
//! | `ENV` | Deployment environment; `local` disables the signup listener | `local` |
//! | `SIGNUP_TOPIC` | Topic for account notifications | `user-signup` |
//! | `JWT_ISSUER` | Session token issuer claim | `gallery` |
//! | `JWT_TTL_SECS` | Session token lifetime | `172800` |
//! | `FEATURES_FILE` | JSON array of feature flags seeded at startup | unset |
//! | `UPDATE_WORKERS` | Concurrent balance update tasks | `16` |
//! | `UPDATE_QUEUE_CAPACITY` | Pending update jobs | `1024` |
//! | `UPDATE_TASK_TIMEOUT_SECS` | Per-task deadline | `60` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM files; HTTPS when both are set | unset |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::features::PoolConfig;

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const RPC_URL_ENV: &str = "RPC_URL";
pub const RPC_WS_URL_ENV: &str = "RPC_WS_URL";
pub const ENVIRONMENT_ENV: &str = "ENV";
pub const SIGNUP_TOPIC_ENV: &str = "SIGNUP_TOPIC";
pub const JWT_ISSUER_ENV: &str = "JWT_ISSUER";
pub const JWT_TTL_ENV: &str = "JWT_TTL_SECS";
pub const FEATURES_FILE_ENV: &str = "FEATURES_FILE";
pub const UPDATE_WORKERS_ENV: &str = "UPDATE_WORKERS";
pub const UPDATE_QUEUE_CAPACITY_ENV: &str = "UPDATE_QUEUE_CAPACITY";
pub const UPDATE_TASK_TIMEOUT_ENV: &str = "UPDATE_TASK_TIMEOUT_SECS";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";

/// `json` switches the log output to JSON lines.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
pub const LOCAL_ENVIRONMENT: &str = "local";

const DEFAULT_JWT_TTL_SECS: i64 = 2 * 24 * 60 * 60;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {name}: {reason}")]
    InvalidUrl { name: &'static str, reason: String },

    #[error("{0} must use http, https, ws or wss")]
    UnsupportedScheme(&'static str),
}

#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub rpc_url: String,
    pub rpc_ws_url: String,
    pub environment: String,
    pub signup_topic: String,
    pub jwt_issuer: String,
    pub jwt_ttl_secs: i64,
    pub features_file: Option<PathBuf>,
    pub pool: PoolConfig,
    pub queue_capacity: usize,
    pub tls: Option<TlsPaths>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let string_or = |name: &str, default: &str| get(name).unwrap_or_else(|| default.to_string());

        let rpc_url = string_or(RPC_URL_ENV, DEFAULT_RPC_URL);
        validate_url(RPC_URL_ENV, &rpc_url)?;
        let rpc_ws_url = match get(RPC_WS_URL_ENV) {
            Some(url) => {
                validate_url(RPC_WS_URL_ENV, &url)?;
                url
            }
            None => derive_ws_url(&rpc_url)?,
        };

        let tls = match (get(TLS_CERT_PATH_ENV), get(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            _ => {
                tracing::warn!("Only one of TLS_CERT_PATH / TLS_KEY_PATH set, serving plain HTTP");
                None
            }
        };

        let defaults = PoolConfig::default();
        Ok(Self {
            host: string_or(HOST_ENV, "0.0.0.0"),
            port: parse_or(PORT_ENV, get(PORT_ENV), 8080),
            data_dir: string_or(DATA_DIR_ENV, "./data").into(),
            rpc_url,
            rpc_ws_url,
            environment: string_or(ENVIRONMENT_ENV, LOCAL_ENVIRONMENT),
            signup_topic: string_or(SIGNUP_TOPIC_ENV, "user-signup"),
            jwt_issuer: string_or(JWT_ISSUER_ENV, "gallery"),
            jwt_ttl_secs: parse_or(JWT_TTL_ENV, get(JWT_TTL_ENV), DEFAULT_JWT_TTL_SECS),
            features_file: get(FEATURES_FILE_ENV).map(PathBuf::from),
            pool: PoolConfig {
                concurrency: parse_or(UPDATE_WORKERS_ENV, get(UPDATE_WORKERS_ENV), defaults.concurrency),
                task_timeout: Duration::from_secs(parse_or(
                    UPDATE_TASK_TIMEOUT_ENV,
                    get(UPDATE_TASK_TIMEOUT_ENV),
                    defaults.task_timeout.as_secs(),
                )),
            },
            queue_capacity: parse_or(
                UPDATE_QUEUE_CAPACITY_ENV,
                get(UPDATE_QUEUE_CAPACITY_ENV),
                1024,
            ),
            tls,
        })
    }

    pub fn is_local(&self) -> bool {
        self.environment.eq_ignore_ascii_case(LOCAL_ENVIRONMENT)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T: std::str::FromStr + Copy + std::fmt::Display>(
    name: &str,
    raw: Option<String>,
    default: T,
) -> T {
    match raw {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(variable = name, value = %raw, default = %default, "Invalid value, using default");
            default
        }),
    }
}

fn validate_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        name,
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" | "ws" | "wss" => Ok(url),
        _ => Err(ConfigError::UnsupportedScheme(name)),
    }
}

/// `http` becomes `ws`, `https` becomes `wss`; WebSocket URLs pass through.
fn derive_ws_url(rpc_url: &str) -> Result<String, ConfigError> {
    let url = validate_url(RPC_URL_ENV, rpc_url)?;
    let rest = &rpc_url[url.scheme().len()..];
    Ok(match url.scheme() {
        "http" => format!("ws{rest}"),
        "https" => format!("wss{rest}"),
        _ => rpc_url.to_string(),
    })
}
