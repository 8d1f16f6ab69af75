// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<SpringbokConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static SpringbokConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = SpringbokConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn init_from_env_or_default() -> Result<&'static SpringbokConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    let cfg = SpringbokConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn config() -> Result<&'static SpringbokConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("SPRINGBOK_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let candidates = [PathBuf::from("springbok.toml")];
    for p in candidates {
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "missing config file: set $SPRINGBOK_CONFIG or create ./springbok.toml"
    ))
}

#[derive(Clone, Deserialize)]
pub struct SpringbokConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "springbok=debug,rustls=off"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub debug: DebugConfig,
}

impl SpringbokConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let cfg: SpringbokConfig =
            toml::from_str(&s).with_context(|| format!("parse toml: {}", path.display()))?;
        Ok(cfg)
    }
}

impl Default for SpringbokConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            server: ServerConfig::default(),
            runtime: RuntimeConfig::default(),
            security: SecurityConfig::default(),
            scheduler: SchedulerConfig::default(),
            debug: DebugConfig::default(),
        }
    }
}

#[derive(Clone, Default, Deserialize)]
pub struct DebugConfig {
    /// Log incoming ExecPlanFragment requests as field-named JSON.
    #[serde(default)]
    pub exec_params_json: bool,
}

#[derive(Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_backend_port")]
    pub backend_port: u16,
    #[serde(default = "default_server_workers")]
    pub server_workers: usize,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}
fn default_backend_port() -> u16 {
    22000
}
fn default_server_workers() -> usize {
    4
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            backend_port: default_backend_port(),
            server_workers: default_server_workers(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Cap on diagnostic error-log entries per fragment instance.
    #[serde(default = "default_max_errors")]
    pub max_errors: i32,
    /// Rows per in-memory batch when the request does not set one.
    #[serde(default = "default_batch_size")]
    pub batch_size: i32,
    /// Seconds between periodic status reports to the coordinator.
    #[serde(default = "default_status_report_interval")]
    pub status_report_interval: i64,
    /// Milliseconds between periodic counter sampler wakeups.
    #[serde(default = "default_periodic_counter_update_period_ms")]
    pub periodic_counter_update_period_ms: u64,
    /// Threads in the fragment executor pool; 0 means one per core.
    #[serde(default)]
    pub fragment_exec_threads: usize,
    /// Seconds a query may sit idle before the expiration sweep cancels it.
    #[serde(default = "default_idle_query_timeout")]
    pub idle_query_timeout: i64,
}

fn default_max_errors() -> i32 {
    100
}
fn default_batch_size() -> i32 {
    1024
}
fn default_status_report_interval() -> i64 {
    5
}
fn default_periodic_counter_update_period_ms() -> u64 {
    500
}
fn default_idle_query_timeout() -> i64 {
    0
}

impl RuntimeConfig {
    pub fn actual_fragment_exec_threads(&self) -> usize {
        if self.fragment_exec_threads > 0 {
            return self.fragment_exec_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_errors: default_max_errors(),
            batch_size: default_batch_size(),
            status_report_interval: default_status_report_interval(),
            periodic_counter_update_period_ms: default_periodic_counter_update_period_ms(),
            fragment_exec_threads: 0,
            idle_query_timeout: default_idle_query_timeout(),
        }
    }
}

#[derive(Clone, Default, Deserialize)]
pub struct SecurityConfig {
    /// Trusted CA bundle (PEM) for outbound TLS connections. Empty disables
    /// TLS on client sockets.
    #[serde(default)]
    pub ssl_client_ca_certificate: String,
}

#[derive(Clone, Default, Deserialize)]
pub struct SchedulerConfig {
    /// TOML file mapping users to permitted admission pools. Empty disables
    /// pool authorization.
    #[serde(default)]
    pub pool_whitelist_path: String,
}
