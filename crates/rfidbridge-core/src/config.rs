//! Configuration loading.
//!
//! Settings come from a JSON file and may be overridden by environment
//! variables, so the same image can be deployed across branches with
//! only the environment differing.

use crate::{Error, Result};
use serde::Deserialize;
use std::env;
use std::path::Path;

/// A configured staff client: which branch a workstation belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Client {
    /// IP address of the staff PC (which is also where its RFID unit
    /// is reachable).
    #[serde(rename = "IP")]
    pub ip: String,

    /// Branch code to use in backend transactions from this client.
    #[serde(rename = "Branch")]
    pub branch: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port the RFID units listen on.
    #[serde(rename = "TCPPort")]
    pub tcp_port: u16,

    /// Listening port of the HTTP + WebSocket server.
    #[serde(rename = "HTTPPort")]
    pub http_port: u16,

    /// Duplicate warnings and errors to this file, if set.
    #[serde(rename = "ErrorLogFile")]
    pub error_log_file: String,

    /// Address (host:port) of the SIP server.
    #[serde(rename = "SIPServer")]
    pub sip_server: String,

    /// Credential stems for pool logins; the slot number is appended.
    #[serde(rename = "SIPUser")]
    pub sip_user: String,
    #[serde(rename = "SIPPass")]
    pub sip_pass: String,

    /// Department/location code used in the SIP login.
    #[serde(rename = "SIPDept")]
    pub sip_dept: String,

    /// Number of SIP connections to keep in the pool.
    #[serde(rename = "NumSIPConnections")]
    pub num_sip_connections: usize,

    /// Configured staff clients.
    #[serde(rename = "Clients")]
    pub clients: Vec<Client>,

    /// Branch to use when a client IP is not in the table.
    #[serde(rename = "FallBackBranch")]
    pub fallback_branch: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            tcp_port: 6767,
            http_port: 8899,
            error_log_file: String::new(),
            sip_server: "localhost:6001".to_string(),
            sip_user: "autouser".to_string(),
            sip_pass: "autopass".to_string(),
            sip_dept: "HUTL".to_string(),
            num_sip_connections: 3,
            clients: Vec::new(),
            fallback_branch: "hutl".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::Config(e.to_string()))
    }

    /// Apply environment-variable overrides.
    ///
    /// Recognized: `TCP_PORT`, `HTTP_PORT`, `SIP_SERVER`, `SIP_USER`,
    /// `SIP_PASS`, `SIP_CONNS`. Unparsable numeric values are rejected
    /// rather than silently ignored.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = env::var("TCP_PORT") {
            self.tcp_port = parse_env("TCP_PORT", &v)?;
        }
        if let Ok(v) = env::var("HTTP_PORT") {
            self.http_port = parse_env("HTTP_PORT", &v)?;
        }
        if let Ok(v) = env::var("SIP_SERVER") {
            self.sip_server = v;
        }
        if let Ok(v) = env::var("SIP_USER") {
            self.sip_user = v;
        }
        if let Ok(v) = env::var("SIP_PASS") {
            self.sip_pass = v;
        }
        if let Ok(v) = env::var("SIP_CONNS") {
            self.num_sip_connections = parse_env("SIP_CONNS", &v)?;
        }
        Ok(())
    }

    /// Resolve the branch for a client host, falling back to the
    /// configured default when the host is not in the table.
    #[must_use]
    pub fn branch_for(&self, host: &str) -> &str {
        self.clients
            .iter()
            .find(|c| c.ip == host)
            .map(|c| c.branch.as_str())
            .unwrap_or(&self.fallback_branch)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("invalid {name} value: {value:?}")))
}
