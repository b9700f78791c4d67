use std::time::Duration;

use clap::Parser;
use figment::{
    providers::{Data, Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::ws::{DuplicatePolicy, SocketSettings};

// Only flags the user actually passed are serialized into the top figment
// layer, so unset ones fall through to the lower layers.
/// Session-gated WebSocket server
#[derive(Parser, Serialize, Clone, Debug)]
#[command(name = "sockgate-server", version, about = "Session-gated WebSocket server")]
pub struct Cli {
    /// Port to listen on [default: 8080]
    #[arg(long, env = "SOCKGATE_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "SOCKGATE_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./sockgate.toml")]
    #[serde(skip)]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Data directory holding the session signing key [default: ./data]
    #[arg(long, env = "SOCKGATE_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Name of the cookie carrying the session token [default: session]
    #[arg(long, env = "SOCKGATE_SESSION_COOKIE")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_cookie: Option<String>,

    /// Upper bound on session lookup during an upgrade, in milliseconds [default: 5000]
    #[arg(long, env = "SOCKGATE_SESSION_TIMEOUT_MS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_timeout_ms: Option<u64>,

    /// Seconds between keepalive pings [default: 30]
    #[arg(long, env = "SOCKGATE_PING_INTERVAL_SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_interval_secs: Option<u64>,

    /// Seconds to wait for a pong before closing [default: 10]
    #[arg(long, env = "SOCKGATE_PONG_TIMEOUT_SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pong_timeout_secs: Option<u64>,

    /// Seconds to wait for the peer's close frame after a server-initiated close [default: 5]
    #[arg(long, env = "SOCKGATE_CLOSE_TIMEOUT_SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_timeout_secs: Option<u64>,

    /// What to do with an identity's old connection when it connects again
    /// [default: close-superseded]
    #[arg(long, env = "SOCKGATE_DUPLICATE_POLICY", value_enum)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_policy: Option<DuplicatePolicy>,
}

/// Resolved server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub json_logs: bool,
    pub generate_config: bool,
    pub data_dir: String,
    pub session_cookie: String,
    pub session_timeout_ms: u64,
    pub ping_interval_secs: u64,
    pub pong_timeout_secs: u64,
    pub close_timeout_secs: u64,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            session_cookie: "session".to_string(),
            session_timeout_ms: 5000,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
            close_timeout_secs: 5,
            duplicate_policy: DuplicatePolicy::CloseSuperseded,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (SOCKGATE_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Cli::parse();
        let file = Toml::file(&cli.config);
        Self::layered(file, &cli)
    }

    /// Merge the layers over the built-in defaults. `file` is the TOML layer.
    pub fn layered(file: Data<Toml>, cli: &Cli) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(file)
            .merge(Env::prefixed("SOCKGATE_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    /// Gate and connection settings derived from this config.
    pub fn socket_settings(&self) -> SocketSettings {
        SocketSettings {
            session_cookie: self.session_cookie.clone(),
            session_timeout: Duration::from_millis(self.session_timeout_ms),
            ping_interval: Duration::from_secs(self.ping_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(self.pong_timeout_secs),
            close_timeout: Duration::from_secs(self.close_timeout_secs),
            duplicate_policy: self.duplicate_policy,
        }
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# sockgate server configuration
# Place this file at ./sockgate.toml or specify with --config <path>
# All settings can be overridden via environment variables (SOCKGATE_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the session signing key (shared with the login service)
# data_dir = "./data"

# ---- Sessions ----

# Cookie carrying the session token
# session_cookie = "session"

# Upgrade is refused if the session lookup takes longer than this
# session_timeout_ms = 5000

# ---- Connections ----

# Keepalive ping interval and pong deadline
# ping_interval_secs = 30
# pong_timeout_secs = 10

# Time allowed for the client's close frame after the server closes
# close_timeout_secs = 5

# Reconnect of an identity that already has a socket:
#   "close-superseded"  close the old socket (code 4000)
#   "replace"           keep the old socket open but stop routing to it
# duplicate_policy = "close-superseded"
"#
    .to_string()
}
