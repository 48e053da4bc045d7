//! Read-only configuration snapshot consumed when the user agent is built.

use serde::{Deserialize, Serialize};
use std::{net::IpAddr, path::PathBuf, time::Duration};

pub const DEFAULT_SIP_PORT: u16 = 5060;
pub const RTP_DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_REGISTER_EXPIRES: u32 = 3600;
pub const USER_AGENT: &str = concat!("sip-useragent/", env!("CARGO_PKG_VERSION"));

/// How the media manager sources audio for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaMode {
    #[default]
    None,
    CaptureAndPlayback,
    Echo,
    File,
}

/// RFC 3261 base timer values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub t1_ms: u64,
    pub t2_ms: u64,
    pub t4_ms: u64,
    /// How often the transaction manager polls for expired timers.
    pub poll_interval_ms: u64,
    /// Timer C: how long a client INVITE may sit in Proceeding without a
    /// final response.
    pub timer_c_ms: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            t1_ms: 500,
            t2_ms: 4000,
            t4_ms: 5000,
            poll_interval_ms: 20,
            timer_c_ms: 180_000,
        }
    }
}

impl TimerConfig {
    pub fn t1(&self) -> Duration {
        Duration::from_millis(self.t1_ms)
    }
    pub fn t2(&self) -> Duration {
        Duration::from_millis(self.t2_ms)
    }
    pub fn t4(&self) -> Duration {
        Duration::from_millis(self.t4_ms)
    }
    pub fn timer_c(&self) -> Duration {
        Duration::from_millis(self.timer_c_ms)
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub user_part: String,
    pub domain: String,
    pub password: Option<String>,
    /// Digest username when it differs from `user_part`.
    pub auth_username: Option<String>,
    pub realm: Option<String>,
    /// Address advertised in Via and Contact. Falls back to the transport address.
    pub local_inet_address: Option<IpAddr>,
    pub public_inet_address: Option<IpAddr>,
    pub sip_port: u16,
    pub rtp_port: u16,
    pub outbound_proxy: Option<String>,
    pub media_mode: MediaMode,
    pub media_file: Option<PathBuf>,
    pub media_debug: bool,
    pub register_expires: u32,
    pub user_agent: String,
    pub timers: TimerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_part: String::new(),
            domain: "localhost".to_string(),
            password: None,
            auth_username: None,
            realm: None,
            local_inet_address: None,
            public_inet_address: None,
            sip_port: DEFAULT_SIP_PORT,
            rtp_port: RTP_DEFAULT_PORT,
            outbound_proxy: None,
            media_mode: MediaMode::None,
            media_file: None,
            media_debug: false,
            register_expires: DEFAULT_REGISTER_EXPIRES,
            user_agent: USER_AGENT.to_string(),
            timers: TimerConfig::default(),
        }
    }
}

impl Config {
    pub fn from_json(text: &str) -> crate::Result<Self> {
        serde_json::from_str(text).map_err(|e| crate::Error::Error(format!("invalid config: {}", e)))
    }

    /// Username used for digest authentication.
    pub fn auth_user(&self) -> &str {
        self.auth_username.as_deref().unwrap_or(&self.user_part)
    }

    /// Address-of-record, e.g. `sip:alice@example.com`.
    pub fn aor(&self) -> String {
        format!("sip:{}@{}", self.user_part, self.domain)
    }
}
