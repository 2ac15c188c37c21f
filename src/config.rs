use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::error::{Result, TelemetryError};

pub const DEFAULT_FPS_AGG_INTERVAL_MS: u64 = 30 * 60 * 1000;
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_FRAME_RATE_HZ: u32 = 60;
pub const MAX_FRAME_RATE_HZ: u32 = 1_000;

/// Construction-time settings for one agent.
///
/// Keys are camelCase so the same document the web build consumes can be
/// deserialized directly.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub token: String,
    pub game_id: String,
    pub http_endpoint: String,
    pub ws_endpoint: String,

    /// Aggregation period for frame-rate samples, in milliseconds.
    #[serde(default = "default_fps_agg_interval")]
    pub fps_agg_interval: u64,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_ms: u64,

    /// Refresh rate of the built-in frame clock. Ignored when the host
    /// supplies its own.
    #[serde(default = "default_frame_rate")]
    pub frame_rate_hz: u32,

    /// Upper bound on pending events. `None` keeps the queue unbounded.
    #[serde(default)]
    pub max_queue_len: Option<usize>,
}

fn default_fps_agg_interval() -> u64 {
    DEFAULT_FPS_AGG_INTERVAL_MS
}

fn default_http_timeout() -> u64 {
    DEFAULT_HTTP_TIMEOUT_MS
}

fn default_frame_rate() -> u32 {
    DEFAULT_FRAME_RATE_HZ
}

impl AgentConfig {
    pub fn new(
        token: impl Into<String>,
        game_id: impl Into<String>,
        http_endpoint: impl Into<String>,
        ws_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            game_id: game_id.into(),
            http_endpoint: http_endpoint.into(),
            ws_endpoint: ws_endpoint.into(),
            fps_agg_interval: DEFAULT_FPS_AGG_INTERVAL_MS,
            http_timeout_ms: DEFAULT_HTTP_TIMEOUT_MS,
            frame_rate_hz: DEFAULT_FRAME_RATE_HZ,
            max_queue_len: None,
        }
    }

    pub fn with_fps_agg_interval(mut self, interval: Duration) -> Self {
        self.fps_agg_interval = interval.as_millis() as u64;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_frame_rate(mut self, hz: u32) -> Self {
        self.frame_rate_hz = hz;
        self
    }

    pub fn with_max_queue_len(mut self, max: usize) -> Self {
        self.max_queue_len = Some(max);
        self
    }

    /// Reads `TDA_TOKEN`, `TDA_GAME_ID`, `TDA_HTTP_ENDPOINT`, `TDA_WS_ENDPOINT`
    /// and the optional `TDA_FPS_AGG_INTERVAL_MS`.
    pub fn from_env() -> Result<Self> {
        let required = |key: &str| {
            std::env::var(key).map_err(|_| TelemetryError::Config(format!("{} is not set", key)))
        };

        let mut config = Self::new(
            required("TDA_TOKEN")?,
            required("TDA_GAME_ID")?,
            required("TDA_HTTP_ENDPOINT")?,
            required("TDA_WS_ENDPOINT")?,
        );

        if let Ok(raw) = std::env::var("TDA_FPS_AGG_INTERVAL_MS") {
            config.fps_agg_interval = raw.trim().parse().map_err(|_| {
                TelemetryError::Config(format!("TDA_FPS_AGG_INTERVAL_MS is not a number: {}", raw))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("token", &self.token),
            ("gameId", &self.game_id),
            ("httpEndpoint", &self.http_endpoint),
            ("wsEndpoint", &self.ws_endpoint),
        ] {
            if value.trim().is_empty() {
                return Err(TelemetryError::Config(format!("{} must not be empty", name)));
            }
        }

        Url::parse(&self.http_endpoint)
            .map_err(|e| TelemetryError::Config(format!("httpEndpoint: {}", e)))?;
        Url::parse(&self.ws_endpoint)
            .map_err(|e| TelemetryError::Config(format!("wsEndpoint: {}", e)))?;

        if self.fps_agg_interval == 0 {
            return Err(TelemetryError::Config("fpsAggInterval must be positive".to_string()));
        }
        if self.http_timeout_ms == 0 {
            return Err(TelemetryError::Config("httpTimeoutMs must be positive".to_string()));
        }
        if self.frame_rate_hz == 0 || self.frame_rate_hz > MAX_FRAME_RATE_HZ {
            return Err(TelemetryError::Config(format!(
                "frameRateHz must be between 1 and {}, got {}",
                MAX_FRAME_RATE_HZ, self.frame_rate_hz
            )));
        }
        if self.max_queue_len == Some(0) {
            return Err(TelemetryError::Config("maxQueueLen must be positive".to_string()));
        }
        Ok(())
    }

    pub fn fps_agg_period(&self) -> Duration {
        Duration::from_millis(self.fps_agg_interval)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Push endpoint with the `token` and `gameId` query parameters attached.
    pub fn push_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.ws_endpoint)
            .map_err(|e| TelemetryError::Config(format!("wsEndpoint: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("token", &self.token)
            .append_pair("gameId", &self.game_id);
        Ok(url)
    }
}
