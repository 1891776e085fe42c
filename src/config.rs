//! Client, session and polling configuration.
use std::{collections::BTreeMap, time::Duration};

/// Session option that selects the initial database.
pub const USE_DATABASE: &str = "use:database";

/// Connection-level settings applied by [`crate::Service::connect_with_config`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Time allowed to establish the TCP connection.
    pub connect_timeout: Duration,

    /// Socket read/write timeout for a single RPC round trip.
    pub rpc_timeout: Option<Duration>,

    /// Default deadline for `Session::execute_sync`; `None` waits forever.
    pub query_timeout: Option<Duration>,

    /// Delay schedule between status polls.
    pub poll_backoff: PollBackoff,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            rpc_timeout: Some(Duration::from_secs(60)),
            query_timeout: None,
            poll_backoff: PollBackoff::default(),
        }
    }
}

impl ClientConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_rpc_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn with_poll_backoff(mut self, backoff: PollBackoff) -> Self {
        self.poll_backoff = backoff;
        self
    }
}

/// Bounded, increasing delay between status polls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: u32,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(5),
            max: Duration::from_millis(500),
            multiplier: 2,
        }
    }
}

impl PollBackoff {
    /// Endless sequence of delays, starting at `initial` and capped at `max`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + use<> {
        let max = self.max;
        let multiplier = self.multiplier.max(1);
        std::iter::successors(Some(self.initial.min(max)), move |delay| {
            Some(delay.saturating_mul(multiplier).min(max))
        })
    }
}

/// Options sent to the server when a session is opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionConfig {
    options: BTreeMap<String, String>,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Makes `database` the session's current database.
    pub fn use_database(self, database: impl Into<String>) -> Self {
        self.set_option(USE_DATABASE, database)
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    pub(crate) fn to_wire(&self) -> Vec<(String, String)> {
        self.options
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
