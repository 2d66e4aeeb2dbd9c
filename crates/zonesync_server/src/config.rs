//! Server configuration.

/// Configuration for the record server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum number of change log entries returned per fetch.
    pub max_fetch_batch: usize,
    /// Maximum number of records accepted per save or delete call.
    pub max_save_batch: usize,
    /// Number of change log entries kept per zone. Tokens pointing before
    /// the kept history expire. `None` keeps everything.
    pub log_retention: Option<usize>,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new() -> Self {
        Self {
            max_fetch_batch: 400,
            max_save_batch: 400,
            log_retention: None,
        }
    }

    /// Sets the maximum fetch batch size.
    pub fn with_max_fetch_batch(mut self, size: usize) -> Self {
        self.max_fetch_batch = size.max(1);
        self
    }

    /// Sets the maximum save batch size.
    pub fn with_max_save_batch(mut self, size: usize) -> Self {
        self.max_save_batch = size.max(1);
        self
    }

    /// Limits the change log to `entries` per zone.
    pub fn with_log_retention(mut self, entries: usize) -> Self {
        self.log_retention = Some(entries);
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
