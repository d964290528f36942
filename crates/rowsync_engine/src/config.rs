//! Configuration for the sync engine.

use rand::Rng;
use rowsync_core::JSON_SERIALIZER_KEY;
use rowsync_protocol::ScopeParameter;
use rowsync_provider::DEFAULT_SCOPE_INFO_TABLE;
use std::path::PathBuf;
use std::time::Duration;

/// Default number of rows per batch part.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// How a conflicting row is resolved when both sides changed it since the
/// last exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictResolution {
    /// The newer `last_change` wins; ties go to the remote row.
    #[default]
    LastWriterWins,
    /// The remote row always wins.
    RemoteWins,
    /// The local row always wins.
    LocalWins,
}

impl ConflictResolution {
    /// Returns true if the remote row should be applied over a local row
    /// changed at `local_last_change`.
    pub fn remote_wins(self, remote_last_change: Option<i64>, local_last_change: i64) -> bool {
        match self {
            ConflictResolution::RemoteWins => true,
            ConflictResolution::LocalWins => false,
            ConflictResolution::LastWriterWins => match remote_last_change {
                Some(remote) => remote >= local_last_change,
                None => true,
            },
        }
    }
}

/// Options of one side of a sync.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Root directory for batch part files.
    pub batch_directory: PathBuf,
    /// Maximum rows per batch part; 0 means unbounded.
    pub batch_size: usize,
    /// Local serializer key.
    pub serializer_key: String,
    /// Scope-info table name.
    pub scope_info_table: String,
    /// Conflict resolution policy.
    pub conflict_resolution: ConflictResolution,
    /// Whether batch directories are removed once consumed.
    pub cleanup_batches: bool,
}

impl SyncOptions {
    /// Creates options writing batches under `batch_directory`.
    pub fn new(batch_directory: impl Into<PathBuf>) -> Self {
        Self {
            batch_directory: batch_directory.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            serializer_key: JSON_SERIALIZER_KEY.to_string(),
            scope_info_table: DEFAULT_SCOPE_INFO_TABLE.to_string(),
            conflict_resolution: ConflictResolution::default(),
            cleanup_batches: true,
        }
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the serializer key.
    pub fn with_serializer_key(mut self, key: impl Into<String>) -> Self {
        self.serializer_key = key.into();
        self
    }

    /// Sets the scope-info table name.
    pub fn with_scope_info_table(mut self, table: impl Into<String>) -> Self {
        self.scope_info_table = table.into();
        self
    }

    /// Sets the conflict resolution policy.
    pub fn with_conflict_resolution(mut self, resolution: ConflictResolution) -> Self {
        self.conflict_resolution = resolution;
        self
    }

    /// Keeps batch directories after use.
    pub fn with_cleanup_batches(mut self, cleanup: bool) -> Self {
        self.cleanup_batches = cleanup;
        self
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("rowsync"))
    }
}

/// Options of the HTTP request handler.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// Service URI every step is posted to.
    pub base_uri: String,
    /// Scope filter parameters, appended to the query string.
    pub scope_parameters: Vec<ScopeParameter>,
    /// Extra headers; never override protocol headers.
    pub custom_headers: Vec<(String, String)>,
    /// Converter key sent to the server, if any.
    pub converter: Option<String>,
    /// Retry configuration of the HTTP send.
    pub retry: RetryConfig,
    /// Request timeout.
    pub timeout: Duration,
}

impl HttpOptions {
    /// Creates options for a service URI.
    pub fn new(base_uri: impl Into<String>) -> Self {
        Self {
            base_uri: base_uri.into(),
            scope_parameters: Vec::new(),
            custom_headers: Vec::new(),
            converter: None,
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Adds a scope parameter.
    pub fn with_scope_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.scope_parameters.push(ScopeParameter::new(name, value));
        self
    }

    /// Adds a custom header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.push((name.into(), value.into()));
        self
    }

    /// Sets the converter key.
    pub fn with_converter(mut self, key: impl Into<String>) -> Self {
        self.converter = Some(key.into());
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self::new("http://localhost:5000/sync")
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% on top.
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
