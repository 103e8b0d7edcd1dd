//! Shared defaults.

/// Config file looked up in the working directory.
pub const CONFIG_FILE: &str = "coordkv.toml";

/// Endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:2379";

/// Time allowed to establish a connection to a store.
pub const DEFAULT_DIAL_TIMEOUT_SECS: u64 = 5;

/// Whole-request timeout for the retrying HTTP client.
pub const HTTP_CLIENT_TIMEOUT_SECS: u64 = 10;

/// Upper bound on the backoff between HTTP retries.
pub const HTTP_MAX_BACKOFF_SECS: u64 = 300;

/// `num_try` above this is almost certainly a mistake.
pub const HTTP_NUM_TRY_WARN_THRESHOLD: usize = 10;
