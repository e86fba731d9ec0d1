//! Tag keys and span types shared with instrumentation shims.

/// Standard error tags.
pub mod errors {
    /// Type of the recorded error.
    pub const ERROR_TYPE: &str = "error.type";
    /// Human readable error message.
    pub const ERROR_MSG: &str = "error.msg";
    /// Rendered cause chain / backtrace of the error.
    pub const ERROR_STACK: &str = "error.stack";
}

/// HTTP tags and span type.
pub mod http {
    /// Span type for HTTP client and server work.
    pub const TYPE: &str = "http";
    /// Full URL of the request.
    pub const URL: &str = "http.url";
    /// Request method.
    pub const METHOD: &str = "http.method";
    /// Response status code.
    pub const STATUS_CODE: &str = "http.status_code";
}

/// SQL tags and span type.
pub mod sql {
    /// Span type for database work.
    pub const TYPE: &str = "sql";
    /// The query being executed.
    pub const QUERY: &str = "sql.query";
    /// Name of the database.
    pub const DB: &str = "sql.db";
}

/// Span type for inbound web requests.
pub const WEB_TYPE: &str = "web";

/// Span type for cache operations.
pub const CACHE_TYPE: &str = "cache";
