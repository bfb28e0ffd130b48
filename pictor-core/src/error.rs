use thiserror::Error;

/// Unified error type for Pictor.
///
/// Every variant carries a stable machine code and an HTTP status so the
/// server layer can render the JSON error envelope without inspecting
/// variant internals. The type is `Clone` because a single upstream failure
/// is shared verbatim with every coalesced follower of a cache miss.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PictorError {
    #[error("Missing url parameter")]
    MissingUrl,

    #[error("URL exceeds the maximum allowed length")]
    UrlTooLong,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Only https URLs are allowed")]
    HttpsRequired,

    #[error("URL must not embed credentials")]
    CredentialsInUrl,

    #[error("Host resolves to a private or internal address: {0}")]
    PrivateHost(String),

    #[error("Domain not allowed: {0}")]
    DomainNotAllowed(String),

    #[error("Missing required parameter: {0}")]
    MissingParams(String),

    #[error("Invalid parameter: {0}")]
    InvalidParams(String),

    #[error("Upstream returned status {status}")]
    Upstream { status: u16 },

    #[error("Upstream returned non-image content type: {0}")]
    InvalidContentType(String),

    #[error("Image exceeds the maximum allowed size")]
    ImageTooLarge,

    #[error("Upstream returned an empty body")]
    EmptyBody,

    #[error("Redirect without a usable Location header")]
    InvalidRedirect,

    #[error("Redirect target blocked: {0}")]
    RedirectBlocked(String),

    #[error("Too many redirects")]
    TooManyRedirects,

    #[error("Upstream fetch timed out")]
    UpstreamTimeout,

    #[error("Upstream fetch failed: {0}")]
    FetchFailed(String),

    #[error("Image is not cached; prime the cache via /api/v1/proxy with a signed upstream URL")]
    ImageNotCached,

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid or missing API key")]
    Unauthorized,

    #[error("Not found")]
    NotFound,

    #[error("Cache purge failed: {0}")]
    PurgeFailed(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal: {0}")]
    Internal(String),
}

impl PictorError {
    /// Map to HTTP status code.
    pub fn status_code(&self) -> u16 {
        match self {
            PictorError::MissingUrl
            | PictorError::UrlTooLong
            | PictorError::InvalidUrl(_)
            | PictorError::HttpsRequired
            | PictorError::CredentialsInUrl
            | PictorError::MissingParams(_)
            | PictorError::InvalidParams(_)
            | PictorError::InvalidContentType(_) => 400,
            PictorError::Unauthorized => 401,
            PictorError::PrivateHost(_)
            | PictorError::DomainNotAllowed(_)
            | PictorError::RedirectBlocked(_) => 403,
            PictorError::ImageNotCached | PictorError::NotFound => 404,
            PictorError::ImageTooLarge => 413,
            PictorError::RateLimitExceeded => 429,
            // Upstream status is relayed as-is; 403 has already been remapped
            // to 502 at the fetch layer so auth details never leak through.
            PictorError::Upstream { status } => *status,
            PictorError::NotImplemented(_) => 501,
            PictorError::EmptyBody
            | PictorError::InvalidRedirect
            | PictorError::TooManyRedirects
            | PictorError::FetchFailed(_) => 502,
            PictorError::UpstreamTimeout => 504,
            PictorError::PurgeFailed(_) | PictorError::Storage(_) | PictorError::Internal(_) => 500,
        }
    }

    /// Stable machine code for the JSON error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            PictorError::MissingUrl => "MISSING_URL",
            PictorError::UrlTooLong => "URL_TOO_LONG",
            PictorError::InvalidUrl(_) => "INVALID_URL",
            PictorError::HttpsRequired => "HTTPS_REQUIRED",
            PictorError::CredentialsInUrl => "CREDENTIALS_IN_URL",
            PictorError::PrivateHost(_) => "PRIVATE_HOST",
            PictorError::DomainNotAllowed(_) => "DOMAIN_NOT_ALLOWED",
            PictorError::MissingParams(_) => "MISSING_PARAMS",
            PictorError::InvalidParams(_) => "INVALID_PARAMS",
            PictorError::Upstream { .. } => "UPSTREAM_ERROR",
            PictorError::InvalidContentType(_) => "INVALID_CONTENT_TYPE",
            PictorError::ImageTooLarge => "IMAGE_TOO_LARGE",
            PictorError::EmptyBody => "EMPTY_BODY",
            PictorError::InvalidRedirect => "INVALID_REDIRECT",
            PictorError::RedirectBlocked(_) => "REDIRECT_BLOCKED",
            PictorError::TooManyRedirects => "TOO_MANY_REDIRECTS",
            PictorError::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            PictorError::FetchFailed(_) => "FETCH_FAILED",
            PictorError::ImageNotCached => "IMAGE_NOT_CACHED",
            PictorError::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            PictorError::Unauthorized => "UNAUTHORIZED",
            PictorError::NotFound => "NOT_FOUND",
            PictorError::PurgeFailed(_) => "PURGE_FAILED",
            PictorError::NotImplemented(_) => "NOT_IMPLEMENTED",
            PictorError::Storage(_) | PictorError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the user-facing message must be replaced with a generic
    /// string. Internal details never leave the process on 5xx.
    pub fn scrub_message(&self) -> bool {
        matches!(self, PictorError::Storage(_) | PictorError::Internal(_))
    }
}
