pub mod access_log;
pub mod api_key;
pub mod rate_limit;
pub mod request_id;
pub mod security_headers;
