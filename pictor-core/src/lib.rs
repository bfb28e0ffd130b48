pub mod cache_key;
pub mod config;
pub mod error;
pub mod options;
pub mod upstream;
pub mod validate;

pub use config::PictorConfig;
pub use error::PictorError;
pub use options::{FitMode, ImageFormat, TransformOptions};
pub use upstream::ParsedUpstreamUrl;
pub use validate::HostAllowlist;
