pub mod fetch;
pub mod flight;
pub mod optimize;
pub mod pipeline;

pub use fetch::{FetchedImage, Fetcher};
pub use flight::SingleFlight;
pub use optimize::{OptimizeError, OptimizedImage, optimize};
pub use pipeline::{
    CacheTier, Pipeline, PipelineOptions, ProxyRequest, ProxyResponse, RequestMeta,
    UpstreamErrorMode,
};
