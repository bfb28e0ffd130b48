pub mod edge;
pub mod fs;
pub mod memory;
pub mod metadata;
pub mod redis;
pub mod s3;
pub mod storage;

pub use edge::{EdgeCache, EdgeEntry};
pub use fs::FsStorage;
pub use memory::MemoryEdgeCache;
pub use metadata::ImageMetadata;
pub use self::redis::RedisEdgeCache;
pub use s3::S3Storage;
pub use storage::{StorageBackend, StoredImage};
