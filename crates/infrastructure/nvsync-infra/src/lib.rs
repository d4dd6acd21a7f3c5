pub mod memory;
pub mod net;
pub mod s3;
pub mod store;
pub mod throttle;

// Re-exports for convenience
pub use memory::MemoryObjectStore;
pub use net::default_http_client;
pub use s3::{S3ObjectStore, S3Settings};
pub use store::{BucketInfo, ByteStream, ObjectInfo, ObjectStore, ObjectStream, StoreError};
pub use throttle::Throttle;
