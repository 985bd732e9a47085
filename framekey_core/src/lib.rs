pub mod backoff;
pub mod codec;
pub mod env;
pub mod store;
pub mod wire;

/// A type alias for a boxed error that is thread-safe and sendable across threads.
/// This is commonly used as a return type for functions that can return various error types.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
