pub mod errors;
pub mod id;
pub mod sync;

pub use errors::{CollabError, ConsoleError};
pub use id::new_correlation_id;

pub type Result<T> = std::result::Result<T, ConsoleError>;
