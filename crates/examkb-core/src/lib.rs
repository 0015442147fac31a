pub mod config;
pub mod error;
pub mod ingest;
pub mod schema;
pub mod source;
pub mod traits;
pub mod types;

pub use error::{Error, ErrorKind, Result};
