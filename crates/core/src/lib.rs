pub mod compress;
pub mod config;
pub mod error;
pub mod types;

pub use compress::{compress_blob, decompress_blob};
pub use config::AppConfig;
pub use error::CrawlError;
pub use types::*;
