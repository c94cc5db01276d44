#![forbid(unsafe_code)]

pub mod btree;
pub mod buffer;
pub mod config;
pub mod errors;
pub mod fsutil;
pub mod key;
pub mod logger;
pub mod snapshot;
pub mod store;
pub mod utils;

pub use config::StoreConfig;
pub use errors::{KvError, KvResult};
pub use key::{Key, Value, key_from_str, value_from_str};
pub use store::Store;

/// Initialize logging with the crate's default file-appender setup, rooted
/// at the given store path's parent directory.
///
/// # Errors
/// Returns an error if the logger cannot be initialized.
pub fn init_logging(store_path: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    let base = store_path.parent().unwrap_or_else(|| std::path::Path::new("."));
    let stem = store_path.file_name().and_then(|s| s.to_str()).unwrap_or("simplekv");
    let log_dir = base.join(format!("{stem}_logs"));
    logger::init_default_in(&log_dir, stem)?;
    Ok(())
}
