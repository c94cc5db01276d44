//! Logging setup. Mirrors the common log4rs-from-a-config-file pattern, with
//! a sane file-appender default for embedders that don't ship their own
//! `log4rs.yaml`.

use log::LevelFilter;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::Path;

/// Initialize logging from a `log4rs` YAML config file.
///
/// # Errors
/// Returns an error if the file is missing or malformed.
pub fn init_file(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    log4rs::init_file(path, Default::default())?;
    Ok(())
}

/// Initialize a single rolling-less file appender at `{base}/{stem}.log`,
/// creating `base` if it does not exist. Intended for embedders who never
/// configured log4rs themselves.
///
/// # Errors
/// Returns an error if the log directory or file cannot be created.
pub fn init_default_in(base: &Path, stem: &str) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(base)?;
    let logfile = base.join(format!("{stem}.log"));
    let encoder = Box::new(PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}"));
    let appender = FileAppender::builder().encoder(encoder).build(logfile)?;
    let config = Config::builder()
        .appender(Appender::builder().build("file", Box::new(appender)))
        .build(Root::builder().appender("file").build(LevelFilter::Info))?;
    log4rs::init_config(config)?;
    Ok(())
}
