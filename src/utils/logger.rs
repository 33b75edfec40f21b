//! Logger initialization. `blite` never calls `log::*` until a host
//! application configures an appender; these helpers make that convenient but
//! are entirely optional — the crate works with the default no-op logger.

use log::LevelFilter;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::rolling_file::policy::compound::{
    CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::fs;
use std::path::{Path, PathBuf};

const ROLL_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const ROLL_COUNT: u32 = 7;
const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}";

/// Initializes logging from a `log4rs.yaml` file in the working directory, if
/// present. Silently does nothing if the file is missing or invalid.
pub fn init() {
    let _ = log4rs::init_file("log4rs.yaml", log4rs::config::Deserializers::default());
}

/// Initializes logging from an explicit config file path.
///
/// # Errors
/// Returns an error if the file cannot be parsed as a `log4rs` config.
pub fn init_path(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    log4rs::init_file(path, log4rs::config::Deserializers::default())?;
    Ok(())
}

/// Initializes a rolling file appender at `{base}/{db_name}_logs/{db_name}.log`,
/// rolling every 10 MiB and keeping 7 generations, at `Info` level.
///
/// # Errors
/// Returns an error if the log directory cannot be created or the appender
/// fails to build.
pub fn init_for_db_in(base_dir: &Path, db_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut dir = PathBuf::from(base_dir);
    dir.push(format!("{db_name}_logs"));
    fs::create_dir_all(&dir)?;

    let log_path = dir.join(format!("{db_name}.log"));
    let roller_pattern = dir.join(format!("{db_name}.{{}}.log"));
    let roller = FixedWindowRoller::builder()
        .build(&roller_pattern.display().to_string(), ROLL_COUNT)?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(ROLL_SIZE_BYTES)), Box::new(roller));
    let appender = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build(log_path, Box::new(policy))?;

    let config = Config::builder()
        .appender(Appender::builder().build("file", Box::new(appender)))
        .build(Root::builder().appender("file").build(LevelFilter::Info))?;
    log4rs::init_config(config)?;
    Ok(())
}

/// Configures logging from `BLITE_LOG_DIR`/`BLITE_LOG_LEVEL` if either is set;
/// otherwise does nothing, leaving the default no-op logger in place.
pub fn configure_from_env() {
    let Ok(dir) = std::env::var("BLITE_LOG_DIR") else { return };
    let level = std::env::var("BLITE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let lvl = match level.to_ascii_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };
    let _ = init_for_db_in(Path::new(&dir), "blite").map(|()| {
        log::set_max_level(lvl);
    });
}
