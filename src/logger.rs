//! log4rs setup for the binary. The library itself only uses the `log` facade.

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::rolling_file::policy::compound::{
    CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
};
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::Path;

const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}";
const ROLL_SIZE: u64 = 10 * 1024 * 1024;
const KEEP: u32 = 7;

#[must_use]
pub fn parse_level(level: Option<&str>) -> LevelFilter {
    match level.unwrap_or("warn").to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Warn,
    }
}

/// Route diagnostics to stderr and, when `dir` is given, to a rolled `bookshelf.log` in it.
///
/// Store-native error text goes through the `bookshelf::store` target, which is always kept
/// at `error` or finer so failures stay visible even at the default `warn` level.
///
/// # Errors
/// Returns an error if the log directory or appenders cannot be created. Calling this a
/// second time in one process is ignored.
pub fn configure_logging(dir: Option<&Path>, level: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let lvl = parse_level(level);
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("[{l}] {t} - {m}{n}")))
        .build();
    let mut builder = Config::builder().appender(Appender::builder().build("stderr", Box::new(stderr)));
    let mut root = Root::builder().appender("stderr");
    let mut store_logger = Logger::builder().appender("stderr");

    if let Some(dir) = dir {
        std::fs::create_dir_all(dir)?;
        let roller =
            FixedWindowRoller::builder().build(&format!("{}", dir.join("bookshelf.{}.log").display()), KEEP)?;
        let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(ROLL_SIZE)), Box::new(roller));
        let file = RollingFileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(PATTERN)))
            .build(dir.join("bookshelf.log"), Box::new(policy))?;
        builder = builder.appender(Appender::builder().build("file", Box::new(file)));
        root = root.appender("file");
        store_logger = store_logger.appender("file");
    }

    let store_level = if lvl < LevelFilter::Error { LevelFilter::Error } else { lvl };
    let config = builder
        .logger(store_logger.additive(false).build("bookshelf::store", store_level))
        .build(root.build(lvl))?;
    // Already initialised.
    let _ = log4rs::init_config(config);
    Ok(())
}

/// Configure from `BOOKSHELF_LOG_DIR` and `BOOKSHELF_LOG_LEVEL`.
///
/// # Errors
/// See [`configure_logging`].
pub fn configure_from_env() -> Result<(), Box<dyn std::error::Error>> {
    let dir = std::env::var("BOOKSHELF_LOG_DIR").ok().map(std::path::PathBuf::from);
    let level = std::env::var("BOOKSHELF_LOG_LEVEL").ok();
    configure_logging(dir.as_deref(), level.as_deref())
}
