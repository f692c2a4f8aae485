//! Logger setup for embedders and test binaries

/// Map `-v` count and quiet flag to a level
pub fn level_for(verbose: u8, quiet: bool) -> log::LevelFilter {
    if quiet {
        return log::LevelFilter::Error;
    }
    match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

/// Install `env_logger` at the level for `verbose`/`quiet`
///
/// Returns false if a logger was already installed.
pub fn init_logging(verbose: u8, quiet: bool) -> bool {
    env_logger::Builder::new()
        .filter_level(level_for(verbose, quiet))
        .format_timestamp(None)
        .try_init()
        .is_ok()
}
