//! Diagnostic logging to stderr.
//!
//! Launched ranks learn whether to be verbose only from the configuration
//! broadcast, so the level is reloadable after startup.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, reload, Registry};

/// Handle to adjust the log level after [`init`].
#[derive(Debug, Clone)]
pub struct LogHandle {
    filter: reload::Handle<LevelFilter, Registry>,
}

/// Level used with and without `--verbose`.
pub fn level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    }
}

/// Install the global subscriber. A subscriber installed earlier is kept.
pub fn init(verbose: bool) -> LogHandle {
    let (filter, handle) = reload::Layer::new(level(verbose));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
    if installed.is_err() {
        tracing::debug!("Global subscriber already installed");
    }

    LogHandle { filter: handle }
}

impl LogHandle {
    /// Switch between debug and warning level.
    pub fn set_verbose(&self, verbose: bool) {
        if let Err(err) = self.filter.modify(|filter| *filter = level(verbose)) {
            tracing::debug!("Log level unchanged: {}", err);
        }
    }

    /// Currently active level, if the subscriber is still alive.
    pub fn current(&self) -> Option<LevelFilter> {
        self.filter.clone_current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_verbose() {
        let handle = init(false);
        if handle.current().is_none() {
            // Another test installed the global subscriber first.
            return;
        }
        assert_eq!(handle.current(), Some(LevelFilter::WARN));
        handle.set_verbose(true);
        assert_eq!(handle.current(), Some(LevelFilter::DEBUG));
        handle.set_verbose(false);
        assert_eq!(handle.current(), Some(LevelFilter::WARN));
    }
}
