//! Process-wide logging setup.

use tracing_subscriber::EnvFilter;

/// How verbose the process logs are. `RUST_LOG` still wins when set.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogConfig {
    pub debug: bool,
}

impl LogConfig {
    fn default_directive(&self) -> &'static str {
        if self.debug { "debug" } else { "info" }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.default_directive()))
    }

    /// Installs the global subscriber. Logs go to stderr so they never mix
    /// with console output relayed on stdout.
    pub fn init(self) {
        tracing_subscriber::fmt()
            .with_env_filter(self.filter())
            .with_writer(std::io::stderr)
            .with_target(self.debug)
            .init();
    }
}
