//! Diagnostics and raw traffic logging.
//!
//! `init_tracing` installs the process-wide `tracing` subscriber. When
//! traffic logging is enabled, [`TrafficLogger`] writes every line received
//! (`<<`) and sent (`>>`) to daily log files named `<network>_<date>.log` in
//! the configured log directory (default: `~/.local/share/crabirc/logs/`).

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::app::event::Event;
use crate::config::LoggingConfig;
use crate::irc::manager::IrcManager;

/// Install the fmt subscriber. `RUST_LOG` overrides the configured level.
pub fn init_tracing(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Received,
    Sent,
}

impl Direction {
    fn marker(self) -> &'static str {
        match self {
            Direction::Received => "<<",
            Direction::Sent => ">>",
        }
    }
}

/// Writes raw protocol traffic to per-network daily log files.
///
/// File handles are cached for the lifetime of the logger to avoid repeated
/// opens. A file that cannot be opened is skipped with a warning.
pub struct TrafficLogger {
    log_dir: PathBuf,
    file_handles: HashMap<String, fs::File>,
}

impl TrafficLogger {
    pub fn new(config: &LoggingConfig) -> Self {
        Self {
            log_dir: expand_home(&config.log_dir),
            file_handles: HashMap::new(),
        }
    }

    pub fn log_line(&mut self, network: &str, direction: Direction, line: &str) {
        // Sanitize network name for filename
        let safe_network: String = network
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect();

        let now = chrono::Local::now();
        let filename = format!("{}_{}.log", safe_network, now.format("%Y-%m-%d"));

        if !self.file_handles.contains_key(&filename) {
            let _ = fs::create_dir_all(&self.log_dir);
            let filepath = self.log_dir.join(&filename);
            match OpenOptions::new().create(true).append(true).open(&filepath) {
                Ok(file) => {
                    self.file_handles.insert(filename.clone(), file);
                }
                Err(e) => {
                    warn!(path = %filepath.display(), error = %e, "cannot open traffic log");
                    return;
                }
            }
        }
        if let Some(handle) = self.file_handles.get_mut(&filename) {
            let _ = writeln!(
                handle,
                "[{}] {} {}",
                now.format("%H:%M:%S"),
                direction.marker(),
                line
            );
        }
    }

    /// Subscribe a shared logger to the `raw` and `irc-send` events.
    pub fn attach(self, manager: &mut IrcManager) {
        let logger = Arc::new(Mutex::new(self));
        let received = Arc::clone(&logger);
        manager.subscribe("raw", move |network, event| {
            if let (Event::Raw(line), Ok(mut logger)) = (event, received.lock()) {
                logger.log_line(&network.config().name, Direction::Received, line);
            }
        });
        manager.subscribe("irc-send", move |network, event| {
            if let (Event::Sent(line), Ok(mut logger)) = (event, logger.lock()) {
                logger.log_line(&network.config().name, Direction::Sent, line);
            }
        });
    }
}

/// Expand a leading `~` to the home directory.
fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix('~') {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}
