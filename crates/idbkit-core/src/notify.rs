//! User-facing notices
//!
//! When another context requests a newer version, the connection is closed
//! and the user is told to reload. How that message reaches the user depends
//! on the host: a log line by default, `window.alert` in the browser crate.

use tracing::warn;

use crate::engine::VersionChangeEvent;

/// Delivers version-change notices to the user.
pub trait Notifier {
    fn version_change(&self, database: &str, event: &VersionChangeEvent, notice: &str);
}

/// Emits notices as `tracing` warnings.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn version_change(&self, database: &str, event: &VersionChangeEvent, notice: &str) {
        warn!(
            database,
            old_version = event.old_version,
            new_version = ?event.new_version,
            "{}",
            notice
        );
    }
}

impl<F> Notifier for F
where
    F: Fn(&str, &VersionChangeEvent, &str),
{
    fn version_change(&self, database: &str, event: &VersionChangeEvent, notice: &str) {
        self(database, event, notice)
    }
}
