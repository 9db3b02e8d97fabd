//! Browser notices

use idbkit_core::{Notifier, VersionChangeEvent};
use tracing::warn;

/// Shows version-change notices with `window.alert`.
///
/// Outside a window (e.g. in a worker) the notice is only logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlertNotifier;

impl Notifier for AlertNotifier {
    fn version_change(&self, database: &str, event: &VersionChangeEvent, notice: &str) {
        warn!(
            database,
            old_version = event.old_version,
            new_version = ?event.new_version,
            "connection closed for version change"
        );
        if let Some(window) = web_sys::window() {
            let _ = window.alert_with_message(notice);
        }
    }
}
