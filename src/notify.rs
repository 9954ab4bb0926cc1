//! Notification Module
//!
//! Desktop notification capability behind a single trait. The backend is
//! chosen once at startup and injected into the monitor; the monitor never
//! branches on platform.

use tracing::warn;

const APP_NAME: &str = "FordPass Battery Monitor";
const NOTIFICATION_TIMEOUT_MS: u32 = 10_000;

/// Notification capability
pub trait Notifier: Send + Sync {
    /// Show a notification. Returns true when a native notification was
    /// actually displayed; false tells the caller to fall back to the
    /// console.
    fn notify(&self, title: &str, message: &str) -> bool;
}

/// Native desktop notifications
pub struct DesktopNotifier;

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, message: &str) -> bool {
        match notify_rust::Notification::new()
            .appname(APP_NAME)
            .summary(title)
            .body(message)
            .timeout(notify_rust::Timeout::Milliseconds(NOTIFICATION_TIMEOUT_MS))
            .show()
        {
            Ok(_) => true,
            Err(e) => {
                warn!("Error showing notification: {}", e);
                false
            }
        }
    }
}

/// Notifier for headless sessions; always defers to the console fallback
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, _title: &str, _message: &str) -> bool {
        false
    }
}
