//! Desktop notifications for incoming messages.

use lanpost_core::Notifier;
use tracing::{debug, info, warn};

/// Runs `<command> -- <title> <body>` (e.g. `notify-send`). The child is not awaited.
///
/// The body is peer-controlled text; `--` keeps it from being read as an option.
pub struct DesktopNotifier {
    command: String,
}

impl DesktopNotifier {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, body: &str) {
        match tokio::process::Command::new(&self.command)
            .arg("--")
            .arg(title)
            .arg(body)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .spawn()
        {
            Ok(_child) => debug!(title, "notification raised"),
            Err(e) => warn!(command = %self.command, error = %e, "notification command failed"),
        }
    }
}

/// Notifications as log lines only; used when no command is configured.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) {
        info!(title, body, "notification");
    }
}

/// Pick the notifier for a configured command; empty means log only.
pub fn from_command(command: &str) -> Box<dyn Notifier> {
    match command.trim() {
        "" => Box::new(LogNotifier),
        cmd => Box::new(DesktopNotifier::new(cmd)),
    }
}
