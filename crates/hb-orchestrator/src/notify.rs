//! Log records and user notification

use std::io::Write;

use hb_core::traits::UserNotifier;
use hb_protocol::{LogEvent, Severity};

/// Write a worker's log record to the log and, if asked to, interrupt the user
pub fn handle_log(event: &LogEvent, notifier: &dyn UserNotifier) {
    match event.severity {
        Severity::Error => tracing::error!("{}", event.message),
        Severity::Warning => tracing::warn!("{}", event.message),
        Severity::Info => tracing::info!("{}", event.message),
        Severity::Debug => tracing::debug!("{}", event.message),
    }

    if event.inform_user {
        let title = event.severity.to_string();
        let text = format!("{}: {}", title, event.message);
        notifier.notify(event.severity, &title, &text);
    }
}

/// Notifier printing to standard error, for headless use
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrNotifier;

impl UserNotifier for StderrNotifier {
    fn notify(&self, _severity: Severity, title: &str, text: &str) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "[{}] {}", title, text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(Severity, String, String)>>);

    impl UserNotifier for Recorder {
        fn notify(&self, severity: Severity, title: &str, text: &str) {
            self.0
                .lock()
                .unwrap()
                .push((severity, title.to_string(), text.to_string()));
        }
    }

    #[test]
    fn test_informing_event_reaches_user() {
        let recorder = Recorder::default();
        handle_log(
            &LogEvent::informing(Severity::Error, "Cannot connect"),
            &recorder,
        );

        let seen = recorder.0.lock().unwrap();
        assert_eq!(
            *seen,
            vec![(
                Severity::Error,
                "Error".to_string(),
                "Error: Cannot connect".to_string()
            )]
        );
    }

    #[test]
    fn test_plain_event_stays_in_log() {
        let recorder = Recorder::default();
        handle_log(&LogEvent::new(Severity::Info, "Connecting"), &recorder);
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_notifications_keep_order() {
        let recorder = Recorder::default();
        handle_log(&LogEvent::informing(Severity::Warning, "first"), &recorder);
        handle_log(&LogEvent::informing(Severity::Info, "second"), &recorder);

        let texts: Vec<String> = recorder
            .0
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, text)| text.clone())
            .collect();
        assert_eq!(texts, vec!["Warning: first", "Info: second"]);
    }
}
