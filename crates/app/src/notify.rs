//! Detection event notifications.
//!
//! Events arrive from the decision engine on sample-clock time; the sink
//! stamps them with the device identity and wall-clock time and emits one
//! JSON line per event, to stdout and optionally to an append-only file.

use chrono::{DateTime, Utc};
use serde::Serialize;
use soundwatch_detect::DetectionEvent;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Wire form of one notification.
#[derive(Debug, Serialize)]
pub struct EventNotification<'a> {
    pub device_id: &'a str,
    /// Wall-clock time the notification was assembled, RFC 3339.
    pub wall_time: DateTime<Utc>,
    #[serde(flatten)]
    pub event: &'a DetectionEvent,
}

/// Serialize one event as a notification JSON line.
pub fn notification_line(device_id: &str, event: &DetectionEvent) -> serde_json::Result<String> {
    serde_json::to_string(&EventNotification {
        device_id,
        wall_time: Utc::now(),
        event,
    })
}

fn open_events_file(path: &PathBuf) -> Option<File> {
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot open events file, continuing without it");
            None
        }
    }
}

/// Consume detection events until the channel closes.
pub fn spawn_event_sink(
    mut rx: mpsc::Receiver<DetectionEvent>,
    device_id: String,
    events_file: Option<PathBuf>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut file = events_file.as_ref().and_then(open_events_file);
        while let Some(event) = rx.recv().await {
            info!(
                sequence = event.sequence,
                class = %event.class,
                start_ms = event.start_ms,
                duration_ms = event.duration_ms,
                confidence = event.confidence,
                "detection event"
            );
            let line = match notification_line(&device_id, &event) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "failed to serialize event");
                    continue;
                }
            };
            println!("{line}");
            if let Some(f) = file.as_mut() {
                if let Err(e) = writeln!(f, "{line}") {
                    warn!(error = %e, "events file write failed, closing it");
                    file = None;
                }
            }
        }
    })
}
