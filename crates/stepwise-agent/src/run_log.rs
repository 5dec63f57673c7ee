use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use stepwise_core::event::EventBus;
use stepwise_core::types::GraphEvent;

/// JSONL run logger.
///
/// Subscribes to the EventBus on construction and appends one JSON object per
/// graph event to `{log_dir}/{timestamp}.jsonl`. Lines are flushed as they are
/// written.
pub struct RunLogger {
    log_dir: PathBuf,
    rx: broadcast::Receiver<GraphEvent>,
    /// run_id -> tag from `RunStarted`, dropped when the run ends.
    tags: HashMap<String, String>,
}

/// A single log entry written to the JSONL file.
#[derive(Debug, Serialize)]
struct LogEntry {
    timestamp: String,
    run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl RunLogger {
    /// Every event published on `event_bus` after this call is logged.
    pub fn new(log_dir: PathBuf, event_bus: &EventBus) -> Self {
        Self {
            log_dir,
            rx: event_bus.subscribe(),
            tags: HashMap::new(),
        }
    }

    /// Run the logger as a background task until cancelled or the bus closes.
    ///
    /// Events already queued when `cancel` fires are still written.
    /// Returns the path of the file written, if one was opened.
    pub async fn run(mut self, cancel: CancellationToken) -> Option<PathBuf> {
        if let Err(e) = tokio::fs::create_dir_all(&self.log_dir).await {
            error!(error = %e, "Failed to create log directory");
            return None;
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_path = self.log_dir.join(format!("{}.jsonl", timestamp));

        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open log file");
                return None;
            }
        };

        info!(path = %log_path.display(), "RunLogger started");
        let mut writer = tokio::io::BufWriter::new(file);

        loop {
            tokio::select! {
                biased;
                result = self.rx.recv() => {
                    match result {
                        Ok(event) => {
                            if let Err(e) = self.write_event(&mut writer, &event).await {
                                error!(error = %e, "Failed to write log entry");
                                break;
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            debug!(skipped = n, "RunLogger lagged, skipped events");
                        }
                        Err(RecvError::Closed) => {
                            debug!("EventBus closed, RunLogger stopping");
                            break;
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    debug!("RunLogger cancelled");
                    break;
                }
            }
        }

        // Drain whatever was published before the stop.
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if let Err(e) = self.write_event(&mut writer, &event).await {
                        error!(error = %e, "Failed to write log entry");
                        break;
                    }
                }
                Err(TryRecvError::Lagged(n)) => {
                    debug!(skipped = n, "RunLogger lagged, skipped events");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        writer.flush().await.ok();
        debug!(path = %log_path.display(), "RunLogger finished");
        Some(log_path)
    }

    async fn write_event(
        &mut self,
        writer: &mut tokio::io::BufWriter<tokio::fs::File>,
        event: &GraphEvent,
    ) -> std::io::Result<()> {
        let entry = self.event_to_entry(event);
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await
    }

    fn event_to_entry(&mut self, event: &GraphEvent) -> LogEntry {
        let run_id = event.run_id().to_string();
        let (event_type, detail) = match event {
            GraphEvent::RunStarted { tag, .. } => {
                if let Some(tag) = tag {
                    self.tags.insert(run_id.clone(), tag.clone());
                }
                ("run_started", None)
            }
            GraphEvent::StepCompleted {
                node,
                visit,
                elapsed_ms,
                ..
            } => (
                "step_completed",
                Some(serde_json::json!({
                    "node": node,
                    "visit": visit,
                    "elapsed_ms": elapsed_ms,
                })),
            ),
            GraphEvent::RunCompleted {
                terminal,
                steps,
                elapsed_ms,
                ..
            } => (
                "run_completed",
                Some(serde_json::json!({
                    "terminal": terminal,
                    "steps": steps,
                    "elapsed_ms": elapsed_ms,
                })),
            ),
            GraphEvent::RunFailed { error, .. } => {
                ("run_failed", Some(serde_json::json!({ "error": error })))
            }
        };

        let session_id = match event {
            GraphEvent::RunCompleted { .. } | GraphEvent::RunFailed { .. } => {
                self.tags.remove(&run_id)
            }
            _ => self.tags.get(&run_id).cloned(),
        };

        LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            run_id,
            session_id,
            event_type,
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_tag_follows_run() {
        let bus = EventBus::default();
        let mut logger = RunLogger::new(PathBuf::from("unused"), &bus);
        let started = logger.event_to_entry(&GraphEvent::RunStarted {
            run_id: "r1".into(),
            tag: Some("alice".into()),
        });
        assert_eq!(started.session_id.as_deref(), Some("alice"));

        let step = logger.event_to_entry(&GraphEvent::StepCompleted {
            run_id: "r1".into(),
            node: "model".into(),
            visit: 1,
            elapsed_ms: 3,
        });
        assert_eq!(step.session_id.as_deref(), Some("alice"));
        assert_eq!(step.detail.unwrap()["node"], "model");

        let done = logger.event_to_entry(&GraphEvent::RunCompleted {
            run_id: "r1".into(),
            terminal: "end".into(),
            steps: 1,
            elapsed_ms: 4,
        });
        assert_eq!(done.event_type, "run_completed");
        assert_eq!(done.session_id.as_deref(), Some("alice"));
        assert!(logger.tags.is_empty());
    }

    fn read_lines(path: PathBuf) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_writes_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(EventBus::default());
        let cancel = CancellationToken::new();

        let logger = RunLogger::new(dir.path().to_path_buf(), &bus);
        let handle = tokio::spawn(logger.run(cancel.clone()));

        bus.publish(GraphEvent::RunStarted {
            run_id: "r1".into(),
            tag: None,
        });
        bus.publish(GraphEvent::RunFailed {
            run_id: "r1".into(),
            error: "boom".into(),
        });
        cancel.cancel();

        let lines = read_lines(handle.await.unwrap().unwrap());
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event_type"], "run_started");
        assert!(lines[0].get("session_id").is_none());
        assert_eq!(lines[1]["detail"]["error"], "boom");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_keeps_queued_events() {
        for round in 0..20 {
            let dir = tempfile::tempdir().unwrap();
            let bus = Arc::new(EventBus::default());
            let cancel = CancellationToken::new();

            let logger = RunLogger::new(dir.path().to_path_buf(), &bus);
            let handle = tokio::spawn(logger.run(cancel.clone()));

            let run_id = format!("r{}", round);
            bus.publish(GraphEvent::RunStarted {
                run_id: run_id.clone(),
                tag: Some("s".into()),
            });
            bus.publish(GraphEvent::RunCompleted {
                run_id: run_id.clone(),
                terminal: "end".into(),
                steps: 1,
                elapsed_ms: 1,
            });
            cancel.cancel();

            let lines = read_lines(handle.await.unwrap().unwrap());
            assert_eq!(lines.len(), 2, "round {}", round);
            assert_eq!(lines[1]["event_type"], "run_completed");
            assert_eq!(lines[1]["session_id"], "s");
        }
    }
}
