//! Alert fan-out to viewers and the notification sink.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use clawterm_core::Alert;

use super::NotificationSink;
use crate::bridge::BridgeController;

/// Forward every accepted alert to all viewers, and notifying categories to
/// `sink`. Runs until the alert stream closes.
pub async fn run_alert_fanout(
    mut alerts: broadcast::Receiver<Alert>,
    bridge: BridgeController,
    sink: Arc<dyn NotificationSink>,
) {
    loop {
        let alert = match alerts.recv().await {
            Ok(alert) => alert,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Alert fan-out fell behind, alerts skipped");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let viewers = bridge.broadcast_alert(alert.clone()).await;
        debug!(category = %alert.category, viewers, "Alert sent to viewers");

        if alert.category.notifies() {
            let sink = Arc::clone(&sink);
            let text = alert.notification_text();
            // Slow delivery must not hold up later alerts.
            tokio::spawn(async move {
                match sink.send(&text).await {
                    Ok(true) => info!(message = %text, "Notification delivered"),
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "Notification delivery failed"),
                }
            });
        }
    }
    debug!("Alert stream closed, fan-out stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use clawterm_core::{AlertCategory, DeviceClass, ServerMessage};

    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::bridge::{BridgeConfig, CLIENT_QUEUE_CAPACITY, ClientEvent};
    use crate::notify::NotifyError;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        fn is_enabled(&self) -> bool {
            true
        }

        async fn send(&self, message: &str) -> Result<bool, NotifyError> {
            self.sent.lock().unwrap().push(message.to_string());
            Ok(true)
        }
    }

    #[tokio::test]
    async fn alerts_reach_viewers_and_notifying_categories_reach_sink() {
        let bridge = BridgeController::new(
            Arc::new(FakeBackend::new("test")),
            BridgeConfig::default(),
        );
        let (tx, mut rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        bridge.add_client(tx, DeviceClass::Primary).await;
        // Geometry sent on join.
        rx.recv().await.unwrap();

        let sink = Arc::new(RecordingSink::default());
        let (alert_tx, alert_rx) = broadcast::channel(8);
        let task = tokio::spawn(run_alert_fanout(alert_rx, bridge.clone(), sink.clone()));

        alert_tx.send(Alert::new(AlertCategory::Completion, "Done")).unwrap();
        alert_tx.send(Alert::new(AlertCategory::Error, "fatal:")).unwrap();
        drop(alert_tx);
        task.await.unwrap();

        for expected in [AlertCategory::Completion, AlertCategory::Error] {
            match rx.recv().await.unwrap() {
                ClientEvent::Message(ServerMessage::Alert(alert)) => {
                    assert_eq!(alert.category, expected);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }

        // Delivery runs on its own task.
        for _ in 0..50 {
            if !sink.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*sink.sent.lock().unwrap(), vec!["[ERROR] fatal:".to_string()]);
    }
}
