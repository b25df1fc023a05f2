//! Push notifications and their interactions.
//!
//! Push payloads arrive as opaque bytes; malformed ones still surface as a
//! notification with fallback text rather than disappearing. Interactions
//! route the user through the client hub, and every interaction is reported
//! best-effort to the analytics endpoint.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clients::ClientHub;
use crate::config::AgentConfig;
use crate::fetch::{Fetch, FetchOptions};
use crate::http::{Method, Request};

/// Tag for payloads that did not bring one.
const DEFAULT_TAG: &str = "general";

/// Tag on queue replay notifications.
const SYNC_TAG: &str = "sync";

/// The one interaction that does not navigate anywhere.
const DISMISS_ACTION: &str = "dismiss";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub title: String,
    pub body: String,
    pub tag: String,
    pub data: NotificationData,
}

/// Wire shape of a push payload. Every field is optional; anything missing
/// is filled with fallbacks.
#[derive(Debug, Default, Deserialize)]
struct PushPayload {
    title: Option<String>,
    body: Option<String>,
    tag: Option<String>,
    url: Option<String>,
}

/// Rendering seam. The daemon logs; a host embedding the agent can hand
/// records to its notification center.
pub trait NotificationSink: Send + Sync {
    fn render(&self, record: &NotificationRecord);
}

/// Sink that renders into the log stream.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn render(&self, record: &NotificationRecord) {
        info!(title = %record.title, body = %record.body, tag = %record.tag, "Notification");
    }
}

pub struct NotificationDispatcher {
    sink: Arc<dyn NotificationSink>,
    hub: Arc<ClientHub>,
    fetcher: Arc<dyn Fetch>,
    config: Arc<AgentConfig>,
}

impl NotificationDispatcher {
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        hub: Arc<ClientHub>,
        fetcher: Arc<dyn Fetch>,
        config: Arc<AgentConfig>,
    ) -> Self {
        Self {
            sink,
            hub,
            fetcher,
            config,
        }
    }

    /// Build a record from a push payload. Malformed payloads degrade to the
    /// configured title and a generic body; a broken payload still notifies.
    pub fn record_from_payload(&self, payload: &[u8]) -> NotificationRecord {
        let parsed: PushPayload = serde_json::from_slice(payload).unwrap_or_else(|e| {
            debug!(error = %e, "Malformed push payload, using fallback text");
            PushPayload::default()
        });
        NotificationRecord {
            title: parsed
                .title
                .unwrap_or_else(|| self.config.notification_title.clone()),
            body: parsed
                .body
                .unwrap_or_else(|| "You have a new notification.".to_string()),
            tag: parsed.tag.unwrap_or_else(|| DEFAULT_TAG.to_string()),
            data: NotificationData {
                url: parsed.url.unwrap_or_else(|| self.config.app_origin.clone()),
                timestamp: Utc::now(),
            },
        }
    }

    /// Parse and show a push payload in one step.
    pub fn show_payload(&self, payload: &[u8]) -> NotificationRecord {
        let record = self.record_from_payload(payload);
        self.show(&record);
        record
    }

    pub fn show(&self, record: &NotificationRecord) {
        self.sink.render(record);
    }

    /// Record announcing a successfully replayed mutation.
    pub fn sync_success(&self, url: &str) -> NotificationRecord {
        NotificationRecord {
            title: "Changes synced".to_string(),
            body: "Your offline changes have been saved.".to_string(),
            tag: SYNC_TAG.to_string(),
            data: NotificationData {
                url: url.to_string(),
                timestamp: Utc::now(),
            },
        }
    }

    /// Handle an interaction with a shown notification. Dismissals stop
    /// here; any other action puts a surface on the record's URL.
    pub fn on_interaction(&self, action: &str, record: &NotificationRecord) {
        self.report_interaction(action, record);
        if action == DISMISS_ACTION {
            return;
        }
        self.hub.focus_or_open(&record.data.url);
    }

    /// Best-effort analytics on its own task; failures are logged and
    /// swallowed, and a slow endpoint never delays the interaction itself.
    fn report_interaction(&self, action: &str, record: &NotificationRecord) {
        let Some(analytics_url) = self.config.analytics_url.clone() else {
            return;
        };
        let payload = serde_json::json!({
            "action": action,
            "tag": record.tag,
            "url": record.data.url,
            "timestamp": record.data.timestamp,
        });
        let fetcher = Arc::clone(&self.fetcher);
        tokio::spawn(async move {
            let request = Request::get(analytics_url)
                .with_method(Method::Post)
                .with_header("content-type", "application/json")
                .with_body(payload.to_string());
            if let Err(e) = fetcher.fetch(&request, &FetchOptions::default()).await {
                debug!(error = %e, "Notification interaction report failed");
            }
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
