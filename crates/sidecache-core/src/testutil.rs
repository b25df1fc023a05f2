//! Test doubles shared across unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::fetch::{Fetch, FetchOptions};
use crate::http::{Request, Response};
use crate::notify::{NotificationRecord, NotificationSink};

/// Scripted fetcher recording every call.
///
/// Unscripted URLs answer 200 with a body echoing the URL, so tests only
/// script the interesting cases.
#[derive(Default)]
pub struct FakeFetch {
    responses: Mutex<HashMap<String, Response>>,
    failing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    offline: AtomicBool,
    calls: Mutex<Vec<(Request, FetchOptions)>>,
}

impl FakeFetch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with a fixed response.
    pub fn respond_with(&self, url: &str, response: Response) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    /// Make `url` fail with a connection error.
    pub fn fail_url(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    /// Undo `fail_url`.
    pub fn heal_url(&self, url: &str) {
        self.failing.lock().unwrap().remove(url);
    }

    /// Make `url` never resolve; pair with paused-time tests.
    pub fn hang_url(&self, url: &str) {
        self.hanging.lock().unwrap().insert(url.to_string());
    }

    /// Fail every request until `go_online`.
    pub fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    pub fn go_online(&self) {
        self.offline.store(false, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(Request, FetchOptions)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(request, _)| request.url == url)
            .count()
    }
}

#[async_trait]
impl Fetch for FakeFetch {
    async fn fetch(
        &self,
        request: &Request,
        options: &FetchOptions,
    ) -> Result<Response, FetchError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.clone(), options.clone()));

        if self.hanging.lock().unwrap().contains(&request.url) {
            std::future::pending::<()>().await;
        }
        if self.offline.load(Ordering::SeqCst)
            || self.failing.lock().unwrap().contains(&request.url)
        {
            return Err(FetchError::Connect(format!("unreachable: {}", request.url)));
        }
        if let Some(response) = self.responses.lock().unwrap().get(&request.url) {
            return Ok(response.clone());
        }
        Ok(Response::new(200)
            .with_header("content-type", "text/plain")
            .with_body(format!("body of {}", request.url)))
    }
}

/// Sink that keeps every rendered notification for assertions.
#[derive(Default)]
pub struct RecordingSink {
    shown: Mutex<Vec<NotificationRecord>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self) -> Vec<NotificationRecord> {
        self.shown.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingSink {
    fn render(&self, record: &NotificationRecord) {
        self.shown.lock().unwrap().push(record.clone());
    }
}

/// Poll `condition` until it holds, failing the test after ~2 seconds. Used
/// to observe fire-and-forget store writes without racing them.
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
