//! Timeout racing and the post-action completion heuristic.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use pagehost_core::config::TimingConfig;
use pagehost_core::{Error, Result};
use tokio::sync::mpsc;
use tracing::debug;

use crate::browser::cdp::CdpEvent;
use crate::browser::Page;

pub const REQUEST_EVENTS: &[&str] = &[
    "Network.requestWillBeSent",
    "Network.loadingFinished",
    "Network.loadingFailed",
];

/// Race `fut` against a timer. The future is dropped when the timer wins.
pub async fn with_timeout<T, F>(ms: u64, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(Duration::from_millis(ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(ms, operation)),
    }
}

/// Resource types whose loading can change what the page shows.
pub fn is_page_affecting(resource_type: &str) -> bool {
    matches!(
        resource_type.to_ascii_lowercase().as_str(),
        "document" | "stylesheet" | "script" | "xhr" | "fetch"
    )
}

/// Tracks page-affecting requests started while a window is open and notes
/// when each of them finishes.
#[derive(Debug, Default)]
pub struct RequestTracker {
    tracked: HashSet<String>,
    finished: HashSet<String>,
    closed: bool,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop accepting new requests. Completions are still recorded.
    pub fn close_window(&mut self) {
        self.closed = true;
    }

    pub fn observe(&mut self, event: &CdpEvent) {
        let Some(request_id) = event.params.get("requestId").and_then(|v| v.as_str()) else {
            return;
        };
        match event.method.as_str() {
            "Network.requestWillBeSent" if !self.closed => {
                let resource_type = event.params.get("type").and_then(|v| v.as_str()).unwrap_or("");
                if is_page_affecting(resource_type) {
                    self.tracked.insert(request_id.to_string());
                }
            }
            "Network.loadingFinished" | "Network.loadingFailed" => {
                self.finished.insert(request_id.to_string());
            }
            _ => {}
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    pub fn outstanding(&self) -> usize {
        self.tracked.difference(&self.finished).count()
    }
}

/// Feed `events` into `tracker` until `fut` completes.
///
/// Buffered events are consumed before the future's output is taken, so
/// everything sent before `fut` resolved has been observed.
pub async fn observe_while<T, F>(
    events: &mut mpsc::Receiver<CdpEvent>,
    tracker: &mut RequestTracker,
    fut: F,
) -> T
where
    F: Future<Output = T>,
{
    tokio::pin!(fut);
    loop {
        tokio::select! {
            biased;
            Some(event) = events.recv() => tracker.observe(&event),
            out = &mut fut => return out,
        }
    }
}

/// Run `action`, then wait for the network activity it likely triggered.
///
/// Requests issued during the action and a following settle delay are tracked;
/// if any were page-affecting, wait for them to finish (capped), then settle once
/// more. This bounds the wait, it does not prove the page is done.
pub async fn wait_for_completion<T, F>(page: &Page, timing: &TimingConfig, action: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let mut events = page.subscribe(REQUEST_EVENTS).await;
    let settle = Duration::from_millis(timing.settle_ms);

    // The subscription is drained while the action runs so a burst of
    // requests cannot overflow its buffer.
    let mut tracker = RequestTracker::new();
    let result = observe_while(&mut events, &mut tracker, action).await?;
    observe_while(&mut events, &mut tracker, tokio::time::sleep(settle)).await;
    while let Ok(event) = events.try_recv() {
        tracker.observe(&event);
    }
    tracker.close_window();

    if tracker.tracked_count() == 0 {
        return Ok(result);
    }

    debug!(
        tracked = tracker.tracked_count(),
        outstanding = tracker.outstanding(),
        "Waiting for triggered requests"
    );
    let drain = async {
        while tracker.outstanding() > 0 {
            match events.recv().await {
                Some(event) => tracker.observe(&event),
                None => break,
            }
        }
    };
    if tokio::time::timeout(Duration::from_millis(timing.network_cap_ms), drain)
        .await
        .is_err()
    {
        debug!(cap_ms = timing.network_cap_ms, "Network wait capped");
    }
    tokio::time::sleep(settle).await;

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(method: &str, id: &str, kind: Option<&str>) -> CdpEvent {
        let mut params = json!({ "requestId": id });
        if let Some(k) = kind {
            params["type"] = json!(k);
        }
        CdpEvent {
            method: method.to_string(),
            session_id: Some("S".into()),
            params,
        }
    }

    #[test]
    fn test_page_affecting_filter() {
        for t in ["Document", "Stylesheet", "Script", "XHR", "Fetch", "fetch"] {
            assert!(is_page_affecting(t), "{t}");
        }
        for t in ["Image", "Font", "Media", "WebSocket", "Ping", ""] {
            assert!(!is_page_affecting(t), "{t}");
        }
    }

    #[test]
    fn test_tracker_counts_only_relevant_requests() {
        let mut tracker = RequestTracker::new();
        tracker.observe(&event("Network.requestWillBeSent", "1", Some("XHR")));
        tracker.observe(&event("Network.requestWillBeSent", "2", Some("Image")));
        tracker.observe(&event("Network.requestWillBeSent", "3", Some("Document")));
        assert_eq!(tracker.tracked_count(), 2);
        assert_eq!(tracker.outstanding(), 2);

        tracker.observe(&event("Network.loadingFinished", "1", None));
        tracker.observe(&event("Network.loadingFailed", "2", None));
        assert_eq!(tracker.outstanding(), 1);
        tracker.observe(&event("Network.loadingFailed", "3", None));
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn test_closed_window_ignores_new_requests() {
        let mut tracker = RequestTracker::new();
        tracker.observe(&event("Network.requestWillBeSent", "1", Some("Script")));
        tracker.close_window();
        tracker.observe(&event("Network.requestWillBeSent", "2", Some("Script")));
        assert_eq!(tracker.tracked_count(), 1);
    }

    #[tokio::test]
    async fn test_burst_larger_than_buffer_is_fully_observed() {
        let (tx, mut rx) = mpsc::channel(8);
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        let producer = tokio::spawn(async move {
            for i in 0..300 {
                let e = event("Network.requestWillBeSent", &i.to_string(), Some("XHR"));
                tx.send(e).await.unwrap();
            }
            for i in 0..300 {
                tx.send(event("Network.loadingFinished", &i.to_string(), None)).await.unwrap();
            }
            let _ = done_tx.send(());
        });

        let mut tracker = RequestTracker::new();
        observe_while(&mut rx, &mut tracker, done_rx).await.unwrap();
        producer.await.unwrap();

        assert_eq!(tracker.tracked_count(), 300);
        assert_eq!(tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_observe_while_survives_closed_subscription() {
        let (tx, mut rx) = mpsc::channel::<CdpEvent>(1);
        drop(tx);
        let mut tracker = RequestTracker::new();
        let value = observe_while(&mut rx, &mut tracker, async { 5 }).await;
        assert_eq!(value, 5);
        assert_eq!(tracker.tracked_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let start = tokio::time::Instant::now();
        let err = with_timeout(5000, "fill", std::future::pending::<Result<()>>())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Timeout after 5000ms: fill");
        assert!(start.elapsed() >= Duration::from_millis(5000));
        assert!(start.elapsed() < Duration::from_millis(5100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_passes_through() {
        let value = with_timeout(100, "op", async { Ok::<_, Error>(7) }).await.unwrap();
        assert_eq!(value, 7);
        let err = with_timeout(100, "op", async { Err::<(), _>(Error::Tool("boom".into())) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
