//! Executes server-issued tool calls and answers each exactly once.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
#[cfg(test)]
use mockall::automock;
use tokio::sync::{Semaphore, broadcast, mpsc};
use tokio::task::JoinSet;
use voicelink_types::{Outbound, SessionEvent, ToolCallRequest, ToolCallResponse};

use crate::stats::LinkStats;

/// What the remote agent sees when a handler fails. The real error is only logged.
pub const TOOL_FAILURE_MESSAGE: &str = "Error executing tool";

/// Executes tool calls on behalf of the remote agent.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, name: &str, args: &serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

pub struct ToolBridge {
    handler: Arc<dyn ToolHandler>,
    limiter: Option<Arc<Semaphore>>,
    events: broadcast::Sender<SessionEvent>,
    stats: Arc<LinkStats>,
    tasks: JoinSet<()>,
}

impl ToolBridge {
    pub fn new(
        handler: Arc<dyn ToolHandler>,
        max_in_flight: Option<usize>,
        events: broadcast::Sender<SessionEvent>,
        stats: Arc<LinkStats>,
    ) -> Self {
        Self {
            handler,
            limiter: max_in_flight.map(|n| Arc::new(Semaphore::new(n.max(1)))),
            events,
            stats,
            tasks: JoinSet::new(),
        }
    }

    /// Runs the call on its own task and sends the response on `outbound`.
    pub fn dispatch(&mut self, request: ToolCallRequest, outbound: mpsc::Sender<Outbound>) {
        while self.tasks.try_join_next().is_some() {}

        tracing::info!(tool = request.name(), id = request.id(), "tool call received");
        let _ = self.events.send(SessionEvent::ToolCallStarted {
            id: request.id().to_string(),
            name: request.name().to_string(),
        });

        let handler = self.handler.clone();
        let limiter = self.limiter.clone();
        let events = self.events.clone();
        let stats = self.stats.clone();

        self.tasks.spawn(async move {
            let _permit = match limiter {
                Some(limiter) => limiter.acquire_owned().await.ok(),
                None => None,
            };

            let result = AssertUnwindSafe(async { handler.call(request.name(), request.args()).await })
                .catch_unwind()
                .await;
            let response = match result {
                Ok(Ok(value)) => ToolCallResponse::success(&request, stringify(value)),
                Ok(Err(e)) => {
                    tracing::warn!(tool = request.name(), id = request.id(), "tool failed: {:#}", e);
                    ToolCallResponse::failure(&request, TOOL_FAILURE_MESSAGE)
                }
                Err(_) => {
                    tracing::error!(tool = request.name(), id = request.id(), "tool panicked");
                    ToolCallResponse::failure(&request, TOOL_FAILURE_MESSAGE)
                }
            };

            let ok = !response.is_error();
            stats.tool_call(ok);
            if outbound.send(Outbound::ToolResponse(response)).await.is_err() {
                tracing::debug!(id = request.id(), "channel closed before tool response");
                return;
            }
            let _ = events.send(SessionEvent::ToolCallFinished {
                id: request.id().to_string(),
                name: request.name().to_string(),
                ok,
            });
        });
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Cancels every pending call. No responses are sent for them.
    pub fn abort_all(&mut self) {
        if !self.tasks.is_empty() {
            tracing::debug!("aborting {} pending tool calls", self.tasks.len());
        }
        self.tasks.abort_all();
    }
}

impl Drop for ToolBridge {
    fn drop(&mut self) {
        self.abort_all();
    }
}

fn stringify(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use serde_json::json;
    use std::time::Duration;
    use voicelink_types::ToolOutcome;

    fn bridge(handler: MockToolHandler, cap: Option<usize>) -> (ToolBridge, broadcast::Receiver<SessionEvent>) {
        let (events, rx) = broadcast::channel(16);
        let bridge = ToolBridge::new(
            Arc::new(handler),
            cap,
            events,
            Arc::new(LinkStats::default()),
        );
        (bridge, rx)
    }

    async fn next_response(rx: &mut mpsc::Receiver<Outbound>) -> ToolCallResponse {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(Outbound::ToolResponse(response))) => response,
            other => panic!("expected a tool response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn success_sends_stringified_result() {
        let mut handler = MockToolHandler::new();
        handler
            .expect_call()
            .with(eq("get_time"), eq(json!({"tz": "UTC"})))
            .times(1)
            .returning(|_, _| Ok(json!({"time": "12:00"})));
        let (mut bridge, mut events) = bridge(handler, None);
        let (tx, mut rx) = mpsc::channel(4);

        bridge.dispatch(ToolCallRequest::new("c1", "get_time", json!({"tz": "UTC"})), tx);

        let response = next_response(&mut rx).await;
        assert_eq!(response.id(), "c1");
        assert_eq!(
            response.outcome(),
            &ToolOutcome::Result(r#"{"time":"12:00"}"#.to_string())
        );
        assert!(matches!(events.recv().await.unwrap(), SessionEvent::ToolCallStarted { .. }));
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::ToolCallFinished { ok: true, .. }
        ));
    }

    #[tokio::test]
    async fn failure_sends_exactly_one_generic_error() {
        let mut handler = MockToolHandler::new();
        handler
            .expect_call()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("database unreachable")));
        let (mut bridge, _events) = bridge(handler, None);
        let (tx, mut rx) = mpsc::channel(4);

        bridge.dispatch(ToolCallRequest::new("c2", "lookup", json!({})), tx);

        let response = next_response(&mut rx).await;
        assert_eq!(response.id(), "c2");
        assert_eq!(
            response.outcome(),
            &ToolOutcome::Error(TOOL_FAILURE_MESSAGE.to_string())
        );
        // The sender was moved into the task; the channel closes after one response.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn panicking_handler_still_answers() {
        let mut handler = MockToolHandler::new();
        handler
            .expect_call()
            .returning(|_, _| panic!("handler bug"));
        let (mut bridge, _events) = bridge(handler, None);
        let (tx, mut rx) = mpsc::channel(4);

        bridge.dispatch(ToolCallRequest::new("c3", "lookup", json!(null)), tx);

        let response = next_response(&mut rx).await;
        assert!(response.is_error());
    }

    #[tokio::test]
    async fn string_results_are_not_requoted() {
        let mut handler = MockToolHandler::new();
        handler.expect_call().returning(|_, _| Ok(json!("plain")));
        let (mut bridge, _events) = bridge(handler, Some(1));
        let (tx, mut rx) = mpsc::channel(4);

        bridge.dispatch(ToolCallRequest::new("c4", "echo", json!({})), tx.clone());
        bridge.dispatch(ToolCallRequest::new("c5", "echo", json!({})), tx);

        let mut ids = Vec::new();
        for _ in 0..2 {
            let response = next_response(&mut rx).await;
            assert_eq!(response.outcome(), &ToolOutcome::Result("plain".to_string()));
            ids.push(response.id().to_string());
        }
        ids.sort();
        assert_eq!(ids, vec!["c4", "c5"]);
    }

    #[tokio::test]
    async fn aborted_calls_send_nothing() {
        struct Slow;

        #[async_trait]
        impl ToolHandler for Slow {
            async fn call(&self, _: &str, _: &serde_json::Value) -> anyhow::Result<serde_json::Value> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(json!(null))
            }
        }

        let (events, _rx) = broadcast::channel(16);
        let mut bridge = ToolBridge::new(Arc::new(Slow), None, events, Arc::new(LinkStats::default()));
        let (tx, mut rx) = mpsc::channel(4);

        bridge.dispatch(ToolCallRequest::new("c6", "slow", json!({})), tx);
        assert_eq!(bridge.in_flight(), 1);
        bridge.abort_all();

        assert!(tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().is_none());
    }
}
