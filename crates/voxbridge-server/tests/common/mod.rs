#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use voxbridge_call::{CallConfig, CallError, CallRegistry, Capabilities, SignalingTransport};
use voxbridge_server::engine::RealtimeConnector;
use voxbridge_server::media::SimulatedMedia;
use voxbridge_server::AppState;
use voxbridge_types::{CallId, EndpointId, SessionDescription};

pub const SECRET: &str = "test_secret";

/// Signaling that records every answer and always succeeds.
#[derive(Default)]
pub struct RecordingSignaling {
    pub answers: Mutex<Vec<(EndpointId, CallId, SessionDescription)>>,
}

#[async_trait]
impl SignalingTransport for RecordingSignaling {
    async fn answer(
        &self,
        endpoint_id: &EndpointId,
        call_id: &CallId,
        answer: &SessionDescription,
    ) -> Result<(), CallError> {
        self.answers
            .lock()
            .unwrap()
            .push((endpoint_id.clone(), call_id.clone(), answer.clone()));
        Ok(())
    }
}

pub struct TestServer {
    pub state: Arc<AppState>,
    pub signaling: Arc<RecordingSignaling>,
    pub media: Arc<SimulatedMedia>,
}

impl TestServer {
    pub fn new() -> Self {
        let signaling = Arc::new(RecordingSignaling::default());
        let media = Arc::new(SimulatedMedia::new());
        let capabilities = Capabilities::new(
            signaling.clone(),
            media.clone(),
            Arc::new(RealtimeConnector::new("wss://engine.invalid", "test-key")),
        );
        let config = CallConfig {
            call_timeout_seconds: 60,
            ..CallConfig::default()
        };

        let state = Arc::new(AppState {
            registry: CallRegistry::new(capabilities, config),
            webhook_secret: SECRET.to_string(),
        });

        Self {
            state,
            signaling,
            media,
        }
    }

    pub fn router(&self) -> axum::Router {
        voxbridge_server::app(self.state.clone())
    }
}

pub fn webhook_request(auth: Option<&str>, body: impl Into<Body>) -> Request<Body> {
    let mut builder = Request::builder()
        .uri("/webhook")
        .method("POST")
        .header("content-type", "application/json");
    if let Some(auth) = auth {
        builder = builder.header("authorization", auth);
    }
    builder.body(body.into()).unwrap()
}

pub async fn json_body(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

pub fn call_payload(call_id: &str) -> Value {
    serde_json::json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "changes": [{
                "value": {
                    "call_id": call_id,
                    "sdp": "v=0\r\no=- 123 2 IN IP4 127.0.0.1\r\nm=audio 5004 UDP/TLS/RTP/SAVPF 111\r\n",
                    "event": "call.initiated",
                    "phone_number_id": "phone123",
                    "from": "+1234567890"
                }
            }]
        }]
    })
}

/// Polls `condition` on the tokio clock until it holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
