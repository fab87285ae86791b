//! HTTP signaling against the messaging provider's calling API.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use voxbridge_call::{CallError, SignalingTransport};
use voxbridge_types::{CallId, EndpointId, SessionDescription};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Answers calls by posting the SDP answer to `{api_base_url}/{endpoint_id}/calls`.
#[derive(Debug, Clone)]
pub struct GraphSignaling {
    client: reqwest::Client,
    api_base_url: String,
    access_token: String,
}

#[derive(Debug, Serialize)]
struct AnswerRequest<'a> {
    messaging_product: &'static str,
    call_id: &'a str,
    action: &'static str,
    session: AnswerSession<'a>,
}

#[derive(Debug, Serialize)]
struct AnswerSession<'a> {
    sdp_type: &'static str,
    sdp: &'a str,
}

fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("voxbridge/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

impl GraphSignaling {
    pub fn new(api_base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            client: build_http_client(),
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        }
    }

    fn calls_url(&self, endpoint_id: &EndpointId) -> String {
        format!("{}/{}/calls", self.api_base_url, endpoint_id)
    }
}

#[async_trait]
impl SignalingTransport for GraphSignaling {
    async fn answer(
        &self,
        endpoint_id: &EndpointId,
        call_id: &CallId,
        answer: &SessionDescription,
    ) -> Result<(), CallError> {
        let body = AnswerRequest {
            messaging_product: "whatsapp",
            call_id: call_id.as_str(),
            action: "accept",
            session: AnswerSession {
                sdp_type: "answer",
                sdp: answer.as_str(),
            },
        };

        let resp = self
            .client
            .post(self.calls_url(endpoint_id))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| CallError::Signaling(format!("answer request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            return Err(CallError::Signaling(format!(
                "provider rejected answer: {} {}",
                status, detail
            )));
        }

        tracing::info!(call_id = %call_id, endpoint_id = %endpoint_id, "call answer accepted");
        Ok(())
    }
}
