/// Remote grounding backend.
///
/// Talks to a long-lived OpenAI-compatible inference server (e.g. vLLM
/// serving a grounding VLM): screenshot goes up as a base64 JPEG data URL
/// next to the prompt, the assistant's text comes back verbatim for the
/// engine to parse. Transport failures keep their own error class so the
/// retry policy can tell a dead server apart from a confused model.
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::{PinpointError, PinpointResult};
use crate::grounding::backend::{build_grounding_prompt, BackendKind, GroundingBackend};
use crate::perception::screenshot::Screenshot;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const JPEG_QUALITY: u8 = 85;
const MAX_ANSWER_TOKENS: u32 = 32;

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

pub struct RemoteBackend {
    api_base: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl RemoteBackend {
    pub fn new(
        api_base: String,
        api_key: String,
        model: String,
        request_timeout_secs: u64,
    ) -> PinpointResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(request_timeout_secs))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| PinpointError::Config(format!("http client: {e}")))?;
        Ok(Self {
            api_base,
            api_key,
            model,
            client,
        })
    }
}

#[async_trait]
impl GroundingBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn ground(&self, shot: &Screenshot, description: &str) -> PinpointResult<String> {
        let b64 = shot.to_jpeg_base64(JPEG_QUALITY)?;
        let messages = vec![ChatMessage {
            role: "user",
            content: vec![
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:image/jpeg;base64,{b64}"),
                    },
                },
                ContentPart::Text {
                    text: build_grounding_prompt(description),
                },
            ],
        }];

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0,
            "max_tokens": MAX_ANSWER_TOKENS,
        });

        tracing::debug!(
            model = %self.model,
            image_bytes = b64.len(),
            "sending remote grounding request"
        );

        // reqwest errors here are the connection class; the retry loop treats
        // them the same but logging keeps the distinction visible.
        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(PinpointError::Backend(format!("{status}: {err_body}")));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PinpointError::MalformedResponse(format!("body not JSON: {e}")))?;

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                PinpointError::MalformedResponse(format!(
                    "no message content in response: {json}"
                ))
            })?;

        if content.trim().is_empty() {
            return Err(PinpointError::MalformedResponse(
                "empty message content".into(),
            ));
        }

        tracing::debug!(answer = %content, "remote grounding answer");
        Ok(content.to_string())
    }
}
