use async_trait::async_trait;
use reqwest::{StatusCode, header::HeaderMap};
use serde_json::{Value, json};
use tracing::debug;

use super::{VisionRequest, VisionService};
use crate::{
    error::ServiceError,
    provider::{Provider, ProviderError},
};

const MAX_TOKENS: u32 = 1024;
const TEMPERATURE: f64 = 0.2;
const TOP_P: f64 = 0.7;

/// Error bodies are cut to this many characters before they are kept.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Vision client for OpenAI-compatible `/chat/completions` endpoints.
pub struct ChatCompletionsService {
    client: reqwest::Client,
    api_url: String,
    model: String,
    api_key: String,
    max_images: usize,
}

impl ChatCompletionsService {
    pub fn new(
        api_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        max_images: usize,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            model: model.into(),
            api_key: api_key.into(),
            max_images: max_images.max(1),
        }
    }

    pub fn from_provider(provider: Provider) -> Result<Self, ProviderError> {
        let api_key = provider.validate_api_key()?;
        let config = provider.config();
        Ok(Self::new(
            config.api_url,
            config.model,
            api_key,
            config.max_images_per_request,
        ))
    }

    fn payload(&self, request: &VisionRequest) -> Value {
        if request.images.len() > self.max_images {
            debug!(
                images = request.images.len(),
                limit = self.max_images,
                "truncating images to provider limit"
            );
        }

        let mut content = vec![json!({
            "type": "text",
            "text": request.instruction,
        })];
        content.extend(request.images.iter().take(self.max_images).map(|frame| {
            json!({
                "type": "image_url",
                "image_url": { "url": frame.to_data_url() },
            })
        }));

        let mut messages = Vec::with_capacity(2);
        if let Some(context) = &request.context {
            messages.push(json!({
                "role": "system",
                "content": context,
            }));
        }
        messages.push(json!({
            "role": "user",
            "content": content,
        }));

        json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": MAX_TOKENS,
            "temperature": TEMPERATURE,
            "top_p": TOP_P,
        })
    }
}

#[async_trait]
impl VisionService for ChatCompletionsService {
    async fn complete(&self, request: &VisionRequest) -> Result<String, ServiceError> {
        let response = self
            .client
            .post(&self.api_url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.payload(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_ms = retry_after_ms(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after_ms, body));
        }

        let body = response.json::<Value>().await?;
        extract_content(&body)
    }
}

/// Seconds from a `Retry-After` header. HTTP-date values are ignored.
fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    let seconds = value.trim().parse::<f64>().ok()?;
    (seconds.is_finite() && seconds >= 0.0).then(|| (seconds * 1000.0) as u64)
}

fn classify_status(status: StatusCode, retry_after_ms: Option<u64>, body: String) -> ServiceError {
    let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();

    match status.as_u16() {
        429 => ServiceError::RateLimited { retry_after_ms },
        408 => ServiceError::Timeout,
        status @ (401 | 403) => ServiceError::Auth { status, body },
        status @ 500..=599 => ServiceError::Server { status, body },
        status => ServiceError::BadRequest { status, body },
    }
}

fn extract_content(body: &Value) -> Result<String, ServiceError> {
    if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
        let message = error["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ServiceError::Rejected { message });
    }

    let content = &body["choices"][0]["message"]["content"];
    let text = match content {
        Value::String(text) => text.clone(),
        // Some providers answer with a list of typed content parts.
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part["text"].as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    };

    let text = text.trim();
    if text.is_empty() {
        return Err(ServiceError::MalformedResponse {
            reason: format!("no text in choices[0].message.content: {body}"),
        });
    }
    Ok(text.to_string())
}
