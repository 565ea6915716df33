use std::time::Duration;

use anyhow::Context as _;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-pro";

/// Large documents justify long generation time; both model calls share this
/// upper bound.
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub client: reqwest::Client,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY is not set"))?;
        let base_url =
            std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned());
        let model = std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_owned());
        let timeout_secs = match std::env::var("GEMINI_TIMEOUT_SECS") {
            Ok(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("invalid GEMINI_TIMEOUT_SECS={raw:?}"))?,
            Err(_) => DEFAULT_TIMEOUT_SECS,
        };

        Self::new(&base_url, api_key, model, Duration::from_secs(timeout_secs))
    }

    pub fn new(
        base_url: &str,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
            model,
            timeout,
        })
    }

    fn generate_endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

/// Issues a schema-constrained generation call and returns the raw JSON text
/// the model produced. Validation against the target type is the caller's
/// concern.
pub async fn generate_json(
    config: &GeminiConfig,
    prompt: &str,
    response_schema: &serde_json::Value,
) -> anyhow::Result<String> {
    let body = serde_json::json!({
        "contents": [
            { "role": "user", "parts": [ { "text": prompt } ] }
        ],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": response_schema,
        },
    });

    let value = post_generate(config, &body).await?;
    let text = candidate_text(&value);
    if text.trim().is_empty() {
        anyhow::bail!("model returned no output text");
    }
    Ok(text)
}

/// Issues a function-calling generation and returns the arguments of the
/// first call to `function_name`, or `None` when the model produced no
/// candidate, no content parts, or no function call. Tool mode is forced so
/// free text cannot substitute for a call.
pub async fn generate_function_call(
    config: &GeminiConfig,
    prompt: &str,
    function_declaration: &serde_json::Value,
    function_name: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let body = serde_json::json!({
        "contents": [
            { "role": "user", "parts": [ { "text": prompt } ] }
        ],
        "tools": [
            { "functionDeclarations": [ function_declaration ] }
        ],
        "toolConfig": {
            "functionCallingConfig": {
                "mode": "ANY",
                "allowedFunctionNames": [ function_name ],
            }
        },
    });

    let value = post_generate(config, &body).await?;

    let Some(parts) = value
        .pointer("/candidates/0/content/parts")
        .and_then(|v| v.as_array())
    else {
        tracing::info!("model response has no candidate content parts");
        return Ok(None);
    };

    for part in parts {
        let Some(call) = part.get("functionCall") else {
            continue;
        };
        if call.get("name").and_then(|v| v.as_str()) != Some(function_name) {
            continue;
        }
        return Ok(call.get("args").cloned());
    }

    tracing::info!(function = function_name, "model response has no function call");
    Ok(None)
}

async fn post_generate(
    config: &GeminiConfig,
    body: &serde_json::Value,
) -> anyhow::Result<serde_json::Value> {
    let endpoint = config.generate_endpoint();
    let response = config
        .client
        .post(&endpoint)
        .header("x-goog-api-key", &config.api_key)
        .json(body)
        .send()
        .await
        .with_context(|| format!("POST {endpoint}"))?;

    let status = response.status();
    let raw = response.text().await.context("read model response body")?;
    if !status.is_success() {
        let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
        anyhow::bail!("model API error ({status}): {message}");
    }

    serde_json::from_str(&raw).context("parse model response")
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

fn candidate_text(value: &serde_json::Value) -> String {
    let Some(parts) = value
        .pointer("/candidates/0/content/parts")
        .and_then(|v| v.as_array())
    else {
        return String::new();
    };

    let mut text = String::new();
    for part in parts {
        if let Some(part_text) = part.get("text").and_then(|v| v.as_str()) {
            text.push_str(part_text);
        }
    }
    text
}
