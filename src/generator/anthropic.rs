use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GenerationRequest, Generator};
use crate::consts::DEFAULT_ANTHROPIC_MODEL;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;

/// Calls the Anthropic Messages API with the job's images followed by its text.
pub struct AnthropicGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl AnthropicGenerator {
    pub fn new(api_key: impl Into<String>, model: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
            endpoint: API_URL.to_string(),
        }
    }

    /// Point at a different Messages endpoint (proxies, tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn build_body<'a>(&'a self, request: &'a GenerationRequest) -> ApiRequest<'a> {
        let mut content: Vec<ContentBlock<'a>> = request
            .images
            .iter()
            .map(|image| ContentBlock::Image {
                source: ImageSource {
                    source_type: "base64",
                    media_type: &image.media_type,
                    data: &image.data,
                },
            })
            .collect();
        if !request.text.is_empty() {
            content.push(ContentBlock::Text {
                text: &request.text,
            });
        }

        ApiRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            messages: vec![Message {
                role: "user",
                content,
            }],
        }
    }

    fn extract_text(response: ApiResponse) -> Result<String> {
        let text: String = response
            .content
            .iter()
            .filter(|block| block.content_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            bail!("Anthropic API returned empty response");
        }
        Ok(text)
    }
}

#[async_trait]
impl Generator for AnthropicGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = self.build_body(request);

        let resp = self
            .client
            .post(&self.endpoint)
            .header("anthropic-version", API_VERSION)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Anthropic API error ({}): {}", status, text);
        }

        let api_resp: ApiResponse = resp.json().await?;
        if let Some(usage) = &api_resp.usage {
            tracing::debug!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "anthropic usage"
            );
        }
        Self::extract_text(api_resp)
    }
}

// --- API types ---

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock<'a> {
    Image { source: ImageSource<'a> },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct ImageSource<'a> {
    #[serde(rename = "type")]
    source_type: &'a str,
    media_type: &'a str,
    data: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ResponseBlock>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::InlineImage;

    fn generator() -> AnthropicGenerator {
        AnthropicGenerator::new("sk-test", None)
    }

    #[test]
    fn default_model_is_used() {
        let g = generator();
        let request = GenerationRequest {
            text: "hi".to_string(),
            images: vec![],
        };
        let body = serde_json::to_value(g.build_body(&request)).unwrap();
        assert_eq!(body["model"], DEFAULT_ANTHROPIC_MODEL);
        assert_eq!(body["max_tokens"], MAX_TOKENS);
    }

    #[test]
    fn images_precede_text() {
        let g = generator();
        let request = GenerationRequest {
            text: "what is this".to_string(),
            images: vec![InlineImage {
                data: "AAAA".to_string(),
                media_type: "image/png".to_string(),
            }],
        };
        let body = serde_json::to_value(g.build_body(&request)).unwrap();
        let content = &body["messages"][0]["content"];
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(content[0]["type"], "image");
        assert_eq!(content[0]["source"]["type"], "base64");
        assert_eq!(content[0]["source"]["media_type"], "image/png");
        assert_eq!(content[0]["source"]["data"], "AAAA");
        assert_eq!(content[1]["type"], "text");
        assert_eq!(content[1]["text"], "what is this");
    }

    #[test]
    fn empty_text_block_is_omitted() {
        let g = generator();
        let request = GenerationRequest {
            text: String::new(),
            images: vec![InlineImage {
                data: "AAAA".to_string(),
                media_type: "image/jpeg".to_string(),
            }],
        };
        let body = serde_json::to_value(g.build_body(&request)).unwrap();
        assert_eq!(body["messages"][0]["content"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn extract_joins_text_blocks() {
        let resp: ApiResponse = serde_json::from_str(
            r#"{"content": [
                {"type": "text", "text": "Nice "},
                {"type": "tool_use"},
                {"type": "text", "text": "photo"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(AnthropicGenerator::extract_text(resp).unwrap(), "Nice photo");
    }

    #[test]
    fn extract_rejects_empty_reply() {
        let resp: ApiResponse = serde_json::from_str(r#"{"content": []}"#).unwrap();
        assert!(AnthropicGenerator::extract_text(resp).is_err());
    }
}
