//! OpenAI-compatible chat-completions backend (vLLM style).
//!
//! Images travel inline as a base64 PNG data URL next to the text prompt.

use super::{ProviderError, VisionProvider};
use crate::models::{ImageBuffer, PixelFormat};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageOutputFormat, RgbImage};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_base: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

pub struct OpenAiVisionProvider {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiVisionProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

/// Encodes the buffer as PNG, normalising channel order to RGB first.
pub fn encode_png(image: &ImageBuffer) -> Result<Vec<u8>, ProviderError> {
    let mut data = image.data().to_vec();
    if image.format() == PixelFormat::Bgr24 {
        for px in data.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
    }

    let rgb = RgbImage::from_raw(image.width(), image.height(), data).ok_or_else(|| {
        ProviderError::InvalidRequest("image buffer does not match its dimensions".to_string())
    })?;

    let mut png = Vec::new();
    DynamicImage::ImageRgb8(rgb)
        .write_to(&mut png, ImageOutputFormat::Png)
        .map_err(|e| ProviderError::InvalidRequest(format!("PNG encoding failed: {}", e)))?;
    Ok(png)
}

#[async_trait]
impl VisionProvider for OpenAiVisionProvider {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn generate(
        &self,
        image: &ImageBuffer,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        let owned = image.clone();
        let png = tokio::task::spawn_blocking(move || encode_png(&owned))
            .await
            .map_err(|e| ProviderError::InvalidRequest(format!("encoder task failed: {}", e)))??;
        let image_url = format!("data:image/png;base64,{}", STANDARD.encode(png));

        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages: vec![ChatCompletionMessage {
                role: "user",
                content: vec![
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: image_url },
                    },
                    ContentPart::Text {
                        text: prompt.to_string(),
                    },
                ],
            }],
            max_tokens,
            temperature: TEMPERATURE,
        };

        tracing::debug!(
            model = %self.config.model,
            prompt_len = prompt.len(),
            width = image.width(),
            height = image.height(),
            "Sending request to inference backend"
        );

        let response = self
            .authorize(self.client.post(self.url("chat/completions")))
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                return Err(ProviderError::RateLimited);
            }

            return Err(ProviderError::ApiError(format!(
                "Backend error {}: {}",
                status, error_text
            )));
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ApiError(format!("Failed to parse response: {}", e)))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(ProviderError::EmptyResponse)
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let response = self
            .authorize(self.client.get(self.url("models")))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProviderError::ApiError(format!(
                "Health check failed: {}",
                response.status()
            )))
        }
    }
}

// ============================================================================
// Chat-completions request/response types
// ============================================================================

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatCompletionMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatCompletionMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    ImageUrl { image_url: ImageUrl },
    Text { text: String },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::providers::{select_provider, MockVisionProvider};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_png_roundtrips_channel_order() {
        let image = ImageBuffer::filled(3, 2, PixelFormat::Bgr24, [10, 20, 30]).unwrap();
        let png = encode_png(&image).unwrap();
        assert_eq!(&png[1..4], b"PNG");

        let decoded = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.get_pixel(0, 0).0, [30, 20, 10]);
    }

    #[test]
    fn test_request_shape() {
        let request = ChatCompletionRequest {
            model: "qwen",
            messages: vec![ChatCompletionMessage {
                role: "user",
                content: vec![
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: "data:image/png;base64,AAA".to_string(),
                        },
                    },
                    ContentPart::Text {
                        text: "what?".to_string(),
                    },
                ],
            }],
            max_tokens: 128,
            temperature: TEMPERATURE,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["content"][0]["type"], "image_url");
        assert_eq!(
            value["messages"][0]["content"][0]["image_url"]["url"],
            "data:image/png;base64,AAA"
        );
        assert_eq!(value["messages"][0]["content"][1]["type"], "text");
        assert_eq!(value["max_tokens"], 128);
    }

    fn provider_for(server: &MockServer, api_key: Option<&str>) -> OpenAiVisionProvider {
        OpenAiVisionProvider::new(OpenAiConfig {
            api_base: format!("{}/v1", server.uri()),
            model: "qwen-vl".to_string(),
            api_key: api_key.map(str::to_string),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn still() -> ImageBuffer {
        ImageBuffer::filled(4, 4, PixelFormat::Rgb24, [1, 2, 3]).unwrap()
    }

    #[tokio::test]
    async fn test_generate_reads_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer secret-key"))
            .and(body_partial_json(json!({
                "model": "qwen-vl",
                "max_tokens": 32
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [
                    {"message": {"role": "assistant", "content": "a red cup"}},
                    {"message": {"role": "assistant", "content": "ignored"}}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server, Some("secret-key"));
        let text = provider.generate(&still(), "what is this?", 32).await.unwrap();
        assert_eq!(text, "a red cup");
    }

    #[tokio::test]
    async fn test_generate_maps_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = provider_for(&server, None)
            .generate(&still(), "q", 16)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited));
    }

    #[tokio::test]
    async fn test_generate_maps_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
            .mount(&server)
            .await;

        let err = provider_for(&server, None)
            .generate(&still(), "q", 16)
            .await
            .unwrap_err();
        match err {
            ProviderError::ApiError(msg) => assert!(msg.contains("model crashed")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_generate_without_choices_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = provider_for(&server, None)
            .generate(&still(), "q", 16)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_health_check_lists_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;

        assert!(provider_for(&server, None).health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_unhealthy_backend_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let primary = provider_for(&server, None);
        assert!(matches!(
            primary.health_check().await,
            Err(ProviderError::ApiError(_))
        ));

        let selected = select_provider(
            std::sync::Arc::new(primary),
            Some(std::sync::Arc::new(MockVisionProvider::new())),
        )
        .await;
        assert_eq!(selected.name(), "mock");
    }

    #[test]
    fn test_url_join_trims_slash() {
        let provider = OpenAiVisionProvider::new(OpenAiConfig {
            api_base: "http://localhost:12345/v1/".to_string(),
            model: "m".to_string(),
            api_key: None,
            timeout: Duration::from_secs(1),
        })
        .unwrap();
        assert_eq!(
            provider.url("chat/completions"),
            "http://localhost:12345/v1/chat/completions"
        );
    }
}
