use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::models::{GenerationRequest, IllustrationStyle, PageId, StoryContext, StoryId, UserId};
use crate::core::rest::RestBackend;

/// Title and page texts returned by the text generation call. Emptiness is
/// checked by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoryDraft {
    pub title: String,
    pub pages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRequest {
    pub page_text: String,
    pub story_context: StoryContext,
    pub style: IllustrationStyle,
    pub story_id: StoryId,
    pub page_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackCoverRequest {
    pub story_context: StoryContext,
    pub style: IllustrationStyle,
    pub story_id: StoryId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NarrationRequest {
    #[serde(rename = "story_page_id")]
    pub page_id: PageId,
    pub text: String,
    pub voice_id: String,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub price_id: String,
    pub user_id: UserId,
    pub user_email: Option<String>,
}

/// The remote AI functions. Each call is independent and may fail.
#[async_trait]
pub trait AiFunctions: Send + Sync {
    async fn generate_story(&self, request: &GenerationRequest) -> Result<StoryDraft>;
    async fn generate_image(&self, request: &ImageRequest) -> Result<String>;
    async fn generate_back_cover(&self, request: &BackCoverRequest) -> Result<String>;
    async fn generate_narration(&self, request: &NarrationRequest) -> Result<String>;
    async fn generate_character_image(&self, description: &str) -> Result<String>;
    /// Returns the checkout session id.
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<String>;
}

// --- Wire responses ---

#[derive(Deserialize, Default)]
struct StoryResponse {
    title: Option<String>,
    pages: Option<Vec<String>>,
    error: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UrlResponse {
    image_url: Option<String>,
    back_cover_url: Option<String>,
    audio_url: Option<String>,
    session_id: Option<String>,
    error: Option<String>,
}

fn function_error(function: &str, error: Option<String>) -> Result<()> {
    match error {
        Some(message) => Err(anyhow!("{} returned error: {}", function, message)),
        None => Ok(()),
    }
}

fn require(function: &str, value: Option<String>, field: &str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| anyhow!("{} response is missing {}", function, field))
}

fn parse_story(response: StoryResponse) -> Result<StoryDraft> {
    function_error("generate-story", response.error)?;
    Ok(StoryDraft {
        title: response.title.unwrap_or_default(),
        pages: response.pages.unwrap_or_default(),
    })
}

/// [`AiFunctions`] backed by the hosted serverless functions.
#[derive(Debug, Clone)]
pub struct EdgeFunctionsClient {
    backend: RestBackend,
}

impl EdgeFunctionsClient {
    pub fn new(backend: RestBackend) -> Self {
        Self { backend }
    }

    async fn url_call<B: Serialize + Sync>(&self, function: &str, body: &B) -> Result<UrlResponse> {
        let response: UrlResponse = self.backend.invoke(function, body).await?;
        function_error(function, response.error.clone())?;
        Ok(response)
    }
}

#[async_trait]
impl AiFunctions for EdgeFunctionsClient {
    async fn generate_story(&self, request: &GenerationRequest) -> Result<StoryDraft> {
        let response: StoryResponse = self.backend.invoke("generate-story", request).await?;
        parse_story(response)
    }

    async fn generate_image(&self, request: &ImageRequest) -> Result<String> {
        let response = self.url_call("generate-image", request).await?;
        require("generate-image", response.image_url, "imageUrl")
    }

    async fn generate_back_cover(&self, request: &BackCoverRequest) -> Result<String> {
        let response = self.url_call("generate-back-cover", request).await?;
        require("generate-back-cover", response.back_cover_url, "backCoverUrl")
    }

    async fn generate_narration(&self, request: &NarrationRequest) -> Result<String> {
        let response = self.url_call("generate-narration", request).await?;
        require("generate-narration", response.audio_url, "audioUrl")
    }

    async fn generate_character_image(&self, description: &str) -> Result<String> {
        let response = self
            .url_call("generate-character-image", &json!({ "description": description }))
            .await?;
        require("generate-character-image", response.image_url, "imageUrl")
    }

    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<String> {
        let response = self.url_call("create-checkout-session", request).await?;
        require("create-checkout-session", response.session_id, "sessionId")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_story_response_missing_pages_becomes_empty_draft() {
        let response: StoryResponse = serde_json::from_str(r#"{"title": "Moonbeams"}"#).unwrap();
        let draft = parse_story(response).unwrap();
        assert_eq!(draft.title, "Moonbeams");
        assert!(draft.pages.is_empty());
    }

    #[test]
    fn test_story_response_error_field_fails() {
        let response: StoryResponse =
            serde_json::from_str(r#"{"error": "quota exceeded"}"#).unwrap();
        let err = parse_story(response).unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn test_url_response_fields_are_camel_case() {
        let response: UrlResponse = serde_json::from_str(
            r#"{"imageUrl": "https://img/1.png", "backCoverUrl": "https://img/back.png"}"#,
        )
        .unwrap();
        assert_eq!(response.image_url.as_deref(), Some("https://img/1.png"));
        assert_eq!(response.back_cover_url.as_deref(), Some("https://img/back.png"));
    }

    #[test]
    fn test_require_rejects_blank_urls() {
        assert!(require("generate-image", Some("  ".to_string()), "imageUrl").is_err());
        assert!(require("generate-image", None, "imageUrl").is_err());
        assert_eq!(
            require("generate-image", Some("u".to_string()), "imageUrl").unwrap(),
            "u"
        );
    }

    #[test]
    fn test_image_request_body_shape() {
        let request = ImageRequest {
            page_text: "Once upon a time".to_string(),
            story_context: StoryContext {
                characters: "Bolt".to_string(),
                setting: "A park".to_string(),
                plot: "Squirrels".to_string(),
            },
            style: IllustrationStyle::Cartoon3d,
            story_id: Uuid::nil(),
            page_number: 3,
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["style"], "3d-cartoon");
        assert_eq!(body["page_number"], 3);
        assert_eq!(body["story_context"]["characters"], "Bolt");
    }

    #[test]
    fn test_narration_request_body_shape() {
        let request = NarrationRequest {
            page_id: Uuid::nil(),
            text: "Hello".to_string(),
            voice_id: "voice".to_string(),
            user_id: Uuid::nil(),
        };
        let body = serde_json::to_value(&request).unwrap();
        assert!(body.get("story_page_id").is_some());
        assert_eq!(body["voice_id"], "voice");
    }
}
