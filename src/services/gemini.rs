use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::services::media::{MediaError, MediaStore};
use crate::services::retry::{retry_with_backoff, RetryPolicy, Retryable};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

// Generation can take a while; the connect phase should not.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(45);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const TEMPERATURE: f64 = 0.7;
const MAX_OUTPUT_TOKENS: u32 = 2048;

/// An input image forwarded inline to the model.
pub struct InlineImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Client for the Gemini `generateContent` image endpoint.
///
/// Transport-level failures are retried per the injected [`RetryPolicy`];
/// a well-formed response that carries no image is a terminal failure and
/// is never retried.
pub struct GeminiClient {
    http: Client,
    api_key: String,
    model: String,
    endpoint: String,
    retry: RetryPolicy,
    media: Arc<MediaStore>,
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "inlineData")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
struct InlineData {
    #[serde(rename = "mime_type", alias = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl GeminiClient {
    pub fn new(
        api_key: String,
        model: String,
        retry: RetryPolicy,
        media: Arc<MediaStore>,
    ) -> Result<Self, GenerateError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(GenerateError::Http)?;

        let endpoint = format!("{GEMINI_API_BASE}/{model}:generateContent");

        Ok(Self {
            http,
            api_key,
            model,
            endpoint,
            retry,
            media,
        })
    }

    /// Run one try-on composition and return the saved result path.
    pub async fn generate_try_on(
        &self,
        attachments: &[InlineImage],
    ) -> Result<String, GenerateError> {
        let request = build_request(TRY_ON_PROMPT, attachments);

        info!(
            model = %self.model,
            parts = request.contents[0].parts.len(),
            "Requesting try-on generation"
        );

        let request_ref = &request;
        let response = retry_with_backoff(&self.retry, move |attempt| async move {
            self.request_once(request_ref, attempt).await
        })
        .await?;

        // Extraction is outside the retry loop: a 200 response without an
        // image part is a terminal failure, not a transport hiccup.
        let image = extract_inline_image(&response)?;
        let bytes = base64::engine::general_purpose::STANDARD.decode(&image.data)?;
        let result_path = self.media.save_generated(&bytes, &image.mime_type).await?;

        info!(result_path = %result_path, "Generated image saved");
        Ok(result_path)
    }

    async fn request_once(
        &self,
        request: &GenerateContentRequest,
        attempt: u32,
    ) -> Result<GenerateContentResponse, GenerateError> {
        let response = self
            .http
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(request)
            .send()
            .await
            .map_err(GenerateError::Http)?;

        let status = response.status();
        let body = response.text().await.map_err(GenerateError::Http)?;

        if !status.is_success() {
            let message = serde_json::from_str::<GenerateContentResponse>(&body)
                .ok()
                .and_then(|r| r.error)
                .map(|e| e.message)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(GenerateError::Status { code: status, message });
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body)?;
        if let Some(err) = parsed.error {
            return Err(GenerateError::Api(err.message));
        }

        debug!(attempt, response_bytes = body.len(), "Gemini request succeeded");
        Ok(parsed)
    }
}

fn build_request(prompt: &str, attachments: &[InlineImage]) -> GenerateContentRequest {
    let mut parts = vec![Part {
        text: Some(prompt.to_string()),
        inline_data: None,
    }];

    for attachment in attachments {
        parts.push(Part {
            text: None,
            inline_data: Some(InlineData {
                mime_type: attachment.mime_type.clone(),
                data: base64::engine::general_purpose::STANDARD.encode(&attachment.bytes),
            }),
        });
    }

    GenerateContentRequest {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts,
        }],
        generation_config: GenerationConfig {
            temperature: TEMPERATURE,
            max_output_tokens: MAX_OUTPUT_TOKENS,
        },
    }
}

/// Find the first inline image in the candidate/part tree.
fn extract_inline_image(
    response: &GenerateContentResponse,
) -> Result<&InlineData, GenerateError> {
    let parts = response
        .candidates
        .iter()
        .filter_map(|c| c.content.as_ref())
        .flat_map(|c| c.parts.iter());

    let mut text_reply: Option<&str> = None;
    for part in parts {
        if let Some(inline) = &part.inline_data {
            return Ok(inline);
        }
        if text_reply.is_none() {
            if let Some(text) = &part.text {
                text_reply = Some(text);
            }
        }
    }

    match text_reply {
        Some(text) => Err(GenerateError::TextResponse(text.to_string())),
        None => Err(GenerateError::NoImage),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("Gemini request failed: {0}")]
    Http(reqwest::Error),

    #[error("Gemini API error: HTTP {code} - {message}")]
    Status { code: StatusCode, message: String },

    #[error("Gemini API error: {0}")]
    Api(String),

    #[error("invalid JSON response from Gemini API: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("AI returned text instead of image: {0}")]
    TextResponse(String),

    #[error("no image in response")]
    NoImage,

    #[error("invalid base64 image data: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error(transparent)]
    Storage(#[from] MediaError),
}

impl Retryable for GenerateError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerateError::Http(_)
                | GenerateError::Status { .. }
                | GenerateError::Api(_)
                | GenerateError::InvalidJson(_)
        )
    }
}

const TRY_ON_PROMPT: &str = "Task: Virtual try-on composition.

Use the exact person from the first image (full-body standing photo). Preserve their identity, pose, body proportions, hair, skin tone, facial features. Camera perspective should be standing facing the camera like a model. Pay close attention to the face shape and eyes to try to make them look exactly like the person in the standing photo.

From the second image (flat-lay outfit), identify each clothing item and accessories (top, bottoms, shoes, bag, scarf, jewelry). Dress the person in those exact items with realistic fit, fabric behavior, and layering. Maintain correct scale, drape, and contact points at shoulders, waist, hips, and feet. Keep all garment textures, colors, and details accurate.

Background: Replace with a photorealistic bright outdoor scene (parklet/patio/garden vibe). Natural, slightly directional daylight; soft shadows; no other people.

Output: A single photorealistic image of the same person now wearing the outfit from the flat-lay. Frame like professional fashion photography. Person should be facing the camera like a model. Avoid artifacts, misalignment, or extra items.

When you make the output, make sure to double check that all the items you identified in the flat-lay photo are present in the output image. Remove any other items that are not in the flat-lay photo, like hats, or phones (no selfies or phones).";
