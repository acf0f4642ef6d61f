// src/provider.rs
//
// Async HTTP client for the remote vision service (Moondream-style API).
// Exposes detect / ask / caption behind the VisionProvider trait so the
// pipeline and tests never depend on the wire format.
//
// Rate limiting is handled with a rotating credential pool: on HTTP 429 the
// client advances to the next key and retries the same request. Rotation is
// bounded to one full pass over the pool per logical request; exhausting the
// pool fails the call with QuotaExhausted instead of retrying forever.

use crate::geometry::NormalizedBox;
use crate::types::Frame;

use anyhow::{bail, Context, Result};
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The service returned HTTP 429 for the credential in use.
    #[error("vision service rate limited the current credential")]
    RateLimited,
    /// Every credential in the pool hit a rate limit within one request.
    #[error("all {pool_size} credentials rate limited, quota exhausted")]
    QuotaExhausted { pool_size: usize },
    /// Network failure or a non-success status other than 429.
    #[error("vision service unreachable: {0}")]
    Unavailable(String),
    /// The service answered but the body did not match the contract.
    #[error("malformed response from vision service: {0}")]
    MalformedResponse(String),
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

/// Contract with the external vision service. The production implementation
/// is [`MoondreamClient`]; tests substitute scripted providers.
#[async_trait::async_trait]
pub trait VisionProvider: Send + Sync {
    /// All boxes for one object label in the frame, normalized coordinates.
    async fn detect(&self, image: &EncodedImage, label: &str) -> ProviderResult<Vec<NormalizedBox>>;

    /// Free-text answer to a question about the frame.
    async fn ask(&self, image: &EncodedImage, prompt: &str) -> ProviderResult<String>;

    /// Free-text scene description.
    async fn caption(&self, image: &EncodedImage) -> ProviderResult<String>;
}

// ============================================================================
// IMAGE PAYLOAD
// ============================================================================

/// A frame encoded once and shared by every provider call that references it
/// (one detect per label, confirmations, caption).
#[derive(Debug, Clone)]
pub struct EncodedImage {
    data_url: String,
}

impl EncodedImage {
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let jpeg = encode_rgb_to_jpeg(&frame.data, frame.width, frame.height)
            .context("JPEG encode failed for outgoing frame")?;
        let b64 = base64::engine::general_purpose::STANDARD.encode(&jpeg);
        Ok(Self {
            data_url: format!("data:image/jpeg;base64,{}", b64),
        })
    }
}

fn encode_rgb_to_jpeg(rgb_data: &[u8], width: u32, height: u32) -> Option<Vec<u8>> {
    use image::{ImageBuffer, RgbImage};

    let img: RgbImage = ImageBuffer::from_raw(width, height, rgb_data.to_vec())?;

    let mut buf = std::io::Cursor::new(Vec::new());
    // Quality 80 is a good balance of size/quality for network transfer
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, 80);
    img.write_with_encoder(encoder).ok()?;

    Some(buf.into_inner())
}

// ============================================================================
// CREDENTIAL POOL
// ============================================================================

/// Fixed, ordered pool of API keys with a shared rotation cursor. The cursor
/// only moves forward; `current` applies the modulo, so the raw value doubles
/// as a lifetime rotation counter.
struct CredentialPool {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl CredentialPool {
    fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            cursor: AtomicUsize::new(0),
        }
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn current(&self) -> String {
        let idx = self.cursor.load(Ordering::Relaxed) % self.keys.len();
        self.keys[idx].clone()
    }

    fn advance(&self) {
        self.cursor.fetch_add(1, Ordering::Relaxed);
    }

    fn rotations(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }
}

// ============================================================================
// WIRE TYPES (must match the vision service's JSON)
// ============================================================================

#[derive(Debug, Serialize)]
struct DetectRequest<'a> {
    image_url: &'a str,
    object: &'a str,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    objects: Vec<NormalizedBox>,
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    image_url: &'a str,
    question: &'a str,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    answer: String,
}

#[derive(Debug, Serialize)]
struct CaptionRequest<'a> {
    image_url: &'a str,
    length: &'a str,
}

#[derive(Debug, Deserialize)]
struct CaptionResponse {
    caption: String,
}

// ============================================================================
// CLIENT
// ============================================================================

const AUTH_HEADER: &str = "X-Moondream-Auth";

pub struct MoondreamClient {
    http_client: reqwest::Client,
    base_url: String,
    credentials: CredentialPool,
}

impl MoondreamClient {
    pub fn new(base_url: &str, api_keys: Vec<String>, timeout_secs: u64) -> Result<Self> {
        if api_keys.is_empty() {
            bail!("vision provider credential pool is empty");
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: CredentialPool::new(api_keys),
        })
    }

    pub fn pool_size(&self) -> usize {
        self.credentials.len()
    }

    /// Lifetime count of credential rotations across all requests.
    pub fn rotation_count(&self) -> usize {
        self.credentials.rotations()
    }

    /// Run one logical request under the rotation policy: retry on
    /// RateLimited with the next credential, at most one full pool pass.
    async fn with_rotation<T, F, Fut>(&self, what: &str, mut call: F) -> ProviderResult<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let attempts = self.credentials.len();
        for attempt in 0..attempts {
            let key = self.credentials.current();
            match call(key).await {
                Err(ProviderError::RateLimited) => {
                    warn!(
                        "🔑 {} rate limited on credential {}/{}, rotating",
                        what,
                        attempt + 1,
                        attempts
                    );
                    self.credentials.advance();
                }
                other => return other,
            }
        }
        Err(ProviderError::QuotaExhausted {
            pool_size: attempts,
        })
    }

    async fn post_json<Req, Resp>(&self, endpoint: &str, key: &str, body: &Req) -> ProviderResult<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, endpoint);

        let resp = self
            .http_client
            .post(&url)
            .header(AUTH_HEADER, key)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Unavailable(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        resp.json::<Resp>()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))
    }
}

#[async_trait::async_trait]
impl VisionProvider for MoondreamClient {
    async fn detect(&self, image: &EncodedImage, label: &str) -> ProviderResult<Vec<NormalizedBox>> {
        let response: DetectResponse = self
            .with_rotation("detect", |key| async move {
                let request = DetectRequest {
                    image_url: &image.data_url,
                    object: label,
                };
                self.post_json("detect", &key, &request).await
            })
            .await?;

        debug!("🌐 detect('{}') → {} object(s)", label, response.objects.len());
        Ok(response.objects)
    }

    async fn ask(&self, image: &EncodedImage, prompt: &str) -> ProviderResult<String> {
        let response: QueryResponse = self
            .with_rotation("ask", |key| async move {
                let request = QueryRequest {
                    image_url: &image.data_url,
                    question: prompt,
                };
                self.post_json("query", &key, &request).await
            })
            .await?;

        debug!("🌐 ask → '{}'", response.answer);
        Ok(response.answer)
    }

    async fn caption(&self, image: &EncodedImage) -> ProviderResult<String> {
        let response: CaptionResponse = self
            .with_rotation("caption", |key| async move {
                let request = CaptionRequest {
                    image_url: &image.data_url,
                    length: "normal",
                };
                self.post_json("caption", &key, &request).await
            })
            .await?;

        Ok(response.caption)
    }
}

// ============================================================================
// TESTS
// ============================================================================
