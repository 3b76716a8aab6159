//! HTTP client for the hosted Veo model (Gemini API, long-running operations).
//!
//! - submit: `POST {base}/v1beta/models/{model}:predictLongRunning`
//! - poll: `GET {base}/v1beta/{operation name}`
//! - download: `GET {video uri}&key={key}`
//!
//! Submit and poll authenticate with the `x-goog-api-key` header. The download URI is fetched
//! with the key appended as a query credential, as the file service requires.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};
use url::Url;

use super::provider::{Download, Operation, ProviderError, Submission, VideoProvider};

const API_KEY_HEADER: &str = "x-goog-api-key";
const NOT_FOUND_MESSAGE: &str = "Requested entity was not found";
const DEFAULT_VIDEO_MIME: &str = "video/mp4";

#[derive(Clone)]
pub struct VeoClient {
    client: reqwest::Client,
    base_url: Url,
    model: String,
}

impl VeoClient {
    pub fn new(base_url: Url, model: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            model: model.into(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.base_url
            .join(path)
            .map_err(|e| ProviderError::InvalidResponse(format!("invalid endpoint {path}: {e}")))
    }

    async fn operation_from(response: reqwest::Response) -> Result<Operation, ProviderError> {
        let response = check_status(response).await?;
        let body: OperationResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(body.into())
    }
}

#[derive(Debug, Deserialize)]
struct OperationResponse {
    name: String,
    #[serde(default)]
    done: bool,
    response: Option<OperationResult>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResult {
    generate_video_response: Option<GenerateVideoResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateVideoResponse {
    #[serde(default)]
    generated_samples: Vec<GeneratedSample>,
}

#[derive(Debug, Deserialize)]
struct GeneratedSample {
    video: Option<VideoRef>,
}

#[derive(Debug, Deserialize)]
struct VideoRef {
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

impl From<OperationResponse> for Operation {
    fn from(body: OperationResponse) -> Self {
        let video_uri = body
            .response
            .and_then(|r| r.generate_video_response)
            .and_then(|r| r.generated_samples.into_iter().next())
            .and_then(|sample| sample.video)
            .and_then(|video| video.uri);
        Operation {
            name: body.name,
            done: body.done,
            video_uri,
            error: body.error.map(|e| e.message),
        }
    }
}

/// Map non-success responses onto [`ProviderError`], recognising the "entity not found" case.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ProviderError::NotFound);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.chars().take(200).collect());
    if message.contains(NOT_FOUND_MESSAGE) {
        return Err(ProviderError::NotFound);
    }
    warn!(status = status.as_u16(), "Video provider request failed");
    Err(ProviderError::Http {
        status: status.as_u16(),
        message,
    })
}

fn transport(e: reqwest::Error) -> ProviderError {
    ProviderError::Transport(e.to_string())
}

#[async_trait]
impl VideoProvider for VeoClient {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn submit(&self, api_key: &str, submission: &Submission) -> Result<Operation, ProviderError> {
        let url = self.endpoint(&format!("v1beta/models/{}:predictLongRunning", self.model))?;
        let body = json!({
            "instances": [{
                "prompt": submission.prompt,
                "image": {
                    "bytesBase64Encoded": submission.image_base64,
                    "mimeType": submission.mime_type,
                },
            }],
            "parameters": {
                "aspectRatio": submission.aspect_ratio,
                "resolution": submission.resolution,
                "sampleCount": 1,
            },
        });

        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let operation = Self::operation_from(response).await?;
        debug!(operation = %operation.name, "Submitted generation");
        Ok(operation)
    }

    #[instrument(skip(self, api_key))]
    async fn poll(&self, api_key: &str, operation: &str) -> Result<Operation, ProviderError> {
        let url = self.endpoint(&format!("v1beta/{operation}"))?;
        let response = self
            .client
            .get(url)
            .header(API_KEY_HEADER, api_key)
            .send()
            .await
            .map_err(transport)?;
        Self::operation_from(response).await
    }

    #[instrument(skip_all)]
    async fn download(&self, api_key: &str, uri: &str) -> Result<Download, ProviderError> {
        let mut url = Url::parse(uri).map_err(|e| ProviderError::InvalidResponse(format!("invalid video URI: {e}")))?;
        url.query_pairs_mut().append_pair("key", api_key);

        let response = self.client.get(url).send().await.map_err(transport)?;
        let response = check_status(response).await?;
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .filter(|value| value.starts_with("video/"))
            .unwrap_or(DEFAULT_VIDEO_MIME)
            .to_string();
        let bytes = response.bytes().await.map_err(transport)?;
        debug!(len = bytes.len(), "Downloaded video");
        Ok(Download { bytes, mime_type })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{AspectRatio, Resolution};
    use crate::test_utils::install_crypto_provider;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> VeoClient {
        install_crypto_provider();
        VeoClient::new(Url::parse(&server.uri()).unwrap(), "veo-test").unwrap()
    }

    fn submission() -> Submission {
        Submission {
            prompt: "a cat waves".to_string(),
            image_base64: "aW1n".to_string(),
            mime_type: "image/png".to_string(),
            aspect_ratio: AspectRatio::Portrait,
            resolution: Resolution::FullHd,
        }
    }

    #[tokio::test]
    async fn test_submit_sends_key_header_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/veo-test:predictLongRunning"))
            .and(header("x-goog-api-key", "k1"))
            .and(body_partial_json(json!({
                "instances": [{"prompt": "a cat waves", "image": {"bytesBase64Encoded": "aW1n", "mimeType": "image/png"}}],
                "parameters": {"aspectRatio": "9:16", "resolution": "1080p", "sampleCount": 1}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "models/veo-test/operations/op1"})))
            .expect(1)
            .mount(&server)
            .await;

        let operation = client(&server).submit("k1", &submission()).await.unwrap();

        assert_eq!(operation.name, "models/veo-test/operations/op1");
        assert!(!operation.done);
    }

    #[tokio::test]
    async fn test_poll_extracts_first_video_uri() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1beta/models/veo-test/operations/op1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "models/veo-test/operations/op1",
                "done": true,
                "response": {
                    "generateVideoResponse": {
                        "generatedSamples": [
                            {"video": {"uri": "https://files.example.com/v1?alt=media"}},
                            {"video": {"uri": "https://files.example.com/v2?alt=media"}}
                        ]
                    }
                }
            })))
            .mount(&server)
            .await;

        let operation = client(&server)
            .poll("k1", "models/veo-test/operations/op1")
            .await
            .unwrap();

        assert!(operation.done);
        assert_eq!(operation.video_uri.as_deref(), Some("https://files.example.com/v1?alt=media"));
    }

    #[tokio::test]
    async fn test_poll_surfaces_operation_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1beta/ops/bad"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "ops/bad",
                "done": true,
                "error": {"code": 3, "message": "image rejected by safety filter"}
            })))
            .mount(&server)
            .await;

        let operation = client(&server).poll("k1", "ops/bad").await.unwrap();

        assert!(operation.video_uri.is_none());
        assert_eq!(operation.error.as_deref(), Some("image rejected by safety filter"));
    }

    #[tokio::test]
    async fn test_download_appends_key_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/v1"))
            .and(query_param("alt", "media"))
            .and(query_param("key", "k1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "video/mp4")
                    .set_body_bytes(b"video".to_vec()),
            )
            .mount(&server)
            .await;

        let uri = format!("{}/files/v1?alt=media", server.uri());
        let download = client(&server).download("k1", &uri).await.unwrap();

        assert_eq!(&download.bytes[..], b"video");
        assert_eq!(download.mime_type, "video/mp4");
    }

    #[tokio::test]
    async fn test_download_not_found_variants() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/forbidden"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": 400, "message": "Requested entity was not found."}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/broken"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = client(&server);
        let gone = client.download("k", &format!("{}/files/gone?alt=media", server.uri())).await;
        assert!(matches!(gone, Err(ProviderError::NotFound)));

        let forbidden = client
            .download("k", &format!("{}/files/forbidden?alt=media", server.uri()))
            .await;
        assert!(matches!(forbidden, Err(ProviderError::NotFound)));

        let broken = client.download("k", &format!("{}/files/broken?alt=media", server.uri())).await;
        assert!(matches!(broken, Err(ProviderError::Http { status: 500, .. })));
    }
}
