//! Extraction client: send a drawing image to the vision analysis
//! service and return its raw output.
//!
//! This module converts an [`ImagePayload`] into a vision API call and
//! returns the opaque model output. It is intentionally thin — schema
//! knowledge lives in [`crate::prompts`] and validation in
//! [`crate::pipeline::normalize`], so retry and error classification can
//! change without touching either.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 5xx errors from vision APIs are transient and frequent
//! under concurrent load. Exponential backoff
//! (`retry_backoff_ms * 2^attempt`) avoids thundering-herd: with 500 ms
//! base and 3 retries the wait sequence is 500 ms → 1 s → 2 s. Only
//! service-level unavailability is retried; a rejected payload or a
//! malformed response will not improve on a second attempt and
//! propagates immediately. The service is treated as stateless and
//! non-deterministic: no caching of identical requests happens here.

use crate::config::AnalysisConfig;
use crate::error::BomError;
use crate::pipeline::input::ImagePayload;
use crate::prompts::{context_message, DEFAULT_SYSTEM_PROMPT};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// One extraction request: the image plus optional free-text context.
///
/// Created per invocation; never persisted.
pub struct ExtractionRequest {
    pub payload: ImagePayload,
    pub context_text: Option<String>,
}

/// The raw, un-normalized output of one extraction call.
///
/// Opaque until [`crate::pipeline::normalize`] decides it; passed by
/// value to the normalizer.
#[derive(Debug, Clone)]
pub struct RawExtractionResult {
    /// Verbatim model output text.
    pub model_output_text: String,
    /// Confidence reported by the service, when its transport surfaces
    /// one. The schema's own `confidence` field is read at normalization.
    pub confidence_hint: Option<f32>,
    /// When the service produced this output.
    pub extracted_at: DateTime<Utc>,
    /// Token accounting for cost reporting.
    pub input_tokens: usize,
    pub output_tokens: usize,
    /// Retries consumed before success (0 = first attempt succeeded).
    pub retries: u8,
}

/// Send one extraction request to the vision service.
///
/// ## Message Layout
///
/// 1. **System message** — the schema-contract prompt (or caller override)
/// 2. **Context message** *(only when `context_text` is set)* — the
///    caller's free-text hint, sent before the image so the model reads
///    it first
/// 3. **User message** — the drawing as a base64 image attachment (empty
///    text; vision APIs require a user turn, the image carries the content)
///
/// # Errors
/// - [`BomError::ServiceUnavailable`] — after the retry budget is spent
/// - [`BomError::ServiceRejected`] — immediately, no retry
/// - [`BomError::MalformedResponse`] — empty output, no retry
/// - [`BomError::ExtractionTimeout`] — per-call timeout exceeded, no retry
pub async fn extract(
    provider: &Arc<dyn LLMProvider>,
    request: &ExtractionRequest,
    config: &AnalysisConfig,
) -> Result<RawExtractionResult, BomError> {
    let system_prompt = config
        .system_prompt
        .as_deref()
        .unwrap_or(DEFAULT_SYSTEM_PROMPT);

    let mut messages = vec![ChatMessage::system(system_prompt)];

    if let Some(ref context) = request.context_text {
        if !context.is_empty() {
            messages.push(ChatMessage::system(context_message(context)));
        }
    }

    let image = encode_payload(&request.payload);
    messages.push(ChatMessage::user_with_images("", vec![image]));

    let options = build_options(config);
    let api_timeout = Duration::from_secs(config.api_timeout_secs);
    let unit_label = request.payload.source_path.display().to_string();

    let ((response, attempt), started) = {
        let provider = Arc::clone(provider);
        let messages = &messages;
        let options = &options;
        let started = Utc::now();
        let result = retry_with_backoff(
            || {
                let provider = Arc::clone(&provider);
                async move {
                    match timeout(api_timeout, provider.chat(messages, Some(options))).await {
                        Ok(Ok(response)) => Ok(response),
                        Ok(Err(e)) => Err(classify_service_error(&format!("{e}"))),
                        Err(_) => Err(BomError::ExtractionTimeout {
                            secs: api_timeout.as_secs(),
                        }),
                    }
                }
            },
            config.max_retries,
            config.retry_backoff_ms,
            &unit_label,
        )
        .await?;
        (result, started)
    };

    if response.content.trim().is_empty() {
        return Err(BomError::MalformedResponse {
            detail: "service returned empty output".into(),
        });
    }

    debug!(
        "{}: {} input tokens, {} output tokens, attempt {}",
        unit_label,
        response.prompt_tokens,
        response.completion_tokens,
        attempt + 1
    );

    Ok(RawExtractionResult {
        model_output_text: response.content,
        confidence_hint: None,
        extracted_at: started,
        input_tokens: response.prompt_tokens,
        output_tokens: response.completion_tokens,
        retries: attempt,
    })
}

/// Wrap the payload as a base64 data attachment for the vision API.
///
/// `detail: "high"` enables the full image tile budget on GPT-4-class
/// models; without it the small print of BOM tables is lost.
fn encode_payload(payload: &ImagePayload) -> ImageData {
    let b64 = STANDARD.encode(&payload.bytes);
    ImageData::new(b64, payload.content_type.clone()).with_detail("high")
}

/// Build `CompletionOptions` from the analysis config.
fn build_options(config: &AnalysisConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Run `op` with exponential backoff, retrying only retryable errors.
///
/// Returns the success value and the number of retries consumed. A
/// success after retries is indistinguishable from a first-attempt
/// success apart from that counter.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    mut op: F,
    max_retries: u32,
    backoff_ms: u64,
    unit_label: &str,
) -> Result<(T, u8), BomError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BomError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok((value, attempt as u8)),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                let backoff = backoff_ms * 2u64.pow(attempt);
                attempt += 1;
                warn!(
                    "{}: retry {}/{} after {}ms — {}",
                    unit_label, attempt, max_retries, backoff, e
                );
                sleep(Duration::from_millis(backoff)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Map a provider error message onto the service error taxonomy.
///
/// Provider crates surface transport and API errors as display strings,
/// so classification is textual. Rejections (4xx, policy, content
/// filter) are terminal; everything else is treated as a transient
/// service problem and handed to the retry policy.
pub(crate) fn classify_service_error(message: &str) -> BomError {
    let lower = message.to_lowercase();

    let rejected = [
        "400",
        "401",
        "403",
        "404",
        "invalid",
        "unauthorized",
        "forbidden",
        "content_filter",
        "content filter",
        "policy",
        "rejected",
        "too large",
        "unsupported",
    ];
    if rejected.iter().any(|needle| lower.contains(needle)) {
        return BomError::ServiceRejected {
            detail: message.to_string(),
        };
    }

    BomError::ServiceUnavailable {
        detail: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;

    #[test]
    fn build_options_defaults() {
        let config = AnalysisConfig::default();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(4096));
    }

    #[test]
    fn classify_rate_limit_as_unavailable() {
        assert!(classify_service_error("HTTP 429 rate limited").is_retryable());
        assert!(classify_service_error("503 service unavailable").is_retryable());
        assert!(classify_service_error("connection reset by peer").is_retryable());
    }

    #[test]
    fn classify_rejection_as_terminal() {
        assert!(!classify_service_error("HTTP 400 invalid image payload").is_retryable());
        assert!(!classify_service_error("finish_reason=content_filter").is_retryable());
        assert!(!classify_service_error("401 unauthorized").is_retryable());
    }

    #[tokio::test]
    async fn retry_succeeds_on_third_attempt() {
        let calls = StdArc::new(AtomicUsize::new(0));
        let calls_in = StdArc::clone(&calls);

        let (value, retries) = retry_with_backoff(
            move || {
                let calls = StdArc::clone(&calls_in);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(BomError::ServiceUnavailable {
                            detail: "503".into(),
                        })
                    } else {
                        Ok("bom")
                    }
                }
            },
            3,
            1, // keep the test fast
            "test-unit",
        )
        .await
        .unwrap();

        assert_eq!(value, "bom");
        assert_eq!(retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_exhausts_budget() {
        let calls = StdArc::new(AtomicUsize::new(0));
        let calls_in = StdArc::clone(&calls);

        let err = retry_with_backoff(
            move || {
                let calls = StdArc::clone(&calls_in);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(BomError::ServiceUnavailable {
                        detail: "503".into(),
                    })
                }
            },
            2,
            1,
            "test-unit",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, BomError::ServiceUnavailable { .. }));
        // 1 initial attempt + 2 retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let calls = StdArc::new(AtomicUsize::new(0));
        let calls_in = StdArc::clone(&calls);

        let err = retry_with_backoff(
            move || {
                let calls = StdArc::clone(&calls_in);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(BomError::ServiceRejected {
                        detail: "policy".into(),
                    })
                }
            },
            3,
            1,
            "test-unit",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, BomError::ServiceRejected { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_is_not_retried() {
        let calls = StdArc::new(AtomicUsize::new(0));
        let calls_in = StdArc::clone(&calls);

        let err = retry_with_backoff(
            move || {
                let calls = StdArc::clone(&calls_in);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(BomError::ExtractionTimeout { secs: 45 })
                }
            },
            3,
            1,
            "test-unit",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, BomError::ExtractionTimeout { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
