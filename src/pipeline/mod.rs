//! One analysis attempt, from the selected file to a stored result.
//!
//! Order matters: the guest gate and the rate limit are claimed before any
//! network call, detection runs before identity, and nothing is stored until
//! the analysis itself succeeds. A guest's claim is handed back when the
//! attempt stores nothing.

pub mod error;
pub mod guest;
pub mod outcome;
pub mod prompts;
pub mod rate_limit;
pub mod stage;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Instrument;
use uuid::Uuid;

use crate::backend::{Analysis, Backend, BackendError, LlmRequest, Pet, Records};
use crate::media::compress::compress_on_blocking_pool;
use crate::media::video::{extract_frames, VideoProbe};
use crate::media::{select_file, MediaFile, MediaKind, SelectedMedia};
use crate::metrics;
use crate::retry::{retry_with_backoff, retry_with_timeout, RetryPolicy};
use crate::store::{pending_analysis_key, ClientState};

pub use error::AnalysisError;
pub use guest::GuestGate;
pub use outcome::{AnalysisOutcome, ExpectedPet};
pub use rate_limit::{RateLimitStatus, RateLimiter};
pub use stage::{AnalysisStage, Progress, ProgressTracker};

use outcome::{analysis_schema, detection_schema, identity_schema, interpret_detection, interpret_identity, normalize_analysis};

/// How long a wrong-pet attempt waits for the owner's decision.
pub const PENDING_TTL_MINUTES: i64 = 60;

/// Per attempt; a hung model call is retried like a gateway timeout.
const INFERENCE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub file: MediaFile,
    pub pet_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UploadedMedia {
    kind: MediaKind,
    urls: Vec<String>,
}

/// Parked between the mismatch and the owner's answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingAnalysis {
    expected: ExpectedPet,
    media: UploadedMedia,
    created_at: DateTime<Utc>,
}

pub struct AnalysisPipeline {
    backend: Arc<dyn Backend>,
    probe: Arc<dyn VideoProbe>,
    state: ClientState,
    signed_in: bool,
    limiter: RateLimiter,
    progress: ProgressTracker,
}

impl AnalysisPipeline {
    /// `signed_in` comes from the session alone; the account itself is never
    /// fetched before the gates have admitted the attempt.
    pub fn new(backend: Arc<dyn Backend>, probe: Arc<dyn VideoProbe>, state: ClientState, signed_in: bool) -> Self {
        Self {
            backend,
            probe,
            state,
            signed_in,
            limiter: RateLimiter::default(),
            progress: ProgressTracker::new(),
        }
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    fn authenticated(&self) -> bool {
        self.signed_in
    }

    pub async fn analyze(&self, request: AnalysisRequest, now: DateTime<Utc>) -> Result<AnalysisOutcome, AnalysisError> {
        let started = Instant::now();
        let span = tracing::info_span!(
            "analysis",
            device_id = %self.state.device_id(),
            pet_id = ?request.pet_id,
            file_name = %request.file.file_name
        );
        let result = self
            .with_guest_claim(self.run(request, now))
            .instrument(span)
            .await;
        self.finish(&result, started);
        result
    }

    /// Resolves a wrong-pet attempt: `proceed` analyzes it anyway, otherwise
    /// it is dropped.
    pub async fn confirm(&self, attempt_id: Uuid, proceed: bool, now: DateTime<Utc>) -> Result<AnalysisOutcome, AnalysisError> {
        let started = Instant::now();
        let span = tracing::info_span!("analysis_confirm", %attempt_id, proceed);
        let attempt = self.run_confirm(attempt_id, proceed, now);
        let result = if proceed {
            self.with_guest_claim(attempt).instrument(span).await
        } else {
            attempt.instrument(span).await
        };
        self.finish(&result, started);
        result
    }

    fn finish(&self, result: &Result<AnalysisOutcome, AnalysisError>, started: Instant) {
        let label = match result {
            Ok(outcome) => outcome.label(),
            Err(e) => e.outcome_label(),
        };
        metrics::record_analysis_outcome(label);
        metrics::record_analysis_duration(started.elapsed().as_secs_f64(), label);

        match result {
            Ok(_) => tracing::info!(outcome = label, "analysis finished"),
            Err(e) => {
                tracing::warn!(outcome = label, kind = ?e.kind(), error = %e, "analysis failed");
                self.progress.fail(e.user_message());
            }
        }
    }

    /// Runs `attempt` holding the guest's free analysis. Anything short of a
    /// stored analysis gives it back.
    async fn with_guest_claim<F>(&self, attempt: F) -> Result<AnalysisOutcome, AnalysisError>
    where
        F: Future<Output = Result<AnalysisOutcome, AnalysisError>>,
    {
        let gate = GuestGate::new(&self.state);
        if !gate.try_claim(self.authenticated()).await? {
            metrics::increment_guest_blocked();
            return Err(AnalysisError::GuestLimitReached);
        }

        let result = attempt.await;
        if !matches!(result, Ok(AnalysisOutcome::Completed { .. })) {
            if let Err(e) = gate.release(self.authenticated()).await {
                tracing::error!(device_id = %self.state.device_id(), error = %e, "could not release guest claim");
            }
        }
        result
    }

    async fn run(&self, request: AnalysisRequest, now: DateTime<Utc>) -> Result<AnalysisOutcome, AnalysisError> {
        let AnalysisRequest { file, pet_id } = request;
        self.progress.reset();

        let selected = select_file(file, self.probe.as_ref()).await?;

        let limit = self.limiter.check_and_record(&self.state, now).await?;
        if !limit.allowed {
            metrics::increment_rate_limited();
            return Err(AnalysisError::RateLimited {
                retry_after_seconds: limit.reset_in_seconds.max(1),
            });
        }

        let expected = match pet_id {
            Some(id) => {
                let pet: Pet = Records::new(self.backend.as_ref()).get(&id).await?;
                Some(ExpectedPet {
                    description: pet.describe(now.date_naive()),
                    id: pet.id,
                    name: pet.name,
                })
            }
            None => None,
        };

        self.progress.advance(AnalysisStage::Uploading);
        let media = self.upload(selected).await?;

        self.progress.advance(AnalysisStage::Inferring);
        let detection = interpret_detection(
            self.infer(
                prompts::detection_prompt(media.kind, media.urls.len()),
                &media,
                detection_schema(),
            )
            .await?,
        );
        if !detection.pet_detected {
            self.progress.advance(AnalysisStage::PetNotDetected);
            return Ok(AnalysisOutcome::PetNotDetected {
                message: detection.message,
            });
        }

        if let Some(expected) = &expected {
            let identity = interpret_identity(
                self.infer(
                    prompts::identity_prompt(media.kind, media.urls.len(), &expected.name, &expected.description),
                    &media,
                    identity_schema(),
                )
                .await?,
            );
            if !identity.matches {
                return self.park(expected.clone(), media, identity, now).await;
            }
        }

        let analysis = self.complete(expected.as_ref(), &media).await?;
        Ok(AnalysisOutcome::Completed { analysis })
    }

    async fn park(
        &self,
        expected: ExpectedPet,
        media: UploadedMedia,
        identity: outcome::IdentityCheck,
        now: DateTime<Utc>,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let attempt_id = Uuid::new_v4();
        let pending = PendingAnalysis {
            expected: expected.clone(),
            media,
            created_at: now,
        };
        self.state
            .set_json(&pending_analysis_key(&attempt_id), &pending)
            .await?;
        self.progress.advance(AnalysisStage::WrongPetConfirmPending);

        tracing::info!(%attempt_id, expected = %expected.name, detected = %identity.detected_description, "waiting for owner confirmation");
        Ok(AnalysisOutcome::WrongPetDetected {
            attempt_id,
            expected,
            detected: identity.detected_description,
            reason: identity.reason,
        })
    }

    async fn run_confirm(&self, attempt_id: Uuid, proceed: bool, now: DateTime<Utc>) -> Result<AnalysisOutcome, AnalysisError> {
        let key = pending_analysis_key(&attempt_id);
        let pending: PendingAnalysis = self
            .state
            .get_json(&key)
            .await?
            .ok_or(AnalysisError::PendingNotFound)?;
        self.state.clear(&key).await?;

        if now - pending.created_at > Duration::minutes(PENDING_TTL_MINUTES) {
            return Err(AnalysisError::PendingNotFound);
        }

        self.progress.resume(AnalysisStage::WrongPetConfirmPending);
        if !proceed {
            self.progress.advance(AnalysisStage::Idle);
            return Ok(AnalysisOutcome::Cancelled);
        }

        let analysis = self.complete(Some(&pending.expected), &pending.media).await?;
        Ok(AnalysisOutcome::Completed { analysis })
    }

    async fn upload(&self, selected: SelectedMedia) -> Result<UploadedMedia, AnalysisError> {
        match selected.kind {
            MediaKind::Image => {
                let file = compress_on_blocking_pool(selected.file).await;
                let url = retry_with_backoff(&RetryPolicy::upload(), "upload_file", || {
                    self.backend.upload_file(&file)
                })
                .instrument(tracing::info_span!("upload_image"))
                .await?;
                metrics::increment_uploads("image");
                Ok(UploadedMedia {
                    kind: MediaKind::Image,
                    urls: vec![url],
                })
            }
            MediaKind::Video => {
                self.progress.advance(AnalysisStage::ExtractingFrames);
                let duration = selected.duration_seconds.unwrap_or_default();
                let frames = extract_frames(self.probe.as_ref(), &selected.file, duration)
                    .instrument(tracing::info_span!("extract_frames"))
                    .await?;

                self.progress.advance(AnalysisStage::UploadingFrames);
                let policy = RetryPolicy::frame_upload();
                let uploads = frames.iter().map(|frame| {
                    retry_with_backoff(&policy, "upload_frame", move || self.backend.upload_file(frame))
                });
                let urls = join_all(uploads)
                    .instrument(tracing::info_span!("upload_frames", count = frames.len()))
                    .await
                    .into_iter()
                    .collect::<Result<Vec<_>, _>>()?;
                for _ in &urls {
                    metrics::increment_uploads("frame");
                }
                Ok(UploadedMedia {
                    kind: MediaKind::Video,
                    urls,
                })
            }
        }
    }

    async fn infer(&self, prompt: String, media: &UploadedMedia, schema: Value) -> Result<Value, BackendError> {
        let request = LlmRequest {
            prompt,
            file_urls: media.urls.clone(),
            response_json_schema: schema,
        };
        retry_with_timeout(&RetryPolicy::inference(), "invoke_llm", INFERENCE_TIMEOUT, || {
            self.backend.invoke_llm(&request)
        })
        .await
    }

    async fn complete(&self, expected: Option<&ExpectedPet>, media: &UploadedMedia) -> Result<Analysis, AnalysisError> {
        let prompt = prompts::analysis_prompt(
            media.kind,
            media.urls.len(),
            expected.map(|p| (p.name.as_str(), p.description.as_str())),
        );
        let normalized = normalize_analysis(self.infer(prompt, media, analysis_schema()).await?);

        let first = media.urls.first().cloned();
        let (image_url, video_url) = match media.kind {
            MediaKind::Image => (first, None),
            MediaKind::Video => (None, first),
        };
        let record = normalized.into_record(expected.map(|p| p.id.clone()), image_url, video_url);
        let created = Records::<Analysis>::new(self.backend.as_ref()).create(&record).await?;

        self.progress.advance(AnalysisStage::Completed);

        tracing::info!(
            analysis_id = %created.id,
            emotion = %created.emotion_detected,
            confidence = created.confidence_level,
            "analysis stored"
        );
        Ok(created)
    }
}
