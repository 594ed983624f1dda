//! Local capture manager.
//!
//! Acquires the local microphone and camera and publishes them, degrading
//! gracefully:
//!
//! 1. camera + microphone, published together
//! 2. on any failure of (1): microphone only. This is a successful, degraded
//!    outcome, not a failure
//! 3. on failure of (2): [`CaptureFailure::Unavailable`]; nothing is published
//!
//! Tracks acquired by an attempt that fails or is superseded are released
//! before the attempt returns. Once a [`LocalCapture`] is handed to the
//! coordinator, only its `unpublish`/`leave` paths release it.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cleanup::{CleanupReport, CleanupStep};
use crate::errors::{CaptureError, CaptureFailure};
use crate::fence::{SessionToken, Superseded};
use crate::transport::{MediaKind, TrackHandle, Transport};

/// Local media devices.
#[async_trait]
pub trait CaptureDevices: Send + Sync {
    /// Open microphone and camera together. Returns `(audio, video)`.
    async fn microphone_and_camera(&self) -> Result<(TrackHandle, TrackHandle), CaptureError>;

    /// Open the microphone alone.
    async fn microphone(&self) -> Result<TrackHandle, CaptureError>;
}

/// What a local capture carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureKind {
    AudioVideo,
    AudioOnly,
}

impl CaptureKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CaptureKind::AudioVideo => "audio_video",
            CaptureKind::AudioOnly => "audio_only",
        }
    }
}

/// Handles of the published local tracks.
#[derive(Debug)]
pub struct LocalCapture {
    audio: TrackHandle,
    video: Option<TrackHandle>,
}

impl LocalCapture {
    #[must_use]
    pub fn audio(&self) -> &TrackHandle {
        &self.audio
    }

    #[must_use]
    pub fn video(&self) -> Option<&TrackHandle> {
        self.video.as_ref()
    }

    #[must_use]
    pub fn kind(&self) -> CaptureKind {
        if self.video.is_some() {
            CaptureKind::AudioVideo
        } else {
            CaptureKind::AudioOnly
        }
    }

    /// All tracks, audio first.
    #[must_use]
    pub fn tracks(&self) -> Vec<TrackHandle> {
        std::iter::once(Arc::clone(&self.audio))
            .chain(self.video.iter().cloned())
            .collect()
    }

    /// Apply the local mute flag to the audio track.
    pub fn set_muted(&self, muted: bool) {
        self.audio.set_muted(muted);
    }

    /// Close every track without unpublishing.
    ///
    /// Used when a transport leave follows, which drops publications anyway.
    pub fn close(self) -> CleanupReport {
        let mut report = CleanupReport::new();
        for track in self.tracks() {
            report.record(CleanupStep::close(track.kind()), track.close());
        }
        report
    }

    /// Best-effort unpublish of every track, then close them all.
    pub async fn release(self, transport: &dyn Transport) -> CleanupReport {
        let mut report = CleanupReport::new();
        for track in self.tracks() {
            report.record(
                CleanupStep::unpublish(track.kind()),
                transport.unpublish(&track).await,
            );
        }
        report.merge(self.close());
        report
    }
}

/// Why one capture attempt did not produce a capture.
enum AttemptError {
    Superseded(Superseded),
    Failed(CaptureError),
}

/// Acquires and publishes local capture on behalf of the coordinator.
#[derive(Clone)]
pub struct LocalCaptureManager {
    devices: Arc<dyn CaptureDevices>,
    transport: Arc<dyn Transport>,
}

impl LocalCaptureManager {
    #[must_use]
    pub fn new(devices: Arc<dyn CaptureDevices>, transport: Arc<dyn Transport>) -> Self {
        Self { devices, transport }
    }

    /// Acquire and publish local capture for the session behind `token`.
    ///
    /// # Errors
    ///
    /// - [`CaptureFailure::Superseded`] if the session lost the fence; any
    ///   acquired tracks were released.
    /// - [`CaptureFailure::Unavailable`] if both attempts failed.
    pub async fn acquire(&self, token: &SessionToken) -> Result<LocalCapture, CaptureFailure> {
        debug!(
            target: "sc.capture",
            session_id = %token.id(),
            "Attempting camera+mic publish"
        );

        let combined = match self.try_audio_video(token).await {
            Ok(capture) => {
                info!(
                    target: "sc.capture",
                    session_id = %token.id(),
                    "Published camera+mic"
                );
                return Ok(capture);
            }
            Err(AttemptError::Superseded(superseded)) => return Err(superseded.into()),
            Err(AttemptError::Failed(e)) => e,
        };

        warn!(
            target: "sc.capture",
            session_id = %token.id(),
            error = %combined,
            "Camera+mic failed, falling back to mic-only"
        );

        match self.try_audio_only(token).await {
            Ok(capture) => {
                info!(
                    target: "sc.capture",
                    session_id = %token.id(),
                    "Published mic-only"
                );
                Ok(capture)
            }
            Err(AttemptError::Superseded(superseded)) => Err(superseded.into()),
            Err(AttemptError::Failed(audio_only)) => {
                error!(
                    target: "sc.capture",
                    session_id = %token.id(),
                    combined_error = %combined,
                    audio_only_error = %audio_only,
                    "Publish failed, mic-only also failed"
                );
                Err(CaptureFailure::Unavailable {
                    combined,
                    audio_only,
                })
            }
        }
    }

    /// Release a capture whose session went stale before it could be stored.
    pub async fn discard(&self, capture: LocalCapture) -> CleanupReport {
        debug!(
            target: "sc.capture",
            kind = capture.kind().as_str(),
            "Discarding stale capture"
        );
        capture.release(self.transport.as_ref()).await
    }

    async fn try_audio_video(&self, token: &SessionToken) -> Result<LocalCapture, AttemptError> {
        let (audio, video) = self
            .devices
            .microphone_and_camera()
            .await
            .map_err(AttemptError::Failed)?;

        self.publish_captured(
            token,
            LocalCapture {
                audio,
                video: Some(video),
            },
        )
        .await
    }

    async fn try_audio_only(&self, token: &SessionToken) -> Result<LocalCapture, AttemptError> {
        let audio = self
            .devices
            .microphone()
            .await
            .map_err(AttemptError::Failed)?;

        self.publish_captured(token, LocalCapture { audio, video: None })
            .await
    }

    /// Publish freshly captured tracks, releasing them on failure or supersession.
    async fn publish_captured(
        &self,
        token: &SessionToken,
        capture: LocalCapture,
    ) -> Result<LocalCapture, AttemptError> {
        if let Err(superseded) = token.ensure_current("capture_acquired") {
            let _ = capture.close();
            return Err(AttemptError::Superseded(superseded));
        }

        if let Err(e) = self.transport.publish(&capture.tracks()).await {
            let _ = capture.close();
            return Err(AttemptError::Failed(e.into()));
        }

        if let Err(superseded) = token.ensure_current("capture_published") {
            let _ = capture.release(self.transport.as_ref()).await;
            return Err(AttemptError::Superseded(superseded));
        }

        Ok(capture)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug)]
    struct FakeTrack {
        kind: MediaKind,
        closed: AtomicBool,
        muted: AtomicBool,
        fail_close: bool,
    }

    impl FakeTrack {
        fn new(kind: MediaKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                closed: AtomicBool::new(false),
                muted: AtomicBool::new(false),
                fail_close: false,
            })
        }
    }

    impl crate::transport::LocalTrack for FakeTrack {
        fn kind(&self) -> MediaKind {
            self.kind
        }

        fn set_muted(&self, muted: bool) {
            self.muted.store(muted, Ordering::SeqCst);
        }

        fn close(&self) -> Result<(), CaptureError> {
            self.closed.store(true, Ordering::SeqCst);
            if self.fail_close {
                return Err(CaptureError::Track("already ended".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_capture_kind_and_track_order() {
        let mic = FakeTrack::new(MediaKind::Audio);
        let cam = FakeTrack::new(MediaKind::Video);

        let capture = LocalCapture {
            audio: mic.clone(),
            video: Some(cam.clone()),
        };
        assert_eq!(capture.kind(), CaptureKind::AudioVideo);
        let kinds: Vec<MediaKind> = capture.tracks().iter().map(|t| t.kind()).collect();
        assert_eq!(kinds, vec![MediaKind::Audio, MediaKind::Video]);

        let audio_only = LocalCapture {
            audio: mic,
            video: None,
        };
        assert_eq!(audio_only.kind(), CaptureKind::AudioOnly);
        assert!(audio_only.video().is_none());
    }

    #[test]
    fn test_close_closes_every_track() {
        let mic = FakeTrack::new(MediaKind::Audio);
        let cam = FakeTrack::new(MediaKind::Video);
        let capture = LocalCapture {
            audio: mic.clone(),
            video: Some(cam.clone()),
        };

        let report = capture.close();
        assert!(report.is_clean());
        assert!(mic.closed.load(Ordering::SeqCst));
        assert!(cam.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_close_failure_is_reported_not_raised() {
        let mic = Arc::new(FakeTrack {
            kind: MediaKind::Audio,
            closed: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            fail_close: true,
        });
        let capture = LocalCapture {
            audio: mic.clone(),
            video: None,
        };

        let report = capture.close();
        assert_eq!(report.failures().len(), 1);
        assert_eq!(
            report.failures().first().unwrap().step,
            CleanupStep::CloseAudio
        );
        assert!(mic.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_set_muted_targets_audio() {
        let mic = FakeTrack::new(MediaKind::Audio);
        let capture = LocalCapture {
            audio: mic.clone(),
            video: None,
        };

        capture.set_muted(true);
        assert!(mic.muted.load(Ordering::SeqCst));
    }
}
