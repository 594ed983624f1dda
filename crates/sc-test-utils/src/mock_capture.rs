//! Mock capture devices.
//!
//! Every track handed out is recorded so tests can assert it was closed.
//! A capture gate suspends the next device open until released, which
//! lets tests supersede a session while its publish is capturing.

use async_trait::async_trait;
use session_coordinator::capture::CaptureDevices;
use session_coordinator::errors::CaptureError;
use session_coordinator::transport::{LocalTrack, MediaKind, TrackHandle};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Recorded local track.
#[derive(Debug)]
pub struct MockTrack {
    kind: MediaKind,
    muted: AtomicBool,
    close_calls: AtomicUsize,
}

impl MockTrack {
    fn new(kind: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            muted: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
        })
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.close_calls.load(Ordering::SeqCst) > 0
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl LocalTrack for MockTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    fn close(&self) -> Result<(), CaptureError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Releases a gated capture.
pub struct CaptureGate {
    tx: oneshot::Sender<()>,
}

impl CaptureGate {
    pub fn release(self) {
        let _ = self.tx.send(());
    }
}

/// Mock camera and microphone.
pub struct MockDevices {
    camera: AtomicBool,
    microphone: AtomicBool,
    tracks: Mutex<Vec<Arc<MockTrack>>>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    combined_calls: AtomicUsize,
    microphone_calls: AtomicUsize,
}

impl MockDevices {
    /// Camera and microphone both present.
    pub fn new() -> Arc<Self> {
        Self::with_devices(true, true)
    }

    /// Microphone only.
    pub fn without_camera() -> Arc<Self> {
        Self::with_devices(false, true)
    }

    /// No usable device at all.
    pub fn unavailable() -> Arc<Self> {
        Self::with_devices(false, false)
    }

    pub fn with_devices(camera: bool, microphone: bool) -> Arc<Self> {
        Arc::new(Self {
            camera: AtomicBool::new(camera),
            microphone: AtomicBool::new(microphone),
            tracks: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
            combined_calls: AtomicUsize::new(0),
            microphone_calls: AtomicUsize::new(0),
        })
    }

    /// Suspend the next device open until the gate is released.
    pub fn gate_next_capture(&self) -> CaptureGate {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock().unwrap() = Some(rx);
        CaptureGate { tx }
    }

    /// Every track handed out so far.
    pub fn tracks(&self) -> Vec<Arc<MockTrack>> {
        self.tracks.lock().unwrap().clone()
    }

    /// Whether every track handed out has been closed.
    pub fn all_closed(&self) -> bool {
        self.tracks().iter().all(|t| t.is_closed())
    }

    pub fn combined_calls(&self) -> usize {
        self.combined_calls.load(Ordering::SeqCst)
    }

    pub fn microphone_calls(&self) -> usize {
        self.microphone_calls.load(Ordering::SeqCst)
    }

    async fn wait_gate(&self) {
        let gate = self.gate.lock().unwrap().take();
        if let Some(rx) = gate {
            let _ = rx.await;
        }
    }

    fn record(&self, kind: MediaKind) -> TrackHandle {
        let track = MockTrack::new(kind);
        self.tracks.lock().unwrap().push(Arc::clone(&track));
        track
    }
}

#[async_trait]
impl CaptureDevices for MockDevices {
    async fn microphone_and_camera(&self) -> Result<(TrackHandle, TrackHandle), CaptureError> {
        self.combined_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_gate().await;

        if !self.microphone.load(Ordering::SeqCst) {
            return Err(CaptureError::PermissionDenied("microphone".to_string()));
        }
        if !self.camera.load(Ordering::SeqCst) {
            return Err(CaptureError::DeviceNotFound("camera".to_string()));
        }

        Ok((self.record(MediaKind::Audio), self.record(MediaKind::Video)))
    }

    async fn microphone(&self) -> Result<TrackHandle, CaptureError> {
        self.microphone_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_gate().await;

        if !self.microphone.load(Ordering::SeqCst) {
            return Err(CaptureError::PermissionDenied("microphone".to_string()));
        }

        Ok(self.record(MediaKind::Audio))
    }
}
