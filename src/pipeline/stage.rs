use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStage {
    Idle,
    Uploading,
    ExtractingFrames,
    UploadingFrames,
    Inferring,
    PetNotDetected,
    WrongPetConfirmPending,
    Completed,
    Failed,
}

impl AnalysisStage {
    pub fn can_transition_to(self, next: AnalysisStage) -> bool {
        use AnalysisStage::*;

        if next == Failed {
            return self != Failed;
        }
        matches!(
            (self, next),
            (Idle, Uploading)
                | (Uploading, ExtractingFrames)
                | (Uploading, Inferring)
                | (ExtractingFrames, UploadingFrames)
                | (UploadingFrames, Inferring)
                | (Inferring, PetNotDetected)
                | (Inferring, WrongPetConfirmPending)
                | (Inferring, Completed)
                | (WrongPetConfirmPending, Completed)
                | (WrongPetConfirmPending, Idle)
                | (PetNotDetected, Idle)
                | (Completed, Idle)
                | (Failed, Idle)
        )
    }

    pub fn percent(self) -> u8 {
        match self {
            AnalysisStage::Idle | AnalysisStage::Failed => 0,
            AnalysisStage::Uploading => 10,
            AnalysisStage::ExtractingFrames => 20,
            AnalysisStage::UploadingFrames => 40,
            AnalysisStage::Inferring => 70,
            AnalysisStage::WrongPetConfirmPending => 90,
            AnalysisStage::PetNotDetected | AnalysisStage::Completed => 100,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisStage::Idle => "idle",
            AnalysisStage::Uploading => "uploading",
            AnalysisStage::ExtractingFrames => "extracting_frames",
            AnalysisStage::UploadingFrames => "uploading_frames",
            AnalysisStage::Inferring => "inferring",
            AnalysisStage::PetNotDetected => "pet_not_detected",
            AnalysisStage::WrongPetConfirmPending => "wrong_pet_confirm_pending",
            AnalysisStage::Completed => "completed",
            AnalysisStage::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub stage: AnalysisStage,
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Progress {
    fn at(stage: AnalysisStage) -> Self {
        Self {
            stage,
            percent: stage.percent(),
            error: None,
        }
    }
}

/// Publishes the current stage of one analysis attempt.
pub struct ProgressTracker {
    tx: watch::Sender<Progress>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Progress::at(AnalysisStage::Idle));
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Progress {
        self.tx.borrow().clone()
    }

    pub fn stage(&self) -> AnalysisStage {
        self.tx.borrow().stage
    }

    /// Moves to `next` if the state machine allows it. Illegal moves are
    /// logged and ignored.
    pub fn advance(&self, next: AnalysisStage) -> bool {
        let current = self.stage();
        if !current.can_transition_to(next) {
            tracing::warn!(from = current.as_str(), to = next.as_str(), "ignoring illegal stage transition");
            return false;
        }
        self.tx.send_replace(Progress::at(next));
        true
    }

    /// Starts a fresh attempt, whatever the previous one ended in.
    pub fn reset(&self) {
        self.tx.send_replace(Progress::at(AnalysisStage::Idle));
    }

    /// Picks up an attempt that was parked in an earlier request.
    pub fn resume(&self, stage: AnalysisStage) {
        self.tx.send_replace(Progress::at(stage));
    }

    pub fn fail(&self, message: impl Into<String>) {
        self.tx.send_replace(Progress {
            stage: AnalysisStage::Failed,
            percent: 0,
            error: Some(message.into()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AnalysisStage::*;

    #[test]
    fn image_and_video_paths_are_legal() {
        for path in [
            vec![Idle, Uploading, Inferring, Completed, Idle],
            vec![Idle, Uploading, ExtractingFrames, UploadingFrames, Inferring, WrongPetConfirmPending, Completed],
            vec![Idle, Uploading, Inferring, WrongPetConfirmPending, Idle],
            vec![Idle, Uploading, Inferring, PetNotDetected, Idle],
        ] {
            for pair in path.windows(2) {
                assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
            }
        }
    }

    #[test]
    fn shortcuts_are_rejected() {
        assert!(!Idle.can_transition_to(Completed));
        assert!(!Uploading.can_transition_to(UploadingFrames));
        assert!(!Completed.can_transition_to(Inferring));
        assert!(!Failed.can_transition_to(Failed));
        assert!(Inferring.can_transition_to(Failed));
    }

    #[tokio::test]
    async fn subscribers_see_progress_and_failure_resets_percent() {
        let tracker = ProgressTracker::new();
        let mut rx = tracker.subscribe();

        assert!(tracker.advance(Uploading));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().percent, 10);

        assert!(!tracker.advance(Completed));
        assert_eq!(tracker.stage(), Uploading);

        tracker.advance(Inferring);
        tracker.fail("boom");
        let progress = tracker.current();
        assert_eq!(progress.stage, Failed);
        assert_eq!(progress.percent, 0);
        assert_eq!(progress.error.as_deref(), Some("boom"));
    }
}
