use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AppError, Result};

/// Lifecycle of a photo from slot reservation to display-ready.
///
/// ```text
/// pending --UrlIssued--> uploading --ObjectVerified--> awaiting_completion
///     --MetadataRecorded--> variants_pending --VariantsStored--> ready
/// ```
///
/// `error` is reachable from every state except `ready`. Completion may be
/// retried from any state past `uploading`, re-entering at
/// `awaiting_completion`. That includes `awaiting_completion` itself, where an
/// interrupted completion leaves the photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Pending,
    Uploading,
    AwaitingCompletion,
    VariantsPending,
    Ready,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadEvent {
    UrlIssued,
    ObjectVerified,
    MetadataRecorded,
    VariantsStored,
    Failed,
}

impl UploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadState::Pending => "pending",
            UploadState::Uploading => "uploading",
            UploadState::AwaitingCompletion => "awaiting_completion",
            UploadState::VariantsPending => "variants_pending",
            UploadState::Ready => "ready",
            UploadState::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(UploadState::Pending),
            "uploading" => Some(UploadState::Uploading),
            "awaiting_completion" => Some(UploadState::AwaitingCompletion),
            "variants_pending" => Some(UploadState::VariantsPending),
            "ready" => Some(UploadState::Ready),
            "error" => Some(UploadState::Error),
            _ => None,
        }
    }

    /// The original is in the store and its metadata is recorded
    pub fn is_completed(&self) -> bool {
        matches!(self, UploadState::VariantsPending | UploadState::Ready)
    }

    /// Next state for `event`, or `None` when the transition is not allowed
    pub fn next(self, event: UploadEvent) -> Option<UploadState> {
        use UploadEvent::*;
        use UploadState::*;

        match (self, event) {
            (Pending, UrlIssued) => Some(Uploading),
            (Uploading | AwaitingCompletion | VariantsPending | Ready | Error, ObjectVerified) => Some(AwaitingCompletion),
            (AwaitingCompletion, MetadataRecorded) => Some(VariantsPending),
            (VariantsPending, VariantsStored) => Some(Ready),
            (Ready, Failed) => None,
            (_, Failed) => Some(Error),
            _ => None,
        }
    }

    pub fn transition(self, event: UploadEvent) -> Result<UploadState> {
        self.next(event).ok_or_else(|| {
            AppError::Conflict(format!(
                "Upload cannot go from {} on {:?}",
                self.as_str(),
                event
            ))
        })
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// POST /uploads/init
#[derive(Debug, Deserialize)]
pub struct InitUploadRequest {
    pub filename: String,
    pub size: i64,
    pub mime: String,
    pub sha256: String,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InitUploadResponse {
    #[serde(rename_all = "camelCase")]
    Created {
        put_url: String,
        photo_id: String,
        key: String,
    },
    #[serde(rename_all = "camelCase")]
    Duplicate { duplicate: bool, photo_id: String },
}

impl InitUploadResponse {
    pub fn duplicate(photo_id: String) -> Self {
        InitUploadResponse::Duplicate {
            duplicate: true,
            photo_id,
        }
    }

    pub fn photo_id(&self) -> &str {
        match self {
            InitUploadResponse::Created { photo_id, .. } => photo_id,
            InitUploadResponse::Duplicate { photo_id, .. } => photo_id,
        }
    }
}

/// POST /uploads/complete
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    pub photo_id: String,
    pub key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadResponse {
    pub success: bool,
    pub photo_id: String,
    pub status: UploadState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use UploadEvent::*;
    use UploadState::*;

    const ALL: [UploadState; 6] = [Pending, Uploading, AwaitingCompletion, VariantsPending, Ready, Error];

    #[test]
    fn test_happy_path() {
        let mut state = Pending;
        for event in [UrlIssued, ObjectVerified, MetadataRecorded, VariantsStored] {
            state = state.transition(event).unwrap();
        }
        assert_eq!(state, Ready);
    }

    #[test]
    fn test_error_reachable_from_non_terminal_states() {
        for state in ALL {
            let next = state.next(Failed);
            if state == Ready {
                assert_eq!(next, None);
            } else {
                assert_eq!(next, Some(Error), "{} should fail into error", state);
            }
        }
    }

    #[test]
    fn test_completion_retry_entry_points() {
        for state in ALL {
            let allowed = matches!(state, Uploading | AwaitingCompletion | VariantsPending | Ready | Error);
            assert_eq!(state.next(ObjectVerified).is_some(), allowed, "{}", state);
        }
    }

    #[test]
    fn test_skipping_steps_is_rejected() {
        assert!(Pending.transition(ObjectVerified).is_err());
        assert!(Uploading.transition(MetadataRecorded).is_err());
        assert!(AwaitingCompletion.transition(VariantsStored).is_err());
        assert!(Ready.transition(UrlIssued).is_err());
        assert!(matches!(
            Pending.transition(VariantsStored),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn test_state_names_round_trip() {
        for state in ALL {
            assert_eq!(UploadState::from_str(state.as_str()), Some(state));
        }
        assert_eq!(UploadState::from_str("done"), None);
    }

    #[test]
    fn test_init_response_shapes() {
        let created = serde_json::to_value(InitUploadResponse::Created {
            put_url: "https://bucket/put".into(),
            photo_id: "p1".into(),
            key: "orig/g/p1.jpg".into(),
        })
        .unwrap();
        assert_eq!(
            created,
            serde_json::json!({"putUrl": "https://bucket/put", "photoId": "p1", "key": "orig/g/p1.jpg"})
        );

        let dup = serde_json::to_value(InitUploadResponse::duplicate("p1".into())).unwrap();
        assert_eq!(dup, serde_json::json!({"duplicate": true, "photoId": "p1"}));
    }
}
