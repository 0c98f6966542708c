use mediaq_core::core::events::{ErrorKind, QueueStatus};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SkippedUrl {
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("all {} submitted urls were skipped", .skipped.len())]
    AllDuplicates { skipped: Vec<SkippedUrl> },

    #[error("download {0} not found")]
    NotFound(Uuid),

    #[error("download {id} has used its retry budget ({retry_count}/{max_retries})")]
    RetryExceeded {
        id: Uuid,
        retry_count: u32,
        max_retries: u32,
    },

    #[error("cannot {action} download {id} while it is {status}")]
    InvalidState {
        id: Uuid,
        action: &'static str,
        status: QueueStatus,
    },

    #[error("failed to start download engine: {0}")]
    Spawn(String),
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::AllDuplicates { .. } => ErrorKind::Duplicate,
            QueueError::NotFound(_) => ErrorKind::NotFound,
            QueueError::RetryExceeded { .. } => ErrorKind::RetryExceeded,
            QueueError::InvalidState { .. } => ErrorKind::InvalidState,
            QueueError::Spawn(_) => ErrorKind::SpawnError,
        }
    }
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_wire_names() {
        let id = Uuid::new_v4();
        assert_eq!(QueueError::NotFound(id).kind().as_str(), "not_found");
        assert_eq!(
            QueueError::RetryExceeded {
                id,
                retry_count: 3,
                max_retries: 3
            }
            .kind()
            .as_str(),
            "retry_exceeded"
        );
        assert_eq!(QueueError::Spawn("boom".into()).kind().as_str(), "spawn_error");
    }

    #[test]
    fn all_duplicates_message_counts_urls() {
        let err = QueueError::AllDuplicates {
            skipped: vec![
                SkippedUrl {
                    url: "a".into(),
                    reason: "x".into(),
                },
                SkippedUrl {
                    url: "b".into(),
                    reason: "y".into(),
                },
            ],
        };
        assert_eq!(err.to_string(), "all 2 submitted urls were skipped");
    }
}
