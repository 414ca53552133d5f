//! Status columns of a request and the transitions between them.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Which of the two composed machines a transition belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Stage 1: structured/textual content generation.
    Generation,
    /// Stage 2: media generation from the Stage 1 payload.
    Media,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Generation => f.write_str("generation"),
            Stage::Media => f.write_str("media"),
        }
    }
}

/// Coarse Stage 1 status (`requests.lifecycle_status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    Unprocessed,
    Processing,
    Completed,
    Failed,
}

impl LifecycleStatus {
    pub const ALL: [LifecycleStatus; 4] = [
        LifecycleStatus::Unprocessed,
        LifecycleStatus::Processing,
        LifecycleStatus::Completed,
        LifecycleStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::Unprocessed => "unprocessed",
            LifecycleStatus::Processing => "processing",
            LifecycleStatus::Completed => "completed",
            LifecycleStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleStatus::Completed | LifecycleStatus::Failed)
    }

    /// Legal Stage 1 moves. Leaving `failed` is an operator action, not ours.
    pub fn can_transition_to(&self, next: LifecycleStatus) -> bool {
        use LifecycleStatus::*;
        matches!(
            (self, next),
            (Unprocessed, Processing) | (Processing, Completed) | (Processing, Failed)
        )
    }

    /// States from which `target` may be entered.
    pub fn predecessors(target: LifecycleStatus) -> Vec<LifecycleStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(target))
            .collect()
    }
}

/// Fine-grained Stage 2 status (`requests.artifact_status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    None,
    Pending,
    Processing,
    Ready,
    Error,
}

impl ArtifactStatus {
    pub const ALL: [ArtifactStatus; 5] = [
        ArtifactStatus::None,
        ArtifactStatus::Pending,
        ArtifactStatus::Processing,
        ArtifactStatus::Ready,
        ArtifactStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactStatus::None => "none",
            ArtifactStatus::Pending => "pending",
            ArtifactStatus::Processing => "processing",
            ArtifactStatus::Ready => "ready",
            ArtifactStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ArtifactStatus::Ready | ArtifactStatus::Error)
    }

    /// Legal Stage 2 moves.
    ///
    /// `error -> error` only refreshes the message; nothing leaves `error`.
    pub fn can_transition_to(&self, next: ArtifactStatus) -> bool {
        use ArtifactStatus::*;
        matches!(
            (self, next),
            (None, Pending)
                | (Pending, Processing)
                | (Processing, Ready)
                | (Processing, Error)
                | (Error, Error)
        )
    }

    /// States from which `target` may be entered.
    pub fn predecessors(target: ArtifactStatus) -> Vec<ArtifactStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(target))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError(String);

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown status '{}'", self.0)
    }
}

impl std::error::Error for ParseStatusError {}

macro_rules! status_impls {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseStatusError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                <$ty>::ALL
                    .into_iter()
                    .find(|status| status.as_str() == s)
                    .ok_or_else(|| ParseStatusError(s.to_string()))
            }
        }

        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

status_impls!(LifecycleStatus);
status_impls!(ArtifactStatus);
