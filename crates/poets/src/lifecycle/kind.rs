//! Open string enums for request and artifact kinds.

use std::fmt;

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Discriminator of a request; selects the lifecycle branch and content schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RequestKind {
    Text,
    ImagePrompt,
    LyricsPrompt,
    Other(String),
}

impl RequestKind {
    pub fn as_str(&self) -> &str {
        match self {
            RequestKind::Text => "text",
            RequestKind::ImagePrompt => "image_prompt",
            RequestKind::LyricsPrompt => "lyrics_prompt",
            RequestKind::Other(name) => name,
        }
    }

    /// Structured kinds run Stage 2 after Stage 1 completes.
    pub fn requires_media(&self) -> bool {
        matches!(self, RequestKind::ImagePrompt | RequestKind::LyricsPrompt)
    }
}

impl From<&str> for RequestKind {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "" => RequestKind::Text,
            "image_prompt" => RequestKind::ImagePrompt,
            "lyrics_prompt" => RequestKind::LyricsPrompt,
            other => RequestKind::Other(other.to_string()),
        }
    }
}

impl From<String> for RequestKind {
    fn from(value: String) -> Self {
        RequestKind::from(value.as_str())
    }
}

impl From<RequestKind> for String {
    fn from(kind: RequestKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Kind of a generated media file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ArtifactKind {
    Image,
    Audio,
    Other(String),
}

impl ArtifactKind {
    pub fn as_str(&self) -> &str {
        match self {
            ArtifactKind::Image => "image",
            ArtifactKind::Audio => "audio",
            ArtifactKind::Other(name) => name,
        }
    }

    /// Visual kinds carry a preview path equal to the file path.
    pub fn has_preview(&self) -> bool {
        matches!(self, ArtifactKind::Image)
    }
}

impl From<&str> for ArtifactKind {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "image" => ArtifactKind::Image,
            "audio" | "music" | "voice" => ArtifactKind::Audio,
            other => ArtifactKind::Other(other.to_string()),
        }
    }
}

impl From<String> for ArtifactKind {
    fn from(value: String) -> Self {
        ArtifactKind::from(value.as_str())
    }
}

impl From<ArtifactKind> for String {
    fn from(kind: ArtifactKind) -> Self {
        kind.as_str().to_string()
    }
}

macro_rules! kind_impls {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value.as_str().map(<$ty>::from)
            }
        }
    };
}

kind_impls!(RequestKind);
kind_impls!(ArtifactKind);
