//! Structured Stage 1 payloads, decoded by request kind.
//!
//! The body column is opaque text to the database. Kinds that feed a
//! media pipeline carry a JSON document whose shape depends on the kind;
//! decoding validates that shape and renders the prompt handed to the
//! external generator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lifecycle::RequestKind;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    #[error("Malformed {kind} content: {reason}")]
    Malformed { kind: String, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechnicalParams {
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub mood: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Composition {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub lighting: Option<String>,
}

/// Visual description produced for `image_prompt` requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePrompt {
    #[serde(alias = "prompt")]
    pub scene_description: String,
    #[serde(default, alias = "negative_prompt")]
    pub exclusions: Option<String>,
    #[serde(default)]
    pub style_tags: Vec<String>,
    #[serde(default)]
    pub technical_params: TechnicalParams,
    #[serde(default)]
    pub composition: Composition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LyricSection {
    #[serde(rename = "type")]
    pub section_type: String,
    #[serde(default)]
    pub number: Option<u32>,
    pub lyrics: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MusicalMetadata {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub time_signature: Option<String>,
    #[serde(default)]
    pub vocal_style: Option<String>,
    #[serde(default)]
    pub instrumentation: Vec<String>,
}

/// Song produced for `lyrics_prompt` requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LyricsPrompt {
    pub title: String,
    pub genre: String,
    pub mood: String,
    pub tempo: String,
    #[serde(alias = "structure")]
    pub sectioned_lyrics: Vec<LyricSection>,
    #[serde(default, alias = "metadata")]
    pub musical_metadata: MusicalMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuredContent {
    Text(String),
    Image(ImagePrompt),
    Lyrics(LyricsPrompt),
}

impl StructuredContent {
    /// Text handed to the media generator's prompt argument.
    pub fn media_prompt(&self) -> String {
        match self {
            StructuredContent::Text(text) => text.clone(),
            StructuredContent::Image(image) => {
                if image.style_tags.is_empty() {
                    image.scene_description.clone()
                } else {
                    format!(
                        "{}, {}",
                        image.scene_description,
                        image.style_tags.join(", ")
                    )
                }
            }
            StructuredContent::Lyrics(song) => song
                .sectioned_lyrics
                .iter()
                .map(|section| {
                    let header = match section.number {
                        Some(n) => format!("[{} {}]", section.section_type, n),
                        None => format!("[{}]", section.section_type),
                    };
                    format!("{}\n{}", header, section.lyrics.trim())
                })
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

/// Decodes `body` against the schema selected by `kind`.
pub fn decode(kind: &RequestKind, body: &str) -> Result<StructuredContent, ContentError> {
    let malformed = |reason: String| ContentError::Malformed {
        kind: kind.to_string(),
        reason,
    };

    match kind {
        RequestKind::ImagePrompt => {
            let image: ImagePrompt =
                serde_json::from_str(body).map_err(|e| malformed(e.to_string()))?;
            if image.scene_description.trim().is_empty() {
                return Err(malformed("scene description is empty".to_string()));
            }
            Ok(StructuredContent::Image(image))
        }
        RequestKind::LyricsPrompt => {
            let song: LyricsPrompt =
                serde_json::from_str(body).map_err(|e| malformed(e.to_string()))?;
            if song.sectioned_lyrics.is_empty() {
                return Err(malformed("song has no sections".to_string()));
            }
            Ok(StructuredContent::Lyrics(song))
        }
        RequestKind::Text | RequestKind::Other(_) => Ok(StructuredContent::Text(body.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_image_with_aliases() {
        let body = r#"{
            "prompt": "a lighthouse at dusk",
            "negative_prompt": "people",
            "style_tags": ["oil painting", "warm"],
            "technical_params": {"aspect_ratio": "16:9"}
        }"#;
        let content = decode(&RequestKind::ImagePrompt, body).unwrap();
        let StructuredContent::Image(image) = &content else {
            panic!("expected image content");
        };
        assert_eq!(image.scene_description, "a lighthouse at dusk");
        assert_eq!(image.exclusions.as_deref(), Some("people"));
        assert_eq!(image.technical_params.aspect_ratio.as_deref(), Some("16:9"));
        assert_eq!(
            content.media_prompt(),
            "a lighthouse at dusk, oil painting, warm"
        );
    }

    #[test]
    fn test_decode_image_requires_description() {
        let err = decode(&RequestKind::ImagePrompt, r#"{"style_tags": []}"#).unwrap_err();
        let ContentError::Malformed { kind, reason } = err;
        assert_eq!(kind, "image_prompt");
        assert!(reason.contains("scene_description"), "{}", reason);

        assert!(decode(&RequestKind::ImagePrompt, r#"{"prompt": "  "}"#).is_err());
    }

    #[test]
    fn test_decode_lyrics_and_render() {
        let body = r#"{
            "title": "Night Train",
            "genre": "folk",
            "mood": "wistful",
            "tempo": "slow",
            "structure": [
                {"type": "verse", "number": 1, "lyrics": "Rails hum low\n"},
                {"type": "chorus", "lyrics": "Carry me home"}
            ],
            "metadata": {"key": "D minor", "instrumentation": ["guitar"]}
        }"#;
        let content = decode(&RequestKind::LyricsPrompt, body).unwrap();
        let StructuredContent::Lyrics(song) = &content else {
            panic!("expected lyrics content");
        };
        assert_eq!(song.musical_metadata.key.as_deref(), Some("D minor"));
        assert_eq!(
            content.media_prompt(),
            "[verse 1]\nRails hum low\n\n[chorus]\nCarry me home"
        );
    }

    #[test]
    fn test_decode_lyrics_missing_fields() {
        let err = decode(
            &RequestKind::LyricsPrompt,
            r#"{"title": "t", "genre": "g", "mood": "m", "structure": []}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("tempo"));

        let empty = decode(
            &RequestKind::LyricsPrompt,
            r#"{"title": "t", "genre": "g", "mood": "m", "tempo": "fast", "structure": []}"#,
        );
        assert!(empty.is_err());
    }

    #[test]
    fn test_non_json_is_malformed_for_structured_kinds() {
        assert!(decode(&RequestKind::ImagePrompt, "just words").is_err());
        assert_eq!(
            decode(&RequestKind::Text, "just words").unwrap(),
            StructuredContent::Text("just words".to_string())
        );
    }
}
