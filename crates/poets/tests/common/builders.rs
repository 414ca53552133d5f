//! Builders for content bodies, configuration files and fake generators.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{json, Map, Value};

use poets::lifecycle::ArtifactKind;
use poets::media::{Generation, MediaError, MediaGenerator, MediaJob};
use poets::recorder::GeneratedFile;

/// Image prompt body in the generator's native field names.
pub fn image_body(scene: &str, tags: &[&str]) -> String {
    json!({
        "scene_description": scene,
        "style_tags": tags,
        "technical_params": {"aspect_ratio": "16:9"},
    })
    .to_string()
}

/// Lyrics body with one verse per entry.
pub fn lyrics_body(title: &str, verses: &[&str]) -> String {
    let structure: Vec<Value> = verses
        .iter()
        .enumerate()
        .map(|(i, lyrics)| json!({"type": "verse", "number": i + 1, "lyrics": lyrics}))
        .collect();
    json!({
        "title": title,
        "genre": "folk",
        "mood": "calm",
        "tempo": "slow",
        "structure": structure,
    })
    .to_string()
}

/// Builder for `poets.json` files.
pub struct ConfigBuilder {
    database_path: PathBuf,
    journal_mode: &'static str,
    batch_size: u32,
    generator: Option<Value>,
    media_enabled: bool,
    output_directory: PathBuf,
    python: String,
    media_timeout_secs: u64,
    pipelines: Map<String, Value>,
}

impl ConfigBuilder {
    pub fn new(root: &Path) -> Self {
        Self {
            database_path: root.join("data").join("poets.db"),
            journal_mode: "wal",
            batch_size: 5,
            generator: None,
            media_enabled: true,
            output_directory: root.join("GeneratedMedia"),
            python: "/bin/sh".to_string(),
            media_timeout_secs: 30,
            pipelines: Map::new(),
        }
    }

    pub fn journal_mode(mut self, mode: &'static str) -> Self {
        self.journal_mode = mode;
        self
    }

    pub fn batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }

    pub fn generator(mut self, program: &str, args: &[&str]) -> Self {
        self.generator = Some(json!({"program": program, "args": args, "timeout_secs": 30}));
        self
    }

    pub fn media_enabled(mut self, enabled: bool) -> Self {
        self.media_enabled = enabled;
        self
    }

    pub fn media_timeout(mut self, secs: u64) -> Self {
        self.media_timeout_secs = secs;
        self
    }

    pub fn pipeline(mut self, kind: &str, artifact_kind: &str, script: &Path) -> Self {
        self.pipelines.insert(
            kind.to_string(),
            json!({"artifact_kind": artifact_kind, "script": script}),
        );
        self
    }

    pub fn build(&self) -> Value {
        let mut value = json!({
            "version": "1.0",
            "database": {
                "path": self.database_path,
                "journal_mode": self.journal_mode,
            },
            "queue": {"batch_size": self.batch_size},
            "media": {
                "enabled": self.media_enabled,
                "output_directory": self.output_directory,
                "python": self.python,
                "timeout_secs": self.media_timeout_secs,
                "pipelines": self.pipelines,
            },
        });
        if let Some(generator) = &self.generator {
            value["generator"] = generator.clone();
        }
        value
    }

    /// Writes the config next to the database and returns the file path.
    pub fn write(&self, root: &Path) -> PathBuf {
        let value = self.build();
        let path = root.join("poets.json");
        std::fs::write(&path, serde_json::to_string_pretty(&value).unwrap()).unwrap();
        path
    }
}

/// Writes an executable-by-interpreter shell script.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

/// Media generator that writes `count` files under the output root.
pub struct FileWritingGenerator {
    pub output_root: PathBuf,
    pub count: usize,
}

impl MediaGenerator for FileWritingGenerator {
    fn artifact_kind(&self) -> ArtifactKind {
        ArtifactKind::Image
    }

    fn generate(&self, job: &MediaJob) -> Result<Generation, MediaError> {
        let run_dir = self
            .output_root
            .join("image")
            .join(format!("{}_fake", job.request_id));
        std::fs::create_dir_all(&run_dir).map_err(|e| MediaError::RunDirectory {
            path: run_dir.clone(),
            source: e,
        })?;

        let mut files = Vec::new();
        for n in 0..self.count {
            let path = run_dir.join(format!("img_{:05}.png", n));
            std::fs::write(&path, job.prompt.as_bytes()).map_err(|e| MediaError::RunDirectory {
                path: path.clone(),
                source: e,
            })?;
            files.push(GeneratedFile {
                path,
                kind: ArtifactKind::Image,
                metadata: json!({"index": n}),
            });
        }
        Ok(Generation {
            files,
            summary: json!({"artifact_count": self.count}),
        })
    }
}

/// Media generator that always times out.
pub struct TimingOutGenerator;

impl MediaGenerator for TimingOutGenerator {
    fn artifact_kind(&self) -> ArtifactKind {
        ArtifactKind::Image
    }

    fn generate(&self, _job: &MediaJob) -> Result<Generation, MediaError> {
        Err(MediaError::TimedOut {
            timeout: Duration::from_secs(600),
            stdout_tail: String::new(),
            stderr_tail: String::new(),
        })
    }
}
