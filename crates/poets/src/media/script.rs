use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, info_span, warn};

use super::snapshot::{detect_new_files, snapshot_files};
use super::{Generation, MediaError, MediaGenerator, MediaJob};
use crate::config::{MediaConfig, PipelineConfig};
use crate::lifecycle::ArtifactKind;
use crate::recorder::GeneratedFile;
use crate::runner::{CommandRunner, CommandSpec};
use crate::sanitize::{output_tail, redact_path};

/// Settings shared by every script pipeline.
#[derive(Debug, Clone)]
pub struct ScriptSettings {
    pub python: String,
    pub output_root: PathBuf,
    pub queue_size: u32,
    pub timeout: Duration,
    pub comfyui_directory: Option<PathBuf>,
}

impl From<&MediaConfig> for ScriptSettings {
    fn from(media: &MediaConfig) -> Self {
        Self {
            python: media.python.clone(),
            output_root: media.output_directory.clone(),
            queue_size: media.queue_size,
            timeout: Duration::from_secs(media.timeout_secs),
            comfyui_directory: media.comfyui_directory.clone(),
        }
    }
}

/// Runs an exported workflow script:
///
/// `<python> <script> --<prompt_arg> <prompt> --queue-size <n> --output <run_dir>
/// [--comfyui-directory <dir>] <extra_args...>`
///
/// in the script's own directory.
#[derive(Debug)]
pub struct ScriptPipeline {
    artifact_kind: ArtifactKind,
    script: PathBuf,
    prompt_arg: String,
    extra_args: Vec<String>,
    settings: ScriptSettings,
    runner: CommandRunner,
}

impl ScriptPipeline {
    pub fn new(
        artifact_kind: ArtifactKind,
        script: impl Into<PathBuf>,
        prompt_arg: impl Into<String>,
        extra_args: Vec<String>,
        settings: ScriptSettings,
    ) -> Result<Self, MediaError> {
        Ok(Self {
            artifact_kind,
            script: script.into(),
            prompt_arg: prompt_arg.into(),
            extra_args,
            settings,
            runner: CommandRunner::new()?,
        })
    }

    pub fn from_config(media: &MediaConfig, pipeline: &PipelineConfig) -> Result<Self, MediaError> {
        Self::new(
            pipeline.artifact_kind.clone(),
            &pipeline.script,
            &pipeline.prompt_arg,
            pipeline.extra_args.clone(),
            ScriptSettings::from(media),
        )
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    fn script_name(&self) -> String {
        redact_path(&self.script)
    }

    /// `<output_root>/<artifact_kind>/<request_id>_<UTC timestamp>`
    fn create_run_directory(&self, request_id: i64) -> Result<PathBuf, MediaError> {
        let timestamp = Utc::now().format("%Y%m%dT%H%M%S");
        let run_dir = self
            .settings
            .output_root
            .join(self.artifact_kind.as_str())
            .join(format!("{}_{}", request_id, timestamp));
        std::fs::create_dir_all(&run_dir).map_err(|e| MediaError::RunDirectory {
            path: run_dir.clone(),
            source: e,
        })?;
        Ok(run_dir)
    }

    fn build_command(&self, prompt: &str, run_dir: &Path) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.settings.python, self.settings.timeout)
            .arg(self.script.to_string_lossy())
            .arg(format!("--{}", self.prompt_arg))
            .arg(prompt)
            .arg("--queue-size")
            .arg(self.settings.queue_size.to_string())
            .arg("--output")
            .arg(run_dir.to_string_lossy());

        if let Some(dir) = &self.settings.comfyui_directory {
            spec = spec
                .arg("--comfyui-directory")
                .arg(dir.to_string_lossy());
        }
        spec = spec.args(self.extra_args.iter().cloned());

        match self.script.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => spec.current_dir(dir),
            None => spec,
        }
    }

    fn relative_run_directory(&self, run_dir: &Path) -> String {
        run_dir
            .strip_prefix(&self.settings.output_root)
            .unwrap_or(run_dir)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn artifact_metadata(&self, job: &MediaJob, duration: Duration) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("script".to_string(), json!(self.script_name()));
        metadata.insert(
            "duration_seconds".to_string(),
            json!(duration.as_secs_f64()),
        );
        if self.artifact_kind == ArtifactKind::Audio {
            metadata.insert("prompt_text".to_string(), json!(job.prompt));
        }
        if let Some(Value::Object(extra)) = &job.metadata {
            for (key, value) in extra {
                if !value.is_null() {
                    metadata.insert(key.clone(), value.clone());
                }
            }
        }
        metadata
    }
}

impl MediaGenerator for ScriptPipeline {
    fn artifact_kind(&self) -> ArtifactKind {
        self.artifact_kind.clone()
    }

    fn generate(&self, job: &MediaJob) -> Result<Generation, MediaError> {
        let _span = info_span!(
            "media.script",
            request_id = job.request_id,
            script = %self.script_name(),
        )
        .entered();

        if !self.script.is_file() {
            return Err(MediaError::ScriptNotFound(self.script.clone()));
        }

        let run_dir = self.create_run_directory(job.request_id)?;
        let before = snapshot_files(&run_dir)?;

        let spec = self.build_command(&job.prompt, &run_dir);
        debug!(args = spec.args.len(), "Executing workflow");
        let output = self.runner.run(&spec)?;

        let stdout_tail = output_tail(&output.stdout);
        let stderr_tail = output_tail(&output.stderr);

        if !output.success() {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            warn!(code = %code, "Workflow exited unsuccessfully");
            return Err(MediaError::ExitStatus {
                script: self.script_name(),
                code,
                stdout_tail,
                stderr_tail,
            });
        }

        let run_directory = self.relative_run_directory(&run_dir);
        let new_files = detect_new_files(&run_dir, &before)?;
        if new_files.is_empty() {
            return Err(MediaError::NoArtifacts {
                run_directory,
                stdout_tail,
                stderr_tail,
            });
        }

        let metadata = Value::Object(self.artifact_metadata(job, output.duration));
        let files = new_files
            .into_iter()
            .map(|path| GeneratedFile {
                path,
                kind: self.artifact_kind.clone(),
                metadata: metadata.clone(),
            })
            .collect::<Vec<_>>();

        let summary = json!({
            "run_directory": run_directory,
            "duration_seconds": output.duration.as_secs_f64(),
            "artifact_count": files.len(),
            "stdout_tail": stdout_tail,
            "stderr_tail": stderr_tail,
        });

        debug!(count = files.len(), "Workflow produced files");
        Ok(Generation { files, summary })
    }
}
