//! End-to-end queue runs driven from a config file, with `/bin/sh` scripts
//! standing in for the content generator and the media workflows.

#![cfg(unix)]

mod common;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use assert_fs::prelude::*;
use assert_fs::TempDir;
use serde_json::json;

use common::ConfigBuilder;
use poets::config::load_config;
use poets::lifecycle::{ArtifactKind, ArtifactStatus, LifecycleStatus, RequestKind};
use poets::QueueService;

const GENERATOR: &str = r#"
case "$2" in
  image_prompt) printf '{"scene_description": "%s", "style_tags": ["ink"]}' "$4" ;;
  lyrics_prompt) printf '{"title": "%s", "genre": "folk", "mood": "calm", "tempo": "slow", "structure": [{"type": "verse", "lyrics": "la la"}]}' "$4" ;;
  *) printf 'A poem about %s' "$4" ;;
esac
"#;

const WORKFLOW: &str = r#"
while [ $# -gt 0 ]; do
  case "$1" in
    --output) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
echo "rendering into $out"
printf 'a' > "$out/ComfyUI_00001_.png"
printf 'b' > "$out/ComfyUI_00002_.png"
"#;

const FAILING_WORKFLOW: &str = r#"
echo "CUDA out of memory" >&2
exit 3
"#;

const SLOW_WORKFLOW: &str = "echo 'sampler stalled' >&2\nsleep 10\n";

const SILENT_WORKFLOW: &str = "echo nothing to do\n";

fn script(temp: &TempDir, name: &str, body: &str) -> PathBuf {
    temp.child("scripts").create_dir_all().unwrap();
    let child = temp.child("scripts").child(name);
    child.write_str(body).unwrap();
    child.path().to_path_buf()
}

fn service(temp: &TempDir, builder: ConfigBuilder) -> QueueService {
    let path = builder.write(temp.path());
    QueueService::from_config(load_config(&path).unwrap()).unwrap()
}

#[test]
fn test_full_run_produces_content_and_media() {
    let temp = TempDir::new().unwrap();
    let generator = script(&temp, "generate.sh", GENERATOR);
    let workflow = script(&temp, "image_workflow.sh", WORKFLOW);
    let service = service(
        &temp,
        ConfigBuilder::new(temp.path())
            .generator("/bin/sh", &[generator.to_str().unwrap()])
            .pipeline("image_prompt", "image", &workflow),
    );

    let poem = service.enqueue("autumn", RequestKind::Text, None).unwrap();
    let picture = service
        .enqueue(
            "a paper boat",
            RequestKind::ImagePrompt,
            Some(json!({"campaign": "spring"})),
        )
        .unwrap();

    let report = service.run_queue().unwrap();
    assert_eq!(report.produced.succeeded, 2);
    assert_eq!(report.consumed.succeeded, 1);

    let status = service.status(poem).unwrap().unwrap();
    assert_eq!(status.request.lifecycle_status, LifecycleStatus::Completed);
    assert_eq!(status.request.artifact_status, ArtifactStatus::None);
    assert_eq!(status.content.unwrap().body, "A poem about autumn");

    let status = service.status(picture).unwrap().unwrap();
    assert_eq!(status.request.artifact_status, ArtifactStatus::Ready);
    assert_eq!(status.artifacts.len(), 2);
    for artifact in &status.artifacts {
        assert_eq!(artifact.artifact_kind, ArtifactKind::Image);
        assert!(artifact.file_path.starts_with(&format!("image/{}_", picture)));
        assert!(artifact.file_path.ends_with(".png"));
        assert_eq!(artifact.generation_metadata["campaign"], "spring");
        assert_eq!(artifact.generation_metadata["script"], "image_workflow.sh");
        assert!(temp
            .child("GeneratedMedia")
            .child(&artifact.file_path)
            .path()
            .is_file());
    }
    let summary = status.request.artifact_metadata.unwrap();
    assert_eq!(summary["artifact_count"], 2);
    assert!(summary["stdout_tail"]
        .as_str()
        .unwrap()
        .starts_with("rendering into"));

    // the lock is released and a second run finds nothing to do
    let again = service.run_queue().unwrap();
    assert!(again.produced.is_empty());
    assert!(again.consumed.is_empty());
}

/// One Stage 2 failure case and what it must leave on the request.
struct FailureCase {
    name: &'static str,
    workflow: &'static str,
    timeout_secs: u64,
    expected_message: &'static str,
}

const FAILURE_CASES: &[FailureCase] = &[
    FailureCase {
        name: "non_zero_exit",
        workflow: FAILING_WORKFLOW,
        timeout_secs: 30,
        expected_message: "CUDA out of memory",
    },
    FailureCase {
        name: "timeout",
        workflow: SLOW_WORKFLOW,
        timeout_secs: 1,
        expected_message: "timed out after 1s: sampler stalled",
    },
    FailureCase {
        name: "no_files",
        workflow: SILENT_WORKFLOW,
        timeout_secs: 30,
        expected_message: "No artifacts",
    },
];

#[test]
fn test_workflow_failures_mark_error() {
    for case in FAILURE_CASES {
        let temp = TempDir::new().unwrap();
        let generator = script(&temp, "generate.sh", GENERATOR);
        let workflow = script(&temp, "workflow.sh", case.workflow);
        let service = service(
            &temp,
            ConfigBuilder::new(temp.path())
                .generator("/bin/sh", &[generator.to_str().unwrap()])
                .pipeline("image_prompt", "image", &workflow)
                .media_timeout(case.timeout_secs),
        );

        let id = service
            .enqueue("a storm", RequestKind::ImagePrompt, None)
            .unwrap();
        let report = service.run_queue().unwrap();
        assert_eq!(report.consumed.failed, 1, "{}", case.name);

        let status = service.status(id).unwrap().unwrap();
        assert_eq!(status.request.lifecycle_status, LifecycleStatus::Completed, "{}", case.name);
        assert_eq!(status.request.artifact_status, ArtifactStatus::Error, "{}", case.name);
        let message = status.request.error_message.unwrap();
        assert!(
            message.contains(case.expected_message),
            "{}: {}",
            case.name,
            message
        );
        assert!(status.artifacts.is_empty(), "{}", case.name);
    }
}

#[test]
fn test_kind_without_pipeline_stays_pending() {
    let temp = TempDir::new().unwrap();
    let generator = script(&temp, "generate.sh", GENERATOR);
    let service = service(
        &temp,
        ConfigBuilder::new(temp.path()).generator("/bin/sh", &[generator.to_str().unwrap()]),
    );

    let id = service
        .enqueue("a long road", RequestKind::LyricsPrompt, None)
        .unwrap();
    let report = service.run_queue().unwrap();
    assert_eq!(report.produced.succeeded, 1);
    assert!(report.consumed.is_empty());

    let status = service.status(id).unwrap().unwrap();
    assert_eq!(status.request.artifact_status, ArtifactStatus::Pending);
}

#[test]
fn test_media_disabled_leaves_stage_two_alone() {
    let temp = TempDir::new().unwrap();
    let generator = script(&temp, "generate.sh", GENERATOR);
    let workflow = script(&temp, "image_workflow.sh", WORKFLOW);
    let service = service(
        &temp,
        ConfigBuilder::new(temp.path())
            .generator("/bin/sh", &[generator.to_str().unwrap()])
            .pipeline("image_prompt", "image", &workflow)
            .media_enabled(false),
    );

    let id = service.enqueue("a kite", RequestKind::ImagePrompt, None).unwrap();
    service.run_queue().unwrap();
    let status = service.status(id).unwrap().unwrap();
    assert_eq!(status.request.artifact_status, ArtifactStatus::Pending);
    assert!(!temp.child("GeneratedMedia").path().exists());
}

#[test]
fn test_check_passes_for_initialized_config() {
    let temp = TempDir::new().unwrap();
    let workflow = script(&temp, "image_workflow.sh", WORKFLOW);
    let path = ConfigBuilder::new(temp.path())
        .pipeline("image_prompt", "image", &workflow)
        .journal_mode("delete")
        .write(temp.path());
    let config = load_config(&path).unwrap();

    assert!(!QueueService::check(&config).passed());
    QueueService::init(&config).unwrap();
    let report = QueueService::check(&config);
    assert!(report.passed(), "{:?}", report);
}

#[test]
fn test_watch_runs_until_stopped() {
    let temp = TempDir::new().unwrap();
    let generator = script(&temp, "generate.sh", GENERATOR);
    let service = service(
        &temp,
        ConfigBuilder::new(temp.path()).generator("/bin/sh", &[generator.to_str().unwrap()]),
    );
    let id = service.enqueue("dawn", RequestKind::Text, None).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(500));
        flag.store(true, Ordering::SeqCst);
    });

    let runs = service.watch(Duration::from_millis(100), &stop).unwrap();
    stopper.join().unwrap();
    assert!(runs >= 1);

    let status = service.status(id).unwrap().unwrap();
    assert_eq!(status.request.lifecycle_status, LifecycleStatus::Completed);
}
