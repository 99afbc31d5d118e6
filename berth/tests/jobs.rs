//! Integration tests for pull, push and build jobs streamed over hijacked
//! connections.

use std::sync::Arc;
use std::time::Duration;

use berth::jobs::{BuildJob, PullJob, PushJob};
use berth::{BerthError, ImageStore};
use berth_test_utils::{
    FakeBuildBackend, FakeRegistry, TEST_IMAGE, TestRuntime, hijack_pair, read_ack, read_lines,
    with_timeout,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const LIMIT: Duration = Duration::from_secs(10);

// ============================================================================
// PULL TESTS
// ============================================================================

#[tokio::test]
async fn pull_streams_progress_and_registers_image() {
    let ctx = TestRuntime::new();
    let registry = Arc::new(FakeRegistry::new());
    let job = PullJob::new("busybox", registry, ctx.runtime.images());

    let (mut conn, client) = hijack_pair();
    let handle = ctx.runtime.job_streamer().start(&mut conn, job).await.unwrap();

    let mut reader = BufReader::new(client);
    read_ack(&mut reader).await;
    let outcome = with_timeout("pull", LIMIT, handle.wait()).await.unwrap();
    let lines = with_timeout("progress", LIMIT, read_lines(&mut reader)).await;

    assert!(
        lines[0].starts_with("Pulling repository busybox from"),
        "first line: {:?}",
        lines[0]
    );
    assert!(lines.iter().any(|l| l == "Pulling layer 2"));

    let image = ctx.runtime.images().resolve("busybox").unwrap();
    assert_eq!(outcome.image, Some(image.id));
}

#[tokio::test]
async fn pull_completes_after_client_disconnects() {
    let ctx = TestRuntime::new();
    let registry = Arc::new(FakeRegistry::new().with_delay(Duration::from_millis(50)));
    let job = PullJob::new("alpine:3", registry, ctx.runtime.images());

    let (mut conn, mut client) = hijack_pair();
    let mut handle = ctx.runtime.job_streamer().start(&mut conn, job).await.unwrap();
    read_ack(&mut client).await;
    drop(client);

    with_timeout("delivery", LIMIT, handle.wait_delivery()).await;
    assert!(handle.delivery_finished());

    let outcome = with_timeout("pull", LIMIT, handle.wait()).await.unwrap();
    assert!(outcome.image.is_some());
    assert!(ctx.runtime.images().resolve("alpine:3").is_some());
    assert_eq!(ctx.runtime.metrics().jobs_completed_total(), 1);
}

#[tokio::test]
async fn failed_pull_reports_error_to_client() {
    let ctx = TestRuntime::new();
    let job = PullJob::new("missing", Arc::new(FakeRegistry::new()), ctx.runtime.images());

    let (mut conn, client) = hijack_pair();
    let handle = ctx.runtime.job_streamer().start(&mut conn, job).await.unwrap();

    let mut reader = BufReader::new(client);
    read_ack(&mut reader).await;
    let err = with_timeout("pull", LIMIT, handle.wait()).await.unwrap_err();
    assert!(matches!(err, BerthError::ImageNotFound(_)), "got {err:?}");

    let lines = with_timeout("progress", LIMIT, read_lines(&mut reader)).await;
    assert!(lines.last().unwrap().starts_with("Error:"), "lines: {lines:?}");
    assert_eq!(ctx.runtime.metrics().jobs_failed_total(), 1);
}

// ============================================================================
// PUSH TESTS
// ============================================================================

#[tokio::test]
async fn push_starts_with_checksum_line() {
    let ctx = TestRuntime::new();
    let registry = Arc::new(FakeRegistry::new());
    let job = PushJob::new(TEST_IMAGE, registry.clone(), ctx.runtime.images());

    let (mut conn, client) = hijack_pair();
    let handle = ctx.runtime.job_streamer().start(&mut conn, job).await.unwrap();

    let mut reader = BufReader::new(client);
    read_ack(&mut reader).await;
    let mut first = String::new();
    reader.read_line(&mut first).await.unwrap();
    assert!(first.starts_with("Computing checksum"), "first line: {first:?}");

    let outcome = with_timeout("push", LIMIT, handle.wait()).await.unwrap();
    assert_eq!(outcome.image, Some(ctx.image.id.clone()));
    assert_eq!(registry.pushed(), vec![format!("{TEST_IMAGE}:latest")]);
}

#[tokio::test]
async fn push_completes_after_client_disconnects() {
    let ctx = TestRuntime::new();
    let registry = Arc::new(FakeRegistry::new().with_delay(Duration::from_millis(50)));
    let job = PushJob::new(TEST_IMAGE, registry.clone(), ctx.runtime.images());

    let (mut conn, mut client) = hijack_pair();
    let handle = ctx.runtime.job_streamer().start(&mut conn, job).await.unwrap();
    read_ack(&mut client).await;
    drop(client);

    with_timeout("push", LIMIT, handle.wait()).await.unwrap();
    assert_eq!(registry.pushed().len(), 1);
}

#[tokio::test]
async fn push_of_unknown_image_fails() {
    let ctx = TestRuntime::new();
    let registry = Arc::new(FakeRegistry::new());
    let job = PushJob::new("nowhere", registry.clone(), ctx.runtime.images());

    let (mut conn, _client) = hijack_pair();
    let err = ctx.runtime.job_streamer().run(&mut conn, job).await.unwrap_err();

    assert!(matches!(err, BerthError::ImageNotFound(_)), "got {err:?}");
    assert!(registry.pushed().is_empty());
}

// ============================================================================
// BUILD TESTS
// ============================================================================

#[tokio::test]
async fn build_reads_instructions_from_client() {
    let ctx = TestRuntime::new();
    let backend = Arc::new(FakeBuildBackend::new());
    let job = BuildJob::from_client(backend, ctx.runtime.images());

    let (mut conn, client) = hijack_pair();
    let handle = ctx.runtime.job_streamer().start(&mut conn, job).await.unwrap();

    let (client_read, mut client_write) = tokio::io::split(client);
    let mut reader = BufReader::new(client_read);
    read_ack(&mut reader).await;

    client_write.write_all(b"from berth-ut\n").await.unwrap();

    let mut line = String::new();
    with_timeout("step line", LIMIT, async {
        while !line.contains("FROM berth-ut") {
            line.clear();
            assert!(reader.read_line(&mut line).await.unwrap() > 0, "stream ended");
        }
    })
    .await;

    // Disconnecting ends the instruction stream; the build still finishes.
    drop(reader);
    drop(client_write);

    let outcome = with_timeout("build", LIMIT, handle.wait()).await.unwrap();
    assert_eq!(outcome.image, Some(ctx.image.id.clone()));
}

#[tokio::test]
async fn build_applies_steps_and_tags_result() {
    let ctx = TestRuntime::new();
    let backend = Arc::new(FakeBuildBackend::new());
    let job = BuildJob::from_instructions(
        ["FROM berth-ut", "# setup", "", "run echo hi", "ENV A=b"],
        backend.clone(),
        ctx.runtime.images(),
    )
    .tag("built:v1");

    let (mut conn, client) = hijack_pair();
    let handle = ctx.runtime.job_streamer().start(&mut conn, job).await.unwrap();

    let mut reader = BufReader::new(client);
    read_ack(&mut reader).await;
    let outcome = with_timeout("build", LIMIT, handle.wait()).await.unwrap();
    let lines = with_timeout("progress", LIMIT, read_lines(&mut reader)).await;

    assert_eq!(backend.applied(), vec!["RUN echo hi", "ENV A=b"]);
    assert_eq!(
        lines.iter().filter(|l| l.starts_with("Step ")).count(),
        3,
        "lines: {lines:?}"
    );
    assert!(lines.last().unwrap().starts_with("Successfully built"));

    let built = ctx.runtime.images().resolve("built:v1").unwrap();
    assert_eq!(outcome.image, Some(built.id));
}

#[tokio::test]
async fn tagging_a_from_only_build_keeps_base_reference() {
    let ctx = TestRuntime::new();
    let job = BuildJob::from_instructions(
        ["FROM berth-ut"],
        Arc::new(FakeBuildBackend::new()),
        ctx.runtime.images(),
    )
    .tag("app:v1");

    let (mut conn, _client) = hijack_pair();
    let outcome = ctx.runtime.job_streamer().run(&mut conn, job).await.unwrap();
    assert_eq!(outcome.image, Some(ctx.image.id.clone()));

    let images = ctx.runtime.images();
    assert_eq!(images.resolve("app:v1").unwrap().id, ctx.image.id);
    assert_eq!(images.resolve(TEST_IMAGE), Some(ctx.image.clone()));
    assert_eq!(images.list().len(), 1);

    let container = ctx.runtime.create(ctx.config(["true"])).unwrap();
    assert_eq!(container.image(), &ctx.image.id);
}

#[tokio::test]
async fn build_without_from_fails() {
    let ctx = TestRuntime::new();
    let backend = Arc::new(FakeBuildBackend::new());
    let job = BuildJob::from_instructions(["RUN echo hi"], backend.clone(), ctx.runtime.images());

    let (mut conn, client) = hijack_pair();
    let handle = ctx.runtime.job_streamer().start(&mut conn, job).await.unwrap();

    let mut reader = BufReader::new(client);
    read_ack(&mut reader).await;
    let err = with_timeout("build", LIMIT, handle.wait()).await.unwrap_err();
    let lines = with_timeout("progress", LIMIT, read_lines(&mut reader)).await;

    assert!(matches!(err, BerthError::Config(_)), "got {err:?}");
    assert!(backend.applied().is_empty());
    assert!(lines.last().unwrap().contains("Please provide a source image"));
}

#[tokio::test]
async fn build_with_unknown_base_image_fails() {
    let ctx = TestRuntime::new();
    let job = BuildJob::from_instructions(
        ["FROM nothing-here"],
        Arc::new(FakeBuildBackend::new()),
        ctx.runtime.images(),
    );

    let (mut conn, _client) = hijack_pair();
    let err = ctx.runtime.job_streamer().run(&mut conn, job).await.unwrap_err();
    assert!(matches!(err, BerthError::ImageNotFound(_)), "got {err:?}");
}

// ============================================================================
// STREAMER TESTS
// ============================================================================

#[tokio::test]
async fn job_streamer_counts_jobs() {
    let ctx = TestRuntime::new();
    let streamer = ctx.runtime.job_streamer();
    let registry = Arc::new(FakeRegistry::new());

    for reference in ["one", "two"] {
        let (mut conn, _client) = hijack_pair();
        let job = PullJob::new(reference, registry.clone(), ctx.runtime.images());
        streamer.run(&mut conn, job).await.unwrap();
    }

    let metrics = ctx.runtime.metrics();
    assert_eq!(metrics.jobs_started_total(), 2);
    assert_eq!(metrics.jobs_completed_total(), 2);
    assert_eq!(metrics.jobs_failed_total(), 0);
    assert_eq!(ctx.images.list().len(), 3);
}
