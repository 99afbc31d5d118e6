//! Integration tests for attach sessions over hijacked connections.

use std::time::Duration;

use berth::{AttachOptions, BerthError, BufferedResponse, ContainerConfig};
use berth_test_utils::{TestRuntime, assert_pipe, hijack_pair, read_ack, with_timeout};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};

const LIMIT: Duration = Duration::from_secs(10);

fn cat_config(ctx: &TestRuntime, open_stdin: bool) -> ContainerConfig {
    let mut config = ctx.config(["cat"]);
    config.open_stdin = open_stdin;
    config.attach_stdin = true;
    config.attach_stdout = true;
    config.attach_stderr = true;
    config
}

// ============================================================================
// STREAMING TESTS
// ============================================================================

#[tokio::test]
async fn attach_pipes_stdin_to_stdout() {
    let ctx = TestRuntime::new();
    let container = ctx.runtime.create(cat_config(&ctx, true)).unwrap();
    let id = container.id().to_string();
    container.start().await.unwrap();

    let (mut conn, client) = hijack_pair();
    let runtime = ctx.runtime.clone();
    let session = tokio::spawn(async move {
        runtime.attach(&id, AttachOptions::all(), &mut conn).await
    });

    let (client_read, mut client_write) = tokio::io::split(client);
    let mut reader = BufReader::new(client_read);
    read_ack(&mut reader).await;

    with_timeout(
        "cat never echoed",
        LIMIT,
        assert_pipe("hello\n", "hello", &mut reader, &mut client_write, 15),
    )
    .await;

    // Client goes away: with open_stdin the process keeps running.
    drop(reader);
    drop(client_write);
    with_timeout("session did not end", LIMIT, session)
        .await
        .unwrap()
        .unwrap();

    let err = container
        .wait_timeout(Duration::from_millis(500))
        .await
        .unwrap_err();
    assert!(matches!(err, BerthError::Timeout(_)), "got {err:?}");
    assert!(container.is_running());

    container.close_stdin().await;
    let code = with_timeout("cat did not exit", LIMIT, container.wait())
        .await
        .unwrap();
    assert_eq!(code, 0);
}

#[tokio::test]
async fn second_session_reuses_open_stdin() {
    let ctx = TestRuntime::new();
    let container = ctx.runtime.create(cat_config(&ctx, true)).unwrap();
    let id = container.id().to_string();
    container.start().await.unwrap();

    for round in 0..2 {
        let (mut conn, client) = hijack_pair();
        let runtime = ctx.runtime.clone();
        let id = id.clone();
        let session = tokio::spawn(async move {
            runtime.attach(&id, AttachOptions::all(), &mut conn).await
        });

        let (client_read, mut client_write) = tokio::io::split(client);
        let mut reader = BufReader::new(client_read);
        read_ack(&mut reader).await;
        let line = format!("round {round}\n");
        with_timeout(
            "cat never echoed",
            LIMIT,
            assert_pipe(&line, &format!("round {round}"), &mut reader, &mut client_write, 1),
        )
        .await;

        drop(reader);
        drop(client_write);
        with_timeout("session did not end", LIMIT, session)
            .await
            .unwrap()
            .unwrap();
        assert!(container.is_running());
    }

    container.kill().await.unwrap();
}

#[tokio::test]
async fn client_eof_closes_stdin_without_open_stdin() {
    let ctx = TestRuntime::new();
    let container = ctx.runtime.create(cat_config(&ctx, false)).unwrap();
    let id = container.id().to_string();
    container.start().await.unwrap();

    let (mut conn, client) = hijack_pair();
    let runtime = ctx.runtime.clone();
    let session = tokio::spawn(async move {
        runtime.attach(&id, AttachOptions::all(), &mut conn).await
    });

    let (client_read, mut client_write) = tokio::io::split(client);
    let mut reader = BufReader::new(client_read);
    read_ack(&mut reader).await;
    assert_pipe("ping\n", "ping", &mut reader, &mut client_write, 3).await;

    client_write.shutdown().await.unwrap();

    let code = with_timeout("cat did not see EOF", LIMIT, container.wait())
        .await
        .unwrap();
    assert_eq!(code, 0);

    // Output conduits close with the process, ending the session.
    let mut rest = Vec::new();
    with_timeout("output never closed", LIMIT, reader.read_to_end(&mut rest))
        .await
        .unwrap();
    with_timeout("session did not end", LIMIT, session)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn client_hangup_ends_session_when_process_ignores_eof() {
    let ctx = TestRuntime::new();
    let mut config = ctx.config(["sleep", "30"]);
    config.attach_stdin = true;
    let container = ctx.runtime.create(config).unwrap();
    let id = container.id().to_string();
    container.start().await.unwrap();

    let (mut conn, mut client) = hijack_pair();
    let runtime = ctx.runtime.clone();
    let session = tokio::spawn(async move {
        runtime.attach(&id, AttachOptions::all(), &mut conn).await
    });

    read_ack(&mut client).await;
    drop(client);

    with_timeout("session outlived its client", Duration::from_secs(5), session)
        .await
        .unwrap()
        .unwrap();
    assert!(container.is_running());
    container.kill().await.unwrap();
}

#[tokio::test]
async fn output_only_session_ends_when_client_hangs_up() {
    let ctx = TestRuntime::new();
    let container = ctx.runtime.create(ctx.config(["sleep", "30"])).unwrap();
    let id = container.id().to_string();
    container.start().await.unwrap();

    let (mut conn, mut client) = hijack_pair();
    let runtime = ctx.runtime.clone();
    let options = AttachOptions {
        stdout: true,
        stream: true,
        ..Default::default()
    };
    let session = tokio::spawn(async move { runtime.attach(&id, options, &mut conn).await });

    read_ack(&mut client).await;
    drop(client);

    with_timeout("session outlived its client", Duration::from_secs(5), session)
        .await
        .unwrap()
        .unwrap();
    container.kill().await.unwrap();
}

#[tokio::test]
async fn output_only_session_receives_stderr() {
    let ctx = TestRuntime::new();
    let mut config = ctx.config(["sh", "-c", "read line; echo \"$line\" >&2"]);
    config.open_stdin = true;
    let container = ctx.runtime.create(config).unwrap();
    let id = container.id().to_string();
    container.start().await.unwrap();

    let (mut conn, client) = hijack_pair();
    let runtime = ctx.runtime.clone();
    let options = AttachOptions {
        stderr: true,
        stream: true,
        ..Default::default()
    };
    let session = tokio::spawn(async move { runtime.attach(&id, options, &mut conn).await });

    let mut reader = BufReader::new(client);
    read_ack(&mut reader).await;

    // Give the session time to subscribe before the process writes.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let io = container.io().unwrap();
    io.write_stdin(b"to-stderr\n").await.unwrap();

    let mut out = Vec::new();
    with_timeout("stderr never closed", LIMIT, reader.read_to_end(&mut out))
        .await
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&out), "to-stderr\n");

    with_timeout("session did not end", LIMIT, session)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(container.wait().await.unwrap(), 0);
}

// ============================================================================
// PRECONDITION TESTS
// ============================================================================

#[tokio::test]
async fn attach_to_stopped_container_is_refused_before_hijack() {
    let ctx = TestRuntime::new();
    let container = ctx.runtime.create(cat_config(&ctx, true)).unwrap();

    let (mut conn, _client) = hijack_pair();
    let err = ctx
        .runtime
        .attach(container.id().as_str(), AttachOptions::all(), &mut conn)
        .await
        .unwrap_err();

    assert!(matches!(err, BerthError::NotRunning(_)), "got {err:?}");
    assert!(!conn.is_hijacked());
}

#[tokio::test]
async fn attach_without_hijack_support_fails() {
    let ctx = TestRuntime::new();
    let container = ctx.runtime.create(cat_config(&ctx, true)).unwrap();
    container.start().await.unwrap();

    let mut conn = BufferedResponse::new();
    let err = ctx
        .runtime
        .attach(container.id().as_str(), AttachOptions::all(), &mut conn)
        .await
        .unwrap_err();

    assert!(matches!(err, BerthError::HijackUnsupported(_)), "got {err:?}");
    assert!(container.is_running());
    container.kill().await.unwrap();
}

#[tokio::test]
async fn attach_without_stream_ends_after_ack() {
    let ctx = TestRuntime::new();
    let container = ctx.runtime.create(cat_config(&ctx, true)).unwrap();
    container.start().await.unwrap();

    let (mut conn, mut client) = hijack_pair();
    let options = AttachOptions {
        stream: false,
        ..AttachOptions::all()
    };
    with_timeout(
        "attach did not return",
        LIMIT,
        ctx.runtime
            .attach(container.id().as_str(), options, &mut conn),
    )
    .await
    .unwrap();
    read_ack(&mut client).await;

    assert!(container.is_running());
    container.kill().await.unwrap();
}

#[tokio::test]
async fn attach_without_streams_ends_after_ack() {
    let ctx = TestRuntime::new();
    let container = ctx.runtime.create(ctx.config(["sleep", "30"])).unwrap();
    container.start().await.unwrap();

    let (mut conn, mut client) = hijack_pair();
    let options = AttachOptions {
        stream: true,
        ..Default::default()
    };
    with_timeout(
        "attach did not return",
        LIMIT,
        ctx.runtime.attach(container.id().as_str(), options, &mut conn),
    )
    .await
    .unwrap();
    read_ack(&mut client).await;

    assert!(container.is_running());
    container.kill().await.unwrap();
}

#[tokio::test]
async fn attach_to_unknown_container_fails() {
    let ctx = TestRuntime::new();
    let (mut conn, _client) = hijack_pair();

    let err = ctx
        .runtime
        .attach("does-not-exist", AttachOptions::all(), &mut conn)
        .await
        .unwrap_err();
    assert!(matches!(err, BerthError::NotFound(_)), "got {err:?}");
    assert!(!conn.is_hijacked());
}
