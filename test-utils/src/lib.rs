//! Shared fixtures for berth integration tests.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use berth::jobs::{BuildBackend, Instruction, RegistryClient};
use berth::runtime::constants::stream;
use berth::{
    BerthError, BerthResult, ContainerConfig, ImageId, ImageRecord, LocalImageStore,
    ProgressSink, Runtime, RuntimeOptions, UpgradableConn,
};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream,
};

/// Name of the image every test runtime is seeded with.
pub const TEST_IMAGE: &str = "berth-ut";

// ============================================================================
// RUNTIME FIXTURE
// ============================================================================

/// Isolated runtime in a temporary home, with [`TEST_IMAGE`] registered.
pub struct TestRuntime {
    pub runtime: Runtime,
    pub image: ImageRecord,
    pub images: Arc<LocalImageStore>,
    temp_dir: TempDir,
}

impl TestRuntime {
    pub fn new() -> Self {
        Self::with_options(|_| {})
    }

    /// Like [`new`](Self::new), letting the caller adjust the options.
    pub fn with_options(adjust: impl FnOnce(&mut RuntimeOptions)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut options = RuntimeOptions::with_home(temp_dir.path());
        adjust(&mut options);

        let image = ImageRecord::new(ImageId::new(), TEST_IMAGE).with_comment("test image");
        let images = Arc::new(LocalImageStore::with_images([image.clone()]));
        let runtime = Runtime::with_image_store(options, images.clone())
            .expect("Failed to create runtime");

        Self {
            runtime,
            image,
            images,
            temp_dir,
        }
    }

    pub fn home(&self) -> &std::path::Path {
        self.temp_dir.path()
    }

    /// Config running `cmd` from the test image.
    pub fn config<I, S>(&self, cmd: I) -> ContainerConfig
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ContainerConfig::new(TEST_IMAGE, cmd)
    }

    /// Drop the runtime but keep its home, so a new runtime can reopen it.
    pub fn into_home(self) -> TempDir {
        drop(self.runtime);
        self.temp_dir
    }
}

impl Default for TestRuntime {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// HIJACKABLE CONNECTIONS
// ============================================================================

/// Server side of an in-memory connection plus the client's end.
pub fn hijack_pair() -> (UpgradableConn<DuplexStream>, DuplexStream) {
    let (server, client) = tokio::io::duplex(64 * 1024);
    (UpgradableConn::new(server), client)
}

/// Read and check the hijack acknowledgement.
pub async fn read_ack<R: AsyncRead + Unpin>(client: &mut R) {
    let mut buf = vec![0u8; stream::HIJACK_ACK.len()];
    client
        .read_exact(&mut buf)
        .await
        .expect("connection closed before hijack ack");
    assert_eq!(
        String::from_utf8_lossy(&buf),
        stream::HIJACK_ACK,
        "unexpected hijack acknowledgement"
    );
}

/// Write `input` and expect a line containing `expected` back, `count` times.
pub async fn assert_pipe<R, W>(
    input: &str,
    expected: &str,
    reader: &mut BufReader<R>,
    writer: &mut W,
    count: usize,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    for i in 0..count {
        writer
            .write_all(input.as_bytes())
            .await
            .expect("failed to write to pipe");

        let mut line = String::new();
        reader
            .read_line(&mut line)
            .await
            .expect("failed to read from pipe");
        assert!(
            line.contains(expected),
            "round {i}: expected {expected:?}, got {line:?}"
        );
    }
}

/// Read newline-separated lines until end of stream.
pub async fn read_lines<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    while reader.read_line(&mut line).await.unwrap_or(0) > 0 {
        lines.push(line.trim_end_matches('\n').to_string());
        line.clear();
    }
    lines
}

// ============================================================================
// TIMING
// ============================================================================

/// Await `fut`, failing the test with `label` if it takes longer than `limit`.
pub async fn with_timeout<F: Future>(label: &str, limit: Duration, fut: F) -> F::Output {
    match tokio::time::timeout(limit, fut).await {
        Ok(output) => output,
        Err(_) => panic!("{label} (after {limit:?})"),
    }
}

// ============================================================================
// FAKE COLLABORATORS
// ============================================================================

/// Registry double: pulls produce fresh image ids, pushes are recorded.
pub struct FakeRegistry {
    endpoint: String,
    delay: Duration,
    pushed: Mutex<Vec<String>>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self {
            endpoint: "https://registry.test/v1/".into(),
            delay: Duration::ZERO,
            pushed: Mutex::new(Vec::new()),
        }
    }

    /// Each transfer reports a few progress lines spaced by `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn pushed(&self) -> Vec<String> {
        self.pushed.lock().clone()
    }
}

impl Default for FakeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    async fn pull(&self, reference: &str, progress: &ProgressSink) -> BerthResult<ImageRecord> {
        if reference.contains("missing") {
            return Err(BerthError::ImageNotFound(reference.to_string()));
        }
        for layer in 0..3 {
            tokio::time::sleep(self.delay).await;
            progress.line(format!("Pulling layer {layer}"));
        }
        Ok(ImageRecord::new(ImageId::new(), reference))
    }

    async fn push(&self, image: &ImageRecord, progress: &ProgressSink) -> BerthResult<()> {
        for layer in 0..3 {
            tokio::time::sleep(self.delay).await;
            progress.line(format!("Pushing layer {layer}"));
        }
        self.pushed.lock().push(image.reference());
        Ok(())
    }
}

/// Build backend double: every step yields a new image id.
#[derive(Default)]
pub struct FakeBuildBackend {
    applied: Mutex<Vec<String>>,
}

impl FakeBuildBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().clone()
    }
}

#[async_trait]
impl BuildBackend for FakeBuildBackend {
    async fn apply(
        &self,
        _step: usize,
        instruction: &Instruction,
        _parent: &ImageId,
        _progress: &ProgressSink,
    ) -> BerthResult<ImageId> {
        self.applied.lock().push(instruction.to_string());
        Ok(ImageId::new())
    }
}
