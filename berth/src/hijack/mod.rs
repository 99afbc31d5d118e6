//! Connection hijacking: taking over a request's connection as a raw,
//! bidirectional byte stream.
//!
//! A connection advertises the capability through [`Hijack`]. It can be
//! upgraded at most once; after that the request/response machinery no
//! longer owns the bytes. [`StreamHijacker`] performs the upgrade and writes
//! the acknowledgement the client waits for before streaming.

mod conn;

pub use conn::{BufferedResponse, UpgradableConn};

use std::future::Future;

use berth_shared::errors::{BerthError, BerthResult};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::runtime::constants::stream;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A hijacked connection, split into its two directions.
pub struct RawStream {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
}

impl RawStream {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    pub fn into_split(self) -> (BoxedReader, BoxedWriter) {
        (self.reader, self.writer)
    }
}

impl std::fmt::Debug for RawStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RawStream")
    }
}

/// Capability of a connection to be taken over as a raw stream.
pub trait Hijack: Send {
    /// Take over the connection.
    ///
    /// Fails with `HijackUnsupported` when the transport cannot be upgraded
    /// or has been upgraded already.
    fn hijack(&mut self) -> BerthResult<RawStream>;
}

impl<H: Hijack + ?Sized> Hijack for &mut H {
    fn hijack(&mut self) -> BerthResult<RawStream> {
        (**self).hijack()
    }
}

impl<H: Hijack + ?Sized> Hijack for Box<H> {
    fn hijack(&mut self) -> BerthResult<RawStream> {
        (**self).hijack()
    }
}

/// Upgrades connections for attach and job streaming.
pub struct StreamHijacker;

impl StreamHijacker {
    /// Hijack `conn` and acknowledge the upgrade to the client.
    pub async fn hijack<H: Hijack + ?Sized>(conn: &mut H) -> BerthResult<RawStream> {
        let mut raw = conn.hijack()?;
        raw.writer
            .write_all(stream::HIJACK_ACK.as_bytes())
            .await
            .map_err(|e| BerthError::Io(format!("failed to acknowledge hijack: {e}")))?;
        raw.writer.flush().await?;
        tracing::trace!("Connection hijacked");
        Ok(raw)
    }

    /// Hijack `conn`, then hand the raw stream to `handler`.
    ///
    /// If the hijack fails, `handler` never runs.
    pub async fn serve<H, F, Fut, T>(conn: &mut H, handler: F) -> BerthResult<T>
    where
        H: Hijack + ?Sized,
        F: FnOnce(RawStream) -> Fut,
        Fut: Future<Output = BerthResult<T>>,
    {
        let raw = Self::hijack(conn).await?;
        handler(raw).await
    }
}
