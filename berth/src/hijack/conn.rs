use berth_shared::errors::{BerthError, BerthResult};
use tokio::io::{AsyncRead, AsyncWrite};

use super::{Hijack, RawStream};

/// A duplex byte stream that can be taken over once.
///
/// Wraps anything bidirectional: a TCP or Unix socket, or an in-memory
/// `tokio::io::DuplexStream`.
pub struct UpgradableConn<S> {
    stream: Option<S>,
}

impl<S> UpgradableConn<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    pub fn is_hijacked(&self) -> bool {
        self.stream.is_none()
    }
}

impl<S> Hijack for UpgradableConn<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn hijack(&mut self) -> BerthResult<RawStream> {
        let stream = self
            .stream
            .take()
            .ok_or_else(|| BerthError::HijackUnsupported("connection already hijacked".into()))?;
        let (reader, writer) = tokio::io::split(stream);
        Ok(RawStream::new(reader, writer))
    }
}

/// A plain request/response exchange that cannot be upgraded.
///
/// Records what the handler answered.
#[derive(Debug, Default)]
pub struct BufferedResponse {
    status: Option<u16>,
    body: Vec<u8>,
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_status(&mut self, status: u16) {
        self.status.get_or_insert(status);
    }

    pub fn write_body(&mut self, data: &[u8]) {
        self.status.get_or_insert(200);
        self.body.extend_from_slice(data);
    }

    /// Status sent, if any.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl Hijack for BufferedResponse {
    fn hijack(&mut self) -> BerthResult<RawStream> {
        Err(BerthError::HijackUnsupported(
            "response writer does not support hijacking".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_response_records_first_status() {
        let mut response = BufferedResponse::new();
        response.write_status(404);
        response.write_status(500);
        response.write_body(b"no such container");

        assert_eq!(response.status(), Some(404));
        assert_eq!(response.body(), b"no such container");
    }

    #[test]
    fn test_body_implies_ok() {
        let mut response = BufferedResponse::new();
        response.write_body(b"{}");
        assert_eq!(response.status(), Some(200));
    }

    #[tokio::test]
    async fn test_upgradable_conn_hijacks_once() {
        let (server, _client) = tokio::io::duplex(16);
        let mut conn = UpgradableConn::new(server);
        assert!(!conn.is_hijacked());

        conn.hijack().unwrap();
        assert!(conn.is_hijacked());
        assert!(matches!(
            conn.hijack(),
            Err(BerthError::HijackUnsupported(_))
        ));
    }
}
