//! Shared constants between the engine and transport bindings.
//!
//! These values are part of the client-visible protocol and must stay identical
//! on both sides of a hijacked connection.

/// Raw stream protocol constants
pub mod stream {
    // `concat!` only takes literals.
    macro_rules! raw_stream_content_type {
        () => {
            "application/vnd.berth.raw-stream"
        };
    }

    /// Content type announced when a connection is upgraded to a raw stream.
    pub const RAW_STREAM_CONTENT_TYPE: &str = raw_stream_content_type!();

    /// Acknowledgement written right after a successful hijack.
    ///
    /// Lets the peer tell "upgrade accepted" apart from an error response
    /// before any payload bytes arrive.
    pub const HIJACK_ACK: &str = concat!(
        "HTTP/1.1 200 OK\r\nContent-Type: ",
        raw_stream_content_type!(),
        "\r\n\r\n"
    );

    /// Line terminator for job progress messages.
    pub const PROGRESS_LINE_END: u8 = b'\n';
}

/// Process exit conventions
pub mod exit {
    /// Offset added to the signal number when a process is killed by a signal.
    pub const SIGNAL_EXIT_OFFSET: i32 = 128;

    /// Exit code reported for a container that never ran.
    pub const NEVER_RAN: i32 = 0;
}

#[cfg(test)]
mod tests {
    use super::stream::*;

    #[test]
    fn test_hijack_ack_announces_raw_stream() {
        assert!(HIJACK_ACK.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(HIJACK_ACK.ends_with("\r\n\r\n"));

        let header = format!("Content-Type: {RAW_STREAM_CONTENT_TYPE}\r\n");
        assert!(HIJACK_ACK.contains(&header), "ack: {HIJACK_ACK:?}");
    }
}
