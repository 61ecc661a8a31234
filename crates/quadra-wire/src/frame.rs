//! Length-prefixed frame I/O.
//!
//! Sender: 4-byte big-endian length `L` (1 ≤ L ≤ 65536), then exactly `L`
//! bytes of UTF-8. Receiver: read the prefix, validate the bound, read the
//! body. There is no other fragmentation metadata; a short read anywhere is
//! fatal for the connection.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::WireError;

/// Maximum frame body size in bytes.
pub const MAX_FRAME_LEN: usize = 65_536;

/// Writes one frame to `w`.
///
/// Rejects empty and oversize bodies before touching the socket.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    body: &str,
) -> Result<(), WireError> {
    let len = body.len();
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(WireError::BadLength(len));
    }
    w.write_all(&(len as u32).to_be_bytes()).await?;
    w.write_all(body.as_bytes()).await?;
    w.flush().await?;
    Ok(())
}

/// Reads one frame from `r`.
///
/// Returns `Ok(None)` when the stream ends cleanly at a frame boundary.
/// A stream that ends inside the length prefix or the body, or a prefix
/// outside `1..=65536`, is an error — the caller should drop the
/// connection.
pub async fn read_frame<R: AsyncRead + Unpin>(
    r: &mut R,
) -> Result<Option<String>, WireError> {
    let mut prefix = [0u8; 4];
    match r.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Ok(None);
        }
        Err(e) => return Err(WireError::Io(e)),
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(WireError::BadLength(len));
    }

    let mut body = vec![0u8; len];
    let mut got = 0;
    while got < len {
        let n = r.read(&mut body[got..]).await?;
        if n == 0 {
            return Err(WireError::Truncated { got, want: len });
        }
        got += n;
    }

    String::from_utf8(body)
        .map(Some)
        .map_err(|_| WireError::NotUtf8)
}

// ---------------------------------------------------------------------------
// FrameStream — a TcpStream that speaks frames
// ---------------------------------------------------------------------------

/// A TCP connection that sends and receives whole frames.
///
/// Use [`into_split`](Self::into_split) when the reading and writing ends
/// must live in different tasks (one reader task, one writer task per
/// connection is the usual shape in the services).
pub struct FrameStream {
    stream: TcpStream,
}

impl FrameStream {
    /// Wraps an already-connected stream.
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Connects to `addr` and wraps the resulting stream.
    pub async fn connect(addr: &str) -> Result<Self, WireError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self { stream })
    }

    /// Sends one frame.
    pub async fn send(&mut self, body: &str) -> Result<(), WireError> {
        write_frame(&mut self.stream, body).await
    }

    /// Receives one frame. `Ok(None)` means the peer closed cleanly.
    pub async fn recv(&mut self) -> Result<Option<String>, WireError> {
        read_frame(&mut self.stream).await
    }

    /// Splits into independently owned read and write halves.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        let (r, w) = self.stream.into_split();
        (FrameReader { half: r }, FrameWriter { half: w })
    }
}

/// The owned read half of a [`FrameStream`].
pub struct FrameReader {
    half: OwnedReadHalf,
}

impl FrameReader {
    /// Receives one frame. `Ok(None)` means the peer closed cleanly.
    pub async fn recv(&mut self) -> Result<Option<String>, WireError> {
        read_frame(&mut self.half).await
    }
}

/// The owned write half of a [`FrameStream`].
pub struct FrameWriter {
    half: OwnedWriteHalf,
}

impl FrameWriter {
    /// Sends one frame.
    pub async fn send(&mut self, body: &str) -> Result<(), WireError> {
        write_frame(&mut self.half, body).await
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_single_frame() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, "LOGIN alice secret").await.unwrap();
        let body = read_frame(&mut b).await.unwrap();
        assert_eq!(body.as_deref(), Some("LOGIN alice secret"));
    }

    #[tokio::test]
    async fn test_round_trip_back_to_back_frames() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, "first").await.unwrap();
        write_frame(&mut a, "second").await.unwrap();
        assert_eq!(read_frame(&mut b).await.unwrap().as_deref(), Some("first"));
        assert_eq!(read_frame(&mut b).await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_clean_close_returns_none() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_length_prefix_is_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut a, &0u32.to_be_bytes())
            .await
            .unwrap();
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, WireError::BadLength(0)));
    }

    #[tokio::test]
    async fn test_oversize_prefix_is_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let huge = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut a, &huge).await.unwrap();
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, WireError::BadLength(_)));
    }

    #[tokio::test]
    async fn test_truncated_body_is_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        // Promise 10 bytes, deliver 3, then hang up.
        tokio::io::AsyncWriteExt::write_all(&mut a, &10u32.to_be_bytes())
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut a, b"abc").await.unwrap();
        drop(a);
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, WireError::Truncated { got: 3, want: 10 }));
    }

    #[tokio::test]
    async fn test_empty_body_rejected_on_send() {
        let (mut a, _b) = tokio::io::duplex(64);
        let err = write_frame(&mut a, "").await.unwrap_err();
        assert!(matches!(err, WireError::BadLength(0)));
    }

    #[tokio::test]
    async fn test_max_length_body_round_trips() {
        let (mut a, mut b) = tokio::io::duplex(MAX_FRAME_LEN + 8);
        let body = "x".repeat(MAX_FRAME_LEN);
        let send = write_frame(&mut a, &body);
        let recv = read_frame(&mut b);
        let (sent, got) = tokio::join!(send, recv);
        sent.unwrap();
        assert_eq!(got.unwrap().unwrap().len(), MAX_FRAME_LEN);
    }

    #[tokio::test]
    async fn test_non_utf8_body_is_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut a, &2u32.to_be_bytes())
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut a, &[0xff, 0xfe])
            .await
            .unwrap();
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, WireError::NotUtf8));
    }

    #[tokio::test]
    async fn test_frame_stream_over_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut fs = FrameStream::new(stream);
            let req = fs.recv().await.unwrap().unwrap();
            fs.send(&format!("echo {req}")).await.unwrap();
        });

        let mut client = FrameStream::connect(&addr).await.unwrap();
        client.send("ping").await.unwrap();
        assert_eq!(client.recv().await.unwrap().as_deref(), Some("echo ping"));
        server.await.unwrap();
    }
}
