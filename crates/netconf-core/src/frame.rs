//! RFC 6242 chunked message framing.
//!
//! One message is a sequence of `\n#<len>\n<len bytes>` chunks closed by the
//! `\n##\n` end-of-message marker. The decoder is single-shot: it consumes
//! exactly one message from the reader and never buffers past the marker.
//! The same framing carries JSON on the front-end socket and XML on a
//! version 1.1 device channel.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum number of digits accepted in a chunk length field.
const MAX_LENGTH_DIGITS: usize = 11;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The peer closed the stream between messages
    #[error("connection closed")]
    Closed,

    /// The stream ended inside a frame
    #[error("unexpected end of stream inside a frame")]
    UnexpectedEof,

    /// A chunk did not start with the `\n#` prefix
    #[error("invalid chunk prefix")]
    BadPrefix,

    /// The length field contained something other than a digit
    #[error("invalid character in chunk length")]
    BadLength,

    /// The length field was zero or empty
    #[error("chunk length must be positive")]
    ZeroLength,

    /// The length field had more than eleven digits
    #[error("chunk length field too long")]
    LengthTooLong,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(std::io::Error),
}

/// Read one complete framed message and return the concatenated payload.
pub async fn read_message<R>(reader: &mut R) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut payload = Vec::new();
    let mut started = false;

    loop {
        let first = match reader.read_u8().await {
            Ok(byte) => byte,
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(if started { FrameError::UnexpectedEof } else { FrameError::Closed });
            }
            Err(err) => return Err(FrameError::Io(err)),
        };
        started = true;

        if first != b'\n' {
            return Err(FrameError::BadPrefix);
        }
        if read_byte(reader).await? != b'#' {
            return Err(FrameError::BadPrefix);
        }

        // Either the end-of-message marker (`#\n`) or a length field follows.
        let mut byte = read_byte(reader).await?;
        if byte == b'#' {
            if read_byte(reader).await? != b'\n' {
                return Err(FrameError::BadPrefix);
            }
            return Ok(payload);
        }

        let mut length: u64 = 0;
        let mut digits = 0usize;
        loop {
            match byte {
                b'0'..=b'9' => {
                    digits += 1;
                    if digits > MAX_LENGTH_DIGITS {
                        return Err(FrameError::LengthTooLong);
                    }
                    length = length * 10 + u64::from(byte - b'0');
                }
                b'\n' => break,
                _ => return Err(FrameError::BadLength),
            }
            byte = read_byte(reader).await?;
        }
        if digits == 0 || length == 0 {
            return Err(FrameError::ZeroLength);
        }

        let start = payload.len();
        payload.resize(start + length as usize, 0);
        reader
            .read_exact(&mut payload[start..])
            .await
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::UnexpectedEof => FrameError::UnexpectedEof,
                _ => FrameError::Io(err),
            })?;
    }
}

/// Write one message as a single chunk followed by the end-of-message marker.
pub async fn write_message<W>(writer: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let header = format!("\n#{}\n", payload.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(payload).await?;
    writer.write_all(b"\n##\n").await?;
    writer.flush().await
}

async fn read_byte<R>(reader: &mut R) -> Result<u8, FrameError>
where
    R: AsyncRead + Unpin,
{
    reader.read_u8().await.map_err(|err| match err.kind() {
        std::io::ErrorKind::UnexpectedEof => FrameError::UnexpectedEof,
        _ => FrameError::Io(err),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn encode(payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        write_message(&mut buf, payload).await.unwrap();
        buf
    }

    async fn decode(bytes: &[u8]) -> Result<Vec<u8>, FrameError> {
        let mut reader = bytes;
        read_message(&mut reader).await
    }

    fn payload_of(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn round_trips_payloads_up_to_a_mebibyte() {
        for len in [1usize, 2, 80, 4096, 65 * 1024, 1 << 20] {
            let payload = payload_of(len);
            let decoded = decode(&encode(&payload).await).await.unwrap();
            assert_eq!(decoded, payload, "payload of {len} bytes survives");
        }
    }

    #[tokio::test]
    async fn encoder_emits_one_chunk_and_terminator() {
        let frame = encode(b"{\"type\":0}").await;
        assert_eq!(frame, b"\n#10\n{\"type\":0}\n##\n");
    }

    #[tokio::test]
    async fn concatenates_multiple_chunks() {
        let decoded = decode(b"\n#5\nhello\n#6\n world\n##\n").await.unwrap();
        assert_eq!(decoded, b"hello world");
    }

    #[tokio::test]
    async fn rejects_bad_prefix() {
        assert!(matches!(decode(b"#5\nhello\n##\n").await, Err(FrameError::BadPrefix)));
        assert!(matches!(decode(b"\n%5\nhello\n##\n").await, Err(FrameError::BadPrefix)));
    }

    #[tokio::test]
    async fn rejects_non_digit_length() {
        assert!(matches!(decode(b"\n#5x\nhello\n##\n").await, Err(FrameError::BadLength)));
        assert!(matches!(decode(b"\n#-5\nhello\n##\n").await, Err(FrameError::BadLength)));
    }

    #[tokio::test]
    async fn rejects_zero_length() {
        assert!(matches!(decode(b"\n#0\n\n##\n").await, Err(FrameError::ZeroLength)));
        assert!(matches!(decode(b"\n#\nhello\n##\n").await, Err(FrameError::ZeroLength)));
    }

    #[tokio::test]
    async fn rejects_overlong_length_field() {
        assert!(matches!(
            decode(b"\n#999999999999\nhello\n##\n").await,
            Err(FrameError::LengthTooLong)
        ));
    }

    #[tokio::test]
    async fn rejects_short_payload() {
        assert!(matches!(decode(b"\n#10\nhello").await, Err(FrameError::UnexpectedEof)));
    }

    #[tokio::test]
    async fn rejects_truncated_terminator() {
        assert!(matches!(decode(b"\n#5\nhello\n#").await, Err(FrameError::UnexpectedEof)));
        assert!(matches!(decode(b"\n#5\nhello\n#%\n").await, Err(FrameError::BadLength)));
    }

    #[tokio::test]
    async fn reports_clean_close_between_messages() {
        assert!(matches!(decode(b"").await, Err(FrameError::Closed)));
    }

    #[tokio::test]
    async fn corrupted_frames_never_panic() {
        let frame = encode(b"{\"type\":1,\"data\":\"<x/>\"}").await;

        // every possible truncation
        for cut in 0..frame.len() {
            let _ = decode(&frame[..cut]).await;
        }

        // every single-byte corruption
        for index in 0..frame.len() {
            let mut copy = frame.clone();
            copy[index] = copy[index].wrapping_add(0x41);
            let _ = decode(&copy).await;
        }
    }

    #[tokio::test]
    async fn decoder_is_single_shot() {
        let mut buf = encode(b"first").await;
        buf.extend_from_slice(&encode(b"second").await);
        let mut reader = &buf[..];
        assert_eq!(read_message(&mut reader).await.unwrap(), b"first");
        assert_eq!(read_message(&mut reader).await.unwrap(), b"second");
    }
}
