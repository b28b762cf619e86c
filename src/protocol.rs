//! Wire messages and framing for the transform RPC.
//!
//! Frame layout:
//!
//! ```text
//! MAGIC "NLIM"(4) || VERSION(2) || FLAGS(2) || LENGTH(4) || PAYLOAD
//! ```
//!
//! * integers are big-endian
//! * PAYLOAD is CBOR (`ciborium`) of a [`Request`] or a [`Response`]
//! * frames whose LENGTH exceeds the receiver's limit are refused before the
//!   payload is read
//!
//! A connection carries any number of request/response pairs in sequence.
//! Both the blocking client and the async server use the helpers here.

use crate::service::{ErrorKind, TransformError, TransformResult};
use crate::types::ImageBuffer;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol magic constant "NLIM".
pub const MAGIC: [u8; 4] = *b"NLIM";
pub const VERSION: u16 = 0x0001;
/// Reserved, zero for version 1.
pub const FLAGS: u16 = 0x0000;
pub const HEADER_LEN: usize = 12;
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("bad frame magic {0:02x?}")]
    BadMagic([u8; 4]),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
    #[error("truncated frame header: read {read} of 12 bytes")]
    TruncatedHeader { read: usize },
    #[error("failed to encode message: {0}")]
    Encode(#[from] ciborium::ser::Error<io::Error>),
    #[error("failed to decode message: {0}")]
    Decode(#[from] ciborium::de::Error<io::Error>),
    #[error("connection closed by peer")]
    Closed,
}

/// A call from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// Degrees are sent raw; the server validates them.
    RotateImage { rotation: i64, image: ImageBuffer },
    MeanFilter { image: ImageBuffer },
}

impl Request {
    pub fn operation(&self) -> &'static str {
        match self {
            Request::RotateImage { .. } => "RotateImage",
            Request::MeanFilter { .. } => "MeanFilter",
        }
    }
}

/// The server's answer to one [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Image(ImageBuffer),
    Failure(Failure),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl Response {
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Response::Failure(Failure {
            kind,
            message: message.into(),
        })
    }
}

impl From<TransformResult> for Response {
    fn from(result: TransformResult) -> Self {
        match result {
            Ok(image) => Response::Image(image),
            Err(err) => Response::from(err),
        }
    }
}

impl From<TransformError> for Response {
    fn from(err: TransformError) -> Self {
        Response::failure(err.kind(), err.to_string())
    }
}

/// Serialize a message into one complete frame.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::with_capacity(HEADER_LEN + 256);
    out.extend_from_slice(&[0u8; HEADER_LEN]);
    ciborium::into_writer(message, &mut out)?;

    let len = u32::try_from(out.len() - HEADER_LEN).map_err(|_| ProtocolError::FrameTooLarge {
        len: out.len() - HEADER_LEN,
        max: u32::MAX as usize,
    })?;
    out[0..4].copy_from_slice(&MAGIC);
    out[4..6].copy_from_slice(&VERSION.to_be_bytes());
    out[6..8].copy_from_slice(&FLAGS.to_be_bytes());
    out[8..12].copy_from_slice(&len.to_be_bytes());
    Ok(out)
}

/// Validate a header and return the payload length it announces.
pub fn parse_header(
    header: &[u8; HEADER_LEN],
    max_frame_bytes: usize,
) -> Result<usize, ProtocolError> {
    let magic = [header[0], header[1], header[2], header[3]];
    if magic != MAGIC {
        return Err(ProtocolError::BadMagic(magic));
    }
    let version = u16::from_be_bytes([header[4], header[5]]);
    if version != VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    let len = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
    if len > max_frame_bytes {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: max_frame_bytes,
        });
    }
    Ok(len)
}

pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ProtocolError> {
    Ok(ciborium::from_reader(payload)?)
}

/// Write one message as a frame (blocking).
pub fn write_frame<W: Write, T: Serialize>(
    writer: &mut W,
    message: &T,
) -> Result<(), ProtocolError> {
    let frame = encode_frame(message)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame's payload (blocking).
///
/// Returns `Ok(None)` when the peer closes the connection cleanly between
/// frames. Short reads are retried until the full header is in hand, so
/// partial delivery can't desynchronize the framing.
pub fn read_frame<R: Read>(
    reader: &mut R,
    max_frame_bytes: usize,
) -> Result<Option<Vec<u8>>, ProtocolError> {
    let mut header = [0u8; HEADER_LEN];
    let mut read = 0usize;
    while read < HEADER_LEN {
        match reader.read(&mut header[read..]) {
            Ok(0) if read == 0 => return Ok(None),
            Ok(0) => return Err(ProtocolError::TruncatedHeader { read }),
            Ok(n) => read += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    let len = parse_header(&header, max_frame_bytes)?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Some(payload))
}

/// Write one message as a frame (async).
pub async fn write_frame_async<W, T>(writer: &mut W, message: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame's payload (async). Same contract as [`read_frame`].
pub async fn read_frame_async<R>(
    reader: &mut R,
    max_frame_bytes: usize,
) -> Result<Option<Vec<u8>>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut read = 0usize;
    while read < HEADER_LEN {
        let n = reader.read(&mut header[read..]).await?;
        if n == 0 {
            if read == 0 {
                return Ok(None);
            }
            return Err(ProtocolError::TruncatedHeader { read });
        }
        read += n;
    }
    let len = parse_header(&header, max_frame_bytes)?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_request() -> Request {
        Request::RotateImage {
            rotation: 90,
            image: ImageBuffer::new(vec![0x89, b'P', b'N', b'G', 1, 2, 3]),
        }
    }

    #[test]
    fn frame_header_layout() {
        let frame = encode_frame(&sample_request()).unwrap();

        assert_eq!(&frame[0..4], b"NLIM");
        assert_eq!(&frame[4..6], &[0x00, 0x01]);
        assert_eq!(&frame[6..8], &[0x00, 0x00]);
        let len = u32::from_be_bytes([frame[8], frame[9], frame[10], frame[11]]) as usize;
        assert_eq!(len, frame.len() - HEADER_LEN);
    }

    #[test]
    fn request_survives_a_blocking_frame() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &sample_request()).unwrap();

        let payload = read_frame(&mut Cursor::new(wire), DEFAULT_MAX_FRAME_BYTES)
            .unwrap()
            .unwrap();
        let decoded: Request = decode_payload(&payload).unwrap();
        assert_eq!(decoded, sample_request());
    }

    #[test]
    fn failure_response_keeps_kind_and_message() {
        let response = Response::failure(ErrorKind::DecodeFailure, "image buffer is empty");
        let frame = encode_frame(&response).unwrap();

        let decoded: Response = decode_payload(&frame[HEADER_LEN..]).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn several_frames_read_back_in_order() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &Response::Image(ImageBuffer::new(vec![1]))).unwrap();
        write_frame(&mut wire, &Response::Image(ImageBuffer::new(vec![2, 2]))).unwrap();

        let mut cursor = Cursor::new(wire);
        let first: Response =
            decode_payload(&read_frame(&mut cursor, 1024).unwrap().unwrap()).unwrap();
        let second: Response =
            decode_payload(&read_frame(&mut cursor, 1024).unwrap().unwrap()).unwrap();
        assert_eq!(first, Response::Image(ImageBuffer::new(vec![1])));
        assert_eq!(second, Response::Image(ImageBuffer::new(vec![2, 2])));
        assert!(read_frame(&mut cursor, 1024).unwrap().is_none());
    }

    #[test]
    fn clean_eof_is_none() {
        let mut empty = Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut empty, 1024).unwrap().is_none());
    }

    #[test]
    fn partial_header_is_an_error() {
        let mut short = Cursor::new(b"NLIM\x00".to_vec());
        assert!(matches!(
            read_frame(&mut short, 1024),
            Err(ProtocolError::TruncatedHeader { read: 5 })
        ));
    }

    #[test]
    fn bad_magic_rejected() {
        let mut frame = encode_frame(&sample_request()).unwrap();
        frame[0] = b'X';
        assert!(matches!(
            read_frame(&mut Cursor::new(frame), 1024),
            Err(ProtocolError::BadMagic(_))
        ));
    }

    #[test]
    fn unknown_version_rejected() {
        let mut frame = encode_frame(&sample_request()).unwrap();
        frame[5] = 0x02;
        assert!(matches!(
            read_frame(&mut Cursor::new(frame), 1024),
            Err(ProtocolError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn oversized_frame_rejected_before_payload() {
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&MAGIC);
        header[4..6].copy_from_slice(&VERSION.to_be_bytes());
        header[8..12].copy_from_slice(&(10_000u32).to_be_bytes());

        assert!(matches!(
            parse_header(&header, 1024),
            Err(ProtocolError::FrameTooLarge {
                len: 10_000,
                max: 1024
            })
        ));
    }

    #[test]
    fn garbage_payload_is_decode_error() {
        let err = decode_payload::<Request>(&[0xff, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn transform_error_becomes_failure() {
        let err = TransformError::InvalidAngle(crate::types::InvalidAngle::Degrees(45));
        match Response::from(err) {
            Response::Failure(f) => {
                assert_eq!(f.kind, ErrorKind::InvalidAngle);
                assert!(f.message.contains("45"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn async_reader_accepts_blocking_writer_output() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &sample_request()).unwrap();

        let mut reader = wire.as_slice();
        let payload = read_frame_async(&mut reader, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap()
            .unwrap();
        let decoded: Request = decode_payload(&payload).unwrap();
        assert_eq!(decoded, sample_request());
        assert!(read_frame_async(&mut reader, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn async_writer_output_reads_blocking() {
        let mut wire: Vec<u8> = Vec::new();
        write_frame_async(&mut wire, &Response::failure(ErrorKind::Unavailable, "bye"))
            .await
            .unwrap();

        let payload = read_frame(&mut Cursor::new(wire), 1024).unwrap().unwrap();
        let decoded: Response = decode_payload(&payload).unwrap();
        assert_eq!(decoded, Response::failure(ErrorKind::Unavailable, "bye"));
    }
}
