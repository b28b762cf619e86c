//! The transform service: the two operations and the dispatcher that runs them.
//!
//! [`ImageService`] is the seam between the client pipeline and whatever
//! executes the calls. Implementations:
//!
//! - [`Dispatcher`]: in-process, used by the server's workers
//! - [`RemoteClient`](crate::client::RemoteClient): the same calls over TCP
//! - `MockService` (tests only): records calls and replays canned results
//!
//! Every call is independent. The dispatcher holds no state, so any number of
//! workers can share one.
//!
//! ## Call lifecycle
//!
//! ```text
//! Received → Decoding → Transforming → Encoding → Completed
//!     └──────────┴────────────┴───→ Failed(kind)
//! ```
//!
//! The rotation angle is checked while still `Received`, so a bad angle never
//! costs a decode. The decoded grid lives only inside the call and is dropped
//! on every exit path.

use crate::imaging::{self, CodecError, PixelGrid};
use crate::protocol::ProtocolError;
use crate::types::{ImageBuffer, InvalidAngle, RotateRequest, Rotation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::{debug, instrument};

/// Failure categories reported to the caller, on the wire and locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidAngle,
    DecodeFailure,
    EncodeFailure,
    /// The request frame could not be understood.
    BadRequest,
    /// The server is shutting down and takes no new calls.
    Unavailable,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidAngle => "InvalidAngle",
            ErrorKind::DecodeFailure => "DecodeFailure",
            ErrorKind::EncodeFailure => "EncodeFailure",
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::Unavailable => "Unavailable",
            ErrorKind::Internal => "Internal",
        };
        f.write_str(name)
    }
}

/// Why a single dispatcher call failed.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error(transparent)]
    InvalidAngle(#[from] InvalidAngle),
    #[error("decode failure: {0}")]
    DecodeFailure(#[source] CodecError),
    #[error("encode failure: {0}")]
    EncodeFailure(#[source] CodecError),
}

impl TransformError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransformError::InvalidAngle(_) => ErrorKind::InvalidAngle,
            TransformError::DecodeFailure(_) => ErrorKind::DecodeFailure,
            TransformError::EncodeFailure(_) => ErrorKind::EncodeFailure,
        }
    }
}

/// Either a new image or a failure. Never a partial result.
pub type TransformResult = Result<ImageBuffer, TransformError>;

/// Why an [`ImageService`] call failed, wherever it ran.
#[derive(Error, Debug)]
pub enum CallError {
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("{operation} rejected by server ({kind}): {message}")]
    Remote {
        operation: &'static str,
        kind: ErrorKind,
        message: String,
    },
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("transport error: {0}")]
    Transport(#[from] ProtocolError),
}

impl CallError {
    /// The service-level failure kind, if the call got far enough to have one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            CallError::Transform(err) => Some(err.kind()),
            CallError::Remote { kind, .. } => Some(*kind),
            CallError::Connect { .. } | CallError::Transport(_) => None,
        }
    }
}

/// The two operations of the transform service.
pub trait ImageService {
    /// Rotate an image by one of the allowed angles.
    fn rotate_image(&mut self, request: RotateRequest) -> Result<ImageBuffer, CallError>;

    /// Apply the 3×3 mean filter.
    fn mean_filter(&mut self, image: ImageBuffer) -> Result<ImageBuffer, CallError>;
}

/// Per-call progress, logged at `debug` as the call advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Received,
    Decoding,
    Transforming,
    Encoding,
    Completed,
    Failed(ErrorKind),
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Completed | CallState::Failed(_))
    }
}

struct Call {
    operation: &'static str,
    state: CallState,
}

impl Call {
    fn receive(operation: &'static str) -> Self {
        debug!(operation, state = ?CallState::Received, "call received");
        Self {
            operation,
            state: CallState::Received,
        }
    }

    fn advance(&mut self, next: CallState) {
        debug!(operation = self.operation, from = ?self.state, to = ?next, "call state");
        self.state = next;
    }

    fn fail(&mut self, err: TransformError) -> TransformError {
        self.advance(CallState::Failed(err.kind()));
        err
    }

    /// Decode, transform, encode. The grid never outlives this function.
    fn run(
        mut self,
        image: &ImageBuffer,
        transform: impl FnOnce(&PixelGrid) -> PixelGrid,
    ) -> TransformResult {
        self.advance(CallState::Decoding);
        let grid = imaging::decode(image).map_err(|e| self.fail(TransformError::DecodeFailure(e)))?;

        self.advance(CallState::Transforming);
        let transformed = transform(&grid);
        drop(grid);

        self.advance(CallState::Encoding);
        let encoded =
            imaging::encode(&transformed).map_err(|e| self.fail(TransformError::EncodeFailure(e)))?;

        self.advance(CallState::Completed);
        Ok(encoded)
    }
}

/// Runs service calls in-process. Stateless and `Copy`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dispatcher;

impl Dispatcher {
    pub fn new() -> Self {
        Self
    }

    /// Validate the angle, then decode → rotate → encode.
    ///
    /// A 0° rotation still decodes the input (malformed bytes fail the same
    /// way as any other angle) but hands back the original bytes untouched, so
    /// an identity request is byte-exact.
    #[instrument(
        name = "RotateImage",
        skip_all,
        fields(degrees = request.degrees, bytes = request.image.len())
    )]
    pub fn rotate_image(&self, request: RotateRequest) -> TransformResult {
        let mut call = Call::receive("RotateImage");
        let rotation =
            Rotation::from_degrees(request.degrees).map_err(|e| call.fail(e.into()))?;

        if rotation == Rotation::None {
            call.advance(CallState::Decoding);
            imaging::decode(&request.image)
                .map_err(|e| call.fail(TransformError::DecodeFailure(e)))?;
            call.advance(CallState::Transforming);
            call.advance(CallState::Encoding);
            call.advance(CallState::Completed);
            return Ok(request.image);
        }

        call.run(&request.image, |grid| imaging::rotate(grid, rotation))
    }

    /// Decode → mean filter → encode.
    #[instrument(name = "MeanFilter", skip_all, fields(bytes = image.len()))]
    pub fn mean_filter(&self, image: ImageBuffer) -> TransformResult {
        Call::receive("MeanFilter").run(&image, imaging::mean_filter)
    }
}

impl ImageService for Dispatcher {
    fn rotate_image(&mut self, request: RotateRequest) -> Result<ImageBuffer, CallError> {
        Ok(Dispatcher::rotate_image(self, request)?)
    }

    fn mean_filter(&mut self, image: ImageBuffer) -> Result<ImageBuffer, CallError> {
        Ok(Dispatcher::mean_filter(self, image)?)
    }
}
