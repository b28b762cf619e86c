//! Blocking client for the transform server.
//!
//! Plain `std::net::TcpStream`: the client side runs one call at a time, so
//! it needs no runtime. One connection is reused for every call made through
//! the same [`RemoteClient`].

use crate::protocol::{
    DEFAULT_MAX_FRAME_BYTES, ProtocolError, Request, Response, decode_payload, read_frame,
    write_frame,
};
use crate::service::{CallError, ImageService};
use crate::types::{ImageBuffer, RotateRequest};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use tracing::debug;

/// How long to wait for the TCP handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A connection to a running transform server.
pub struct RemoteClient {
    addr: SocketAddr,
    stream: TcpStream,
    max_frame_bytes: usize,
}

impl RemoteClient {
    pub fn connect(addr: SocketAddr) -> Result<Self, CallError> {
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .map_err(|source| CallError::Connect { addr, source })?;
        stream
            .set_nodelay(true)
            .map_err(|source| CallError::Connect { addr, source })?;
        debug!(%addr, "connected");
        Ok(Self {
            addr,
            stream,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        })
    }

    /// Refuse responses larger than `limit` bytes instead of the default.
    pub fn with_max_frame_bytes(mut self, limit: usize) -> Self {
        self.max_frame_bytes = limit;
        self
    }

    /// Send one request and wait for its response.
    fn call(&mut self, request: Request) -> Result<ImageBuffer, CallError> {
        let operation = request.operation();
        debug!(operation, addr = %self.addr, "sending request");
        write_frame(&mut self.stream, &request)?;

        let payload = read_frame(&mut self.stream, self.max_frame_bytes)?
            .ok_or(ProtocolError::Closed)?;
        match decode_payload::<Response>(&payload)? {
            Response::Image(image) => {
                debug!(operation, bytes = image.len(), "response received");
                Ok(image)
            }
            Response::Failure(failure) => Err(CallError::Remote {
                operation,
                kind: failure.kind,
                message: failure.message,
            }),
        }
    }
}

impl ImageService for RemoteClient {
    fn rotate_image(&mut self, request: RotateRequest) -> Result<ImageBuffer, CallError> {
        self.call(Request::RotateImage {
            rotation: request.degrees,
            image: request.image,
        })
    }

    fn mean_filter(&mut self, image: ImageBuffer) -> Result<ImageBuffer, CallError> {
        self.call(Request::MeanFilter { image })
    }
}
