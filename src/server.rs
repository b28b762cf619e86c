//! TCP server for the transform service.
//!
//! One tokio task per connection reads frames, and each decoded request is
//! handed to a blocking worker. A semaphore caps the number of calls
//! transforming at once at `workers.max_workers`; further calls wait for a
//! slot in arrival order.
//!
//! ## Shutdown
//!
//! When the shutdown future resolves the listener is dropped, idle
//! connections are closed, and the worker semaphore is closed so queued calls
//! are answered with `Unavailable`. Calls that already hold a worker get
//! `server.shutdown_grace_secs` to finish; after that their connections are
//! aborted and no response is sent.

use crate::config::ServerConfig;
use crate::protocol::{
    ProtocolError, Request, Response, decode_payload, read_frame_async, write_frame_async,
};
use crate::service::{Dispatcher, ErrorKind};
use crate::types::RotateRequest;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// State shared by every connection task.
struct Shared {
    dispatcher: Dispatcher,
    workers: Arc<Semaphore>,
    max_frame_bytes: usize,
    served: AtomicU64,
}

/// A bound, not yet running, transform server.
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    shared: Arc<Shared>,
}

impl Server {
    /// Bind the listening socket described by `config`.
    pub async fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let addr = config.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        let shared = Arc::new(Shared::new(config));

        Ok(Self {
            listener,
            config: config.clone(),
            shared,
        })
    }

    /// The address actually bound. Differs from the config when port is 0.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until Ctrl-C or SIGTERM.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(shutdown_signal()).await
    }

    /// Serve until `shutdown` resolves, then drain as described in the module docs.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let Server {
            listener,
            config,
            shared,
        } = self;

        info!(
            addr = %listener.local_addr()?,
            max_workers = config.workers.max_workers,
            "server listening"
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "connection accepted");
                        connections.spawn(handle_connection(
                            stream,
                            peer,
                            Arc::clone(&shared),
                            stop_rx.clone(),
                        ));
                    }
                    // Accept errors (e.g. EMFILE) are per-connection; keep serving.
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "connection task failed");
                    }
                }
            }
        }

        info!(
            in_flight = connections.len(),
            grace_secs = config.server.shutdown_grace_secs,
            "shutting down"
        );
        drop(listener);
        let _ = stop_tx.send(true);
        shared.workers.close();

        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(config.shutdown_grace(), drain)
            .await
            .is_err()
        {
            warn!(
                remaining = connections.len(),
                "grace period elapsed; aborting in-flight calls"
            );
            connections.shutdown().await;
        }

        info!(
            served = shared.served.load(Ordering::Relaxed),
            "server stopped"
        );
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
    mut stop: watch::Receiver<bool>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, error = %e, "set_nodelay failed");
    }
    let (mut reader, mut writer) = stream.into_split();

    loop {
        if *stop.borrow() {
            break;
        }
        let frame = tokio::select! {
            _ = stop.changed() => break,
            frame = read_frame_async(&mut reader, shared.max_frame_bytes) => frame,
        };

        let payload = match frame {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!(%peer, "connection closed by client");
                break;
            }
            Err(e) => {
                warn!(%peer, error = %e, "dropping connection");
                // Framing is lost after a bad header; say why before hanging up.
                if matches!(
                    e,
                    ProtocolError::BadMagic(_)
                        | ProtocolError::UnsupportedVersion(_)
                        | ProtocolError::FrameTooLarge { .. }
                ) {
                    let reply = Response::failure(ErrorKind::BadRequest, e.to_string());
                    let _ = write_frame_async(&mut writer, &reply).await;
                }
                break;
            }
        };

        let response = match decode_payload::<Request>(&payload) {
            Ok(request) => shared.call(request).await,
            Err(e) => {
                warn!(%peer, error = %e, "malformed request");
                Response::failure(ErrorKind::BadRequest, e.to_string())
            }
        };

        if let Err(e) = write_frame_async(&mut writer, &response).await {
            warn!(%peer, error = %e, "failed to send response");
            break;
        }
    }
}

impl Shared {
    fn new(config: &ServerConfig) -> Self {
        Self {
            dispatcher: Dispatcher::new(),
            workers: Arc::new(Semaphore::new(config.workers.max_workers)),
            max_frame_bytes: config.limits.max_frame_bytes,
            served: AtomicU64::new(0),
        }
    }

    /// Wait for a worker slot, then run the request on the blocking pool.
    async fn call(&self, request: Request) -> Response {
        let operation = request.operation();
        let permit = match Arc::clone(&self.workers).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                debug!(operation, "rejected during shutdown");
                return Response::failure(ErrorKind::Unavailable, "server is shutting down");
            }
        };

        let dispatcher = self.dispatcher;
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            dispatch(dispatcher, request)
        });

        match task.await {
            Ok(response) => {
                self.served.fetch_add(1, Ordering::Relaxed);
                response
            }
            Err(e) => {
                error!(operation, error = %e, "worker failed");
                Response::failure(ErrorKind::Internal, "internal error")
            }
        }
    }
}

/// Run one request against the dispatcher and turn the outcome into a reply.
pub fn dispatch(dispatcher: Dispatcher, request: Request) -> Response {
    let operation = request.operation();
    let result = match request {
        Request::RotateImage { rotation, image } => dispatcher.rotate_image(RotateRequest {
            image,
            degrees: rotation,
        }),
        Request::MeanFilter { image } => dispatcher.mean_filter(image),
    };
    match &result {
        Ok(image) => info!(operation, bytes = image.len(), "call completed"),
        Err(e) => warn!(operation, kind = %e.kind(), error = %e, "call failed"),
    }
    Response::from(result)
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
