//! # Pixel Relay
//!
//! A small remote image transform service. A server accepts encoded images
//! over TCP, rotates them by a quarter-turn multiple or smooths them with a
//! 3×3 mean filter, and sends back an image in the same container format. A
//! client chains the two calls for a local file.
//!
//! # Architecture: Decode → Transform → Encode
//!
//! Every call follows the same shape on the server:
//!
//! ```text
//! ImageBuffer ──decode──► PixelGrid ──rotate / mean──► PixelGrid ──encode──► ImageBuffer
//! ```
//!
//! And the client strings calls together:
//!
//! ```text
//! file ──► RotateImage ──► [MeanFilter] ──► file
//! ```
//!
//! The transforms are pure functions over decoded pixels, so they are tested
//! without sockets, and the client pipeline is written against the
//! [`service::ImageService`] trait, so it is tested without a server.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`types`] | Shared values: `ImageBuffer`, `Rotation`, `RotateRequest` |
//! | [`imaging`] | Codec (sniff, decode, encode) and the rotate / mean-filter transforms |
//! | [`service`] | The two operations, the `ImageService` seam, and the in-process `Dispatcher` |
//! | [`protocol`] | Frame layout and CBOR request/response messages |
//! | [`server`] | tokio TCP server with a bounded worker pool and graceful shutdown |
//! | [`client`] | Blocking TCP client implementing `ImageService` |
//! | [`pipeline`] | Argument validation and the rotate → mean chain for the `transform` command |
//! | [`config`] | Server `config.toml` loading, validation, and merging |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Same Format Out As In
//!
//! The codec sniffs the container from magic bytes and the encoder writes the
//! same container back. Callers never name a format, and a PNG stays a PNG
//! through any number of calls. Lossy formats (JPEG, lossy WebP) are
//! re-encoded, so only lossless containers give exact pixels back.
//!
//! ## Identity Is Byte-Exact
//!
//! A 0° rotation still decodes its input, so garbage fails the same way it
//! would for any angle, but then returns the original bytes rather than a
//! re-encode. `transform --rotate NONE` without `--mean` therefore copies the
//! file exactly.
//!
//! ## Angles Are Validated Server-Side
//!
//! The wire carries the rotation as a plain integer and the dispatcher is the
//! one to reject anything outside {0, 90, 180, 270}, before any decoding. The
//! client also validates its command-line label first, so a typo never opens
//! a connection.
//!
//! ## Bounded Concurrency, No Shared State
//!
//! Each connection is a tokio task; each call takes a permit from a semaphore
//! (`workers.max_workers`, default 10) and runs its CPU-bound work on the
//! blocking pool. Calls share nothing, so there are no locks beyond the
//! semaphore itself. Excess calls wait for a permit.

pub mod client;
pub mod config;
pub mod imaging;
pub mod output;
pub mod pipeline;
pub mod protocol;
pub mod server;
pub mod service;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
