//! Client-side orchestration: validate, rotate, optionally filter, write.
//!
//! ```text
//! source file ──► RotateImage ──► [MeanFilter] ──► output file
//! ```
//!
//! The second stage always consumes exactly what the first produced. If a
//! stage fails nothing after it runs and no output file is written.
//!
//! Everything that can be checked locally is checked before a connection is
//! opened, in this order: host, port, rotation label, source file.
//!
//! [`Pipeline`] is generic over [`ImageService`], so the same chain runs
//! against the TCP client, an in-process [`Dispatcher`](crate::service::Dispatcher),
//! or a mock in tests.

use crate::client::RemoteClient;
use crate::protocol::DEFAULT_MAX_FRAME_BYTES;
use crate::service::{CallError, ImageService};
use crate::types::{ImageBuffer, InvalidAngle, RotateRequest, Rotation};
use std::fmt;
use std::fs;
use std::io::Write;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid host '{0}': expected an IP address")]
    InvalidHost(String),
    #[error("invalid port '{0}': expected a number from 1 to 65535")]
    InvalidPort(String),
    #[error(transparent)]
    InvalidAngle(#[from] InvalidAngle),
    #[error("source image not found: {}", .0.display())]
    SourceNotFound(PathBuf),
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: CallError,
    },
    #[error(transparent)]
    Service(#[from] CallError),
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One remote call in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Rotate(Rotation),
    MeanFilter,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Rotate(rotation) => write!(f, "rotate {rotation}"),
            Stage::MeanFilter => f.write_str("mean filter"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub stage: Stage,
    pub input_bytes: usize,
    pub output_bytes: usize,
    pub elapsed: Duration,
}

/// The transform chain: always a rotation, then an optional mean filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pipeline {
    pub rotation: Rotation,
    pub mean: bool,
}

impl Pipeline {
    pub fn new(rotation: Rotation, mean: bool) -> Self {
        Self { rotation, mean }
    }

    pub fn stages(&self) -> Vec<Stage> {
        let mut stages = vec![Stage::Rotate(self.rotation)];
        if self.mean {
            stages.push(Stage::MeanFilter);
        }
        stages
    }

    /// Run every stage in order, feeding each output into the next.
    pub fn run<S>(
        &self,
        service: &mut S,
        source: ImageBuffer,
    ) -> Result<(ImageBuffer, Vec<StageReport>), PipelineError>
    where
        S: ImageService + ?Sized,
    {
        let mut current = source;
        let mut reports = Vec::new();

        for stage in self.stages() {
            let input_bytes = current.len();
            let started = Instant::now();
            debug!(%stage, input_bytes, "stage starting");

            current = match stage {
                Stage::Rotate(rotation) => {
                    service.rotate_image(RotateRequest::new(current, rotation))
                }
                Stage::MeanFilter => service.mean_filter(current),
            }
            .map_err(|source| PipelineError::Stage { stage, source })?;

            reports.push(StageReport {
                stage,
                input_bytes,
                output_bytes: current.len(),
                elapsed: started.elapsed(),
            });
        }

        Ok((current, reports))
    }
}

/// Outcome of a successful [`TransformJob`].
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub input_bytes: usize,
    pub output_bytes: usize,
    pub stages: Vec<StageReport>,
}

/// A validated `transform` invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformJob {
    pub addr: SocketAddr,
    pub input: PathBuf,
    pub output: PathBuf,
    pub pipeline: Pipeline,
    /// Largest response frame accepted from the server.
    pub max_frame_bytes: usize,
}

impl TransformJob {
    /// Validate the raw command-line values. Nothing touches the network here.
    pub fn from_args(
        host: &str,
        port: &str,
        rotate: &str,
        mean: bool,
        input: &Path,
        output: &Path,
    ) -> Result<Self, PipelineError> {
        let ip: IpAddr = host
            .trim()
            .parse()
            .map_err(|_| PipelineError::InvalidHost(host.to_string()))?;
        let port = parse_port(port)?;
        let rotation = Rotation::from_label(rotate)?;
        if !input.is_file() {
            return Err(PipelineError::SourceNotFound(input.to_path_buf()));
        }

        Ok(Self {
            addr: SocketAddr::new(ip, port),
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            pipeline: Pipeline::new(rotation, mean),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        })
    }

    pub fn with_max_frame_bytes(mut self, limit: usize) -> Self {
        self.max_frame_bytes = limit;
        self
    }

    /// Connect to the server and run the job.
    pub fn run(&self) -> Result<JobReport, PipelineError> {
        let mut client =
            RemoteClient::connect(self.addr)?.with_max_frame_bytes(self.max_frame_bytes);
        self.run_with(&mut client)
    }

    /// Run the job against any service.
    pub fn run_with<S>(&self, service: &mut S) -> Result<JobReport, PipelineError>
    where
        S: ImageService + ?Sized,
    {
        let source = fs::read(&self.input).map_err(|source| PipelineError::Io {
            path: self.input.clone(),
            source,
        })?;
        let input_bytes = source.len();
        info!(
            input = %self.input.display(),
            bytes = input_bytes,
            rotation = %self.pipeline.rotation,
            mean = self.pipeline.mean,
            "transforming"
        );

        let (result, stages) = self.pipeline.run(service, ImageBuffer::new(source))?;

        write_output(&self.output, result.as_bytes())?;
        info!(output = %self.output.display(), bytes = result.len(), "wrote output");

        Ok(JobReport {
            input: self.input.clone(),
            output: self.output.clone(),
            input_bytes,
            output_bytes: result.len(),
            stages,
        })
    }
}

fn parse_port(raw: &str) -> Result<u16, PipelineError> {
    match raw.trim().parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(PipelineError::InvalidPort(raw.to_string())),
    }
}

/// Write into a temp file beside `path`, then rename over it, so readers never
/// see a half-written image.
fn write_output(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let io_err = |source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    };
    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            fs::create_dir_all(parent).map_err(io_err)?;
            parent
        }
        None => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(parent).map_err(io_err)?;
    staged.write_all(bytes).map_err(io_err)?;
    staged.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}
