use thiserror::Error;

/// Errors raised while resolving clocks, ports and trigger bindings during
/// [`crate::domain::ClockDomain::init`]. Configuration errors are always
/// fatal and are never observed once a simulation starts running.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("clock `{0}` has a zero period and is not manual or disabled")]
    ZeroPeriod(String),
    #[error("cycle detected in clock connection graph starting at `{0}`")]
    ConnectionCycle(String),
    #[error("port `{0}` is referenced by a trigger but was never registered")]
    UnknownPort(String),
    #[error("divided clock `{child}` has no expressible rational ratio to `{generator}` (b >= 64)")]
    UnexpressibleRatio { child: String, generator: String },
}

/// Errors raised by the archive/checkpoint collaborator.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("archive magic mismatch: expected {expected:#x}, found {found:#x}")]
    BadMagic { expected: u32, found: u32 },
    #[error("archive version mismatch: this build writes {expected}, found {found}")]
    VersionMismatch { expected: f32, found: f32 },
    #[error("rolling checksum mismatch at offset {offset}: expected {expected}, found {found}")]
    ChecksumMismatch {
        offset: u64,
        expected: u8,
        found: u8,
    },
    #[error("unknown event factory key `{0}` encountered while loading")]
    UnknownEventKey(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Encode(#[from] Box<bincode::ErrorKind>),
}

/// A runtime assertion raised by component code during `tick`/`update`.
///
/// Captured into the thread pool's single-slot global error (see
/// [`crate::threadpool::ThreadPool`]) and rethrown by the main thread once the
/// barrier for the phase is crossed.
#[derive(Error, Debug, Clone)]
#[error("assertion failed in component `{component}`: {message}")]
pub struct AssertionError {
    pub component: String,
    pub message: String,
}

/// Top-level error type returned by the scheduler's run loop.
#[derive(Error, Debug)]
pub enum CascadeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Assertion(#[from] AssertionError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("simulation timed out after {0} ns (cascade.Timeout)")]
    Timeout(u64),
    #[error("simulation finished at {0} ns (cascade.Finish)")]
    Finish(u64),
}
