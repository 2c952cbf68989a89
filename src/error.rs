use thiserror::Error;

/// Library error type for loading supervisor configuration.
///
/// Rendering faults never surface here; they are recorded as state on the
/// [`RenderSupervisor`](crate::supervisor::RenderSupervisor) instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML/serde configuration error.
    #[error(transparent)]
    Config(#[from] serde_yaml::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
