use thiserror::Error;

/// Failure to obtain a valid `FeatureCollection`. Never cached, so a later load of the
/// same key starts a fresh request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("fetch error for {url}: {message}")]
    Network { url: String, message: String },
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("{url} is not a FeatureCollection (type: {kind})")]
    NotFeatureCollection { url: String, kind: String },
    #[error("parse error for {url}: {message}")]
    Parse { url: String, message: String },
}

impl LoadError {
    #[cfg(test)]
    pub fn url(&self) -> &str {
        match self {
            LoadError::Network { url, .. }
            | LoadError::Status { url, .. }
            | LoadError::NotFeatureCollection { url, .. }
            | LoadError::Parse { url, .. } => url,
        }
    }
}

/// Programming errors in how the controller is driven.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("layer `{layer}` references unknown source `{source_id}`")]
    UnknownSource { layer: String, source_id: String },
    #[error("surface was detached before source `{id}` could be applied")]
    SurfaceDetached { id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Usage(#[from] UsageError),
}
