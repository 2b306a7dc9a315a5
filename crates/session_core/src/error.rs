use modeling_engine::EngineError;
use shared::{
    domain::{ExportFormat, SheetKind, TabId},
    error::{ErrorCode, HostError},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("import failed: {0}")]
    Import(#[source] EngineError),
    #[error("save failed: {0}")]
    Save(#[source] EngineError),
    #[error("export failed: {0}")]
    Export(#[source] EngineError),
    #[error("failed to transcode {format} image: {source}")]
    Transcode {
        format: ExportFormat,
        source: anyhow::Error,
    },
    #[error("{0:?} sheets cannot be exported as images")]
    ExportUnsupported(SheetKind),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("no sheet is active")]
    NoActiveViewer,
    #[error("session for tab {0} has been closed")]
    Closed(TabId),
}

impl SessionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::Import(_) => ErrorCode::ImportFailed,
            SessionError::Save(_) => ErrorCode::SaveFailed,
            SessionError::Export(_) | SessionError::ExportUnsupported(_) => {
                ErrorCode::ExportFailed
            }
            SessionError::Transcode { .. } => ErrorCode::TranscodeFailed,
            SessionError::Engine(_) => ErrorCode::Engine,
            SessionError::NoActiveViewer | SessionError::Closed(_) => ErrorCode::Unavailable,
        }
    }

    pub fn to_host_error(&self) -> HostError {
        let error = HostError::new(self.code(), self.to_string());
        match self {
            SessionError::Import(EngineError::Import { warnings, .. }) => {
                error.with_warnings(warnings.clone())
            }
            _ => error,
        }
    }
}
