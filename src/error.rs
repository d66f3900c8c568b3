use thiserror::Error;

/// Errors produced while loading the inventory, touching the state store or
/// serving a request.
#[derive(Debug, Error)]
pub enum AppError {
    /// No inventory row carries the requested code.
    #[error("{0}")]
    NotFound(String),

    /// A mandatory logical column could not be matched against the headers.
    #[error("no column matches {column} (tried: {candidates})")]
    MissingColumn {
        column: &'static str,
        candidates: String,
    },

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("workbook package error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("template error: {0}")]
    Template(String),

    #[error("authentication error: {0}")]
    Auth(String),
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(feature = "web")]
impl From<handlebars::RenderError> for AppError {
    fn from(err: handlebars::RenderError) -> Self {
        AppError::Template(err.to_string())
    }
}

#[cfg(feature = "web")]
impl From<handlebars::TemplateError> for AppError {
    fn from(err: handlebars::TemplateError) -> Self {
        AppError::Template(err.to_string())
    }
}

#[cfg(feature = "web")]
impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("request failed: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}
