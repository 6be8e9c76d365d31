use thiserror::Error;

pub type MailResult<T> = Result<T, MailError>;

#[derive(Debug, Error)]
pub enum MailError {
    /// A job or request is missing a required field or carries a malformed one.
    #[error("validation error: {0}")]
    Validation(String),

    /// The mail provider rejected or failed one delivery.
    #[error("send error: {0}")]
    Send(String),

    /// The tenant role does not allow the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("template error: {0}")]
    Template(String),

    /// Queue store read/write failure. Nothing about the drain can be trusted after this.
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("config error: {0}")]
    Config(String),
}

impl MailError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn send(msg: impl Into<String>) -> Self {
        Self::Send(msg.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::Send(_) => "SEND_FAILED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Template(_) => "TEMPLATE",
            Self::Persistence(_) => "PERSISTENCE",
            Self::Config(_) => "CONFIG",
        }
    }
}

impl From<sqlx::Error> for MailError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for MailError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Persistence(format!("migration failed: {err}"))
    }
}

impl From<handlebars::RenderError> for MailError {
    fn from(err: handlebars::RenderError) -> Self {
        Self::Template(err.to_string())
    }
}

impl From<lettre::error::Error> for MailError {
    fn from(err: lettre::error::Error) -> Self {
        Self::Send(format!("failed to build message: {err}"))
    }
}

impl From<lettre::address::AddressError> for MailError {
    fn from(err: lettre::address::AddressError) -> Self {
        Self::Send(format!("invalid address: {err}"))
    }
}

impl From<lettre::transport::smtp::Error> for MailError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        Self::Send(format!("smtp: {err}"))
    }
}
