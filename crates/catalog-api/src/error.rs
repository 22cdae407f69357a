//! Errors from the auth calls

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Login endpoint or token persistence failed.
    #[error(transparent)]
    Auth(#[from] catalog_auth::Error),

    #[error(transparent)]
    Transport(#[from] catalog_transport::Error),
}

impl ApiError {
    /// True when the caller has to log in (again).
    pub fn requires_login(&self) -> bool {
        match self {
            ApiError::Auth(catalog_auth::Error::InvalidCredentials(_)) => true,
            ApiError::Transport(e) => e.requires_login(),
            ApiError::Auth(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
