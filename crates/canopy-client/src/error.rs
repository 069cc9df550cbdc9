use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The request never produced a response.
    #[error("Network error: {0}")]
    Network(String),

    /// A response arrived but was not the expected shape.
    #[error("Unexpected response from server: {0}")]
    UnexpectedShape(String),

    /// The server answered with a failure status.
    #[error("{message} ({status})")]
    Server { status: u16, message: String },
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Network(err.to_string())
    }
}
