use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum MailExtractError {
    #[error("multipart content declares no boundary parameter")]
    MissingBoundary,
    #[error("invalid header block: {0}")]
    HeaderParse(String),
    #[error("body decode: {0}")]
    BodyDecode(String),
}
