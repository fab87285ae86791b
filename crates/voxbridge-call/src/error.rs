use thiserror::Error;

#[derive(Error, Debug)]
pub enum CallError {
    #[error("signaling error: {0}")]
    Signaling(String),

    #[error("media error: {0}")]
    Media(String),

    #[error("conversation engine error: {0}")]
    Engine(String),

    /// The session was told to terminate before the operation finished.
    #[error("call session terminated")]
    Terminated,

    #[error("audio stream already taken")]
    StreamTaken,
}
