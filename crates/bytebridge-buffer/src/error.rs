#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("channel already reached end-of-stream")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
