#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unexpected end of data")]
    UnexpectedEof,

    #[error("invalid length: {len} bytes (must be a multiple of {multiple})")]
    InvalidLength { len: usize, multiple: usize },

    #[error("session has no XTEA key")]
    NotKeyed,

    #[error("peer closed mid-frame")]
    Truncated,

    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    #[error("string too long: {len} bytes (max {max})")]
    StringTooLong { len: usize, max: usize },

    #[error("not connected")]
    NotConnected,

    #[error("login interception timed out")]
    LoginStall,

    #[error("recording not found: {0}")]
    RecordingNotFound(String),

    #[error("invalid recording name: {0}")]
    InvalidRecordingName(String),

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("task error: {0}")]
    Task(String),

    #[error("lua error: {0}")]
    Lua(#[from] mlua::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("setup failure: {0}")]
    Setup(String),
}

pub type Result<T> = std::result::Result<T, Error>;
