use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("ADDRESS_IN_USE: rendezvous socket '{0}' exists and cannot be reclaimed. Another dashboard may be attached to this target.")]
    AddressInUse(std::path::PathBuf),

    #[error("TARGET_NOT_FOUND: no attach session for {target}{hint}")]
    TargetNotFound { target: String, hint: &'static str },

    #[error("TIMEOUT: {0} did not complete in time")]
    Timeout(&'static str),

    #[error("END_OF_STREAM: peer closed the channel")]
    EndOfStream,

    #[error("TRUNCATED_FRAME: channel closed in the middle of a frame")]
    TruncatedFrame,

    #[error("DISCONNECTED: channel to the target is gone")]
    Disconnected,

    #[error("PROTOCOL: {0}")]
    Protocol(String),

    #[error("COMMAND_FAILED: target reported failure for command '{0}'")]
    CommandFailed(String),

    #[error("COMMAND_NOT_FOUND: target does not recognize command '{0}'")]
    CommandNotFound(String),

    #[error("EXTENSION_INSTALL_FAILED: extension '{id}': {reason}")]
    ExtensionInstall { id: String, reason: String },

    #[error("UNKNOWN_PROBE: no probe named '{0}' in the host catalog")]
    UnknownProbe(String),

    #[error("PROBE_FAILED: {0}")]
    Probe(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
