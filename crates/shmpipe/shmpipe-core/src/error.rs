use shmpipe_config::ConfigError;
use std::io;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(
        "can't fit payload of {payload_size} bytes and a {header_size}-byte header \
         into {number_of_chunks} chunks of {chunk_size} bytes"
    )]
    OversizedMessage {
        payload_size: i32,
        header_size: usize,
        chunk_size: usize,
        number_of_chunks: usize,
    },

    #[error("message header reports a negative payload size ({0})")]
    NegativePayload(i32),

    #[error("remote party is not responsive: timed out after {timeout:?} on '{semaphore}'")]
    RemoteUnresponsive { semaphore: String, timeout: Duration },

    #[error("'{0}' has been disposed already")]
    AlreadyDisposed(String),

    #[error("already connected")]
    AlreadyConnected,

    #[error("not connected")]
    NotConnected,

    #[error("peer has not created '{name}' yet")]
    PeerNotReady {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("channel '{channel}' is corrupted: {detail}")]
    TransportCorruption { channel: String, detail: String },

    #[error("receive loop of '{0}' has failed")]
    SinkFailed(String),

    #[error("payload writer failed")]
    PayloadWrite(#[source] io::Error),

    #[error("I/O error on '{object}'")]
    Io {
        object: String,
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    pub(crate) fn io(object: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            object: object.into(),
            source,
        }
    }

    pub(crate) fn corruption(channel: &str, detail: impl Into<String>) -> Self {
        Self::TransportCorruption {
            channel: channel.to_owned(),
            detail: detail.into(),
        }
    }

    /// Map an open failure, turning "does not exist" into `PeerNotReady`.
    pub(crate) fn open(object: impl Into<String>, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::PeerNotReady {
                name: object.into(),
                source,
            }
        } else {
            Self::io(object, source)
        }
    }

    /// True for errors that end a sink's receive loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::TransportCorruption { .. } | Self::Io { .. })
    }
}
