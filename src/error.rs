use snafu::{Backtrace, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Invalid configuration: {message}"))]
    Config {
        message: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Connect failed: {message}"))]
    Connect {
        message: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Subscribe to {channel} failed: {message}"))]
    Subscribe {
        channel: String,
        message: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Publish to {channel} failed: {message}"))]
    Publish {
        channel: String,
        message: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Transport error: {message}"))]
    Transport {
        message: String,
        backtrace: Backtrace,
    },
}

impl Error {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Error::Config {
            message: message.into(),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn connect<S: Into<String>>(message: S) -> Self {
        Error::Connect {
            message: message.into(),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn subscribe(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Subscribe {
            channel: channel.into(),
            message: message.into(),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn publish(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Publish {
            channel: channel.into(),
            message: message.into(),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn transport<S: Into<String>>(message: S) -> Self {
        Error::Transport {
            message: message.into(),
            backtrace: Backtrace::capture(),
        }
    }

    /// Only configuration problems abort a run; everything else is reported
    /// where it happens and retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config { .. })
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::transport(error.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::transport(format!("JSON encoding failed: {error}"))
    }
}
