use thiserror::Error;

use crate::types::operator::OperatorId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Operator {0} is not part of any quorum")]
    NotInAnyQuorum(OperatorId),

    #[error("Request to operator at {socket} timed out")]
    Timeout { socket: String },

    #[error("Failed to reach operator at {socket}: {message}")]
    Connection { socket: String, message: String },

    #[error("Operator at {socket} rejected the request with status {status}: {message}")]
    Rejected { socket: String, status: u16, message: String },

    #[error("Invalid operator reply from {socket}: {message}")]
    InvalidReply { socket: String, message: String },

    #[error("Invalid operator socket {0}")]
    InvalidSocket(String),
}

impl DispatchError {
    pub fn from_reqwest_error(socket: &str, source: reqwest::Error) -> Self {
        let socket = socket.to_string();
        if source.is_timeout() {
            return DispatchError::Timeout { socket };
        }
        match source.status() {
            Some(status) => DispatchError::Rejected { socket, status: status.as_u16(), message: source.to_string() },
            None if source.is_decode() => DispatchError::InvalidReply { socket, message: source.to_string() },
            None => DispatchError::Connection { socket, message: source.to_string() },
        }
    }
}
