use std::net::SocketAddr;

/// Crate-wide error type. Every failure surfaced by the core goes through one of
/// these variants; there is no separate per-component error type.
#[derive(thiserror::Error, Debug, Clone)]
pub enum RedisError {
    #[error("failed to connect: {0}")]
    ConnectFailure(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("{class}: {message}")]
    ServerError { class: String, message: String },

    #[error("redirect to {addr} ({kind:?}, slot {slot})")]
    Redirect {
        kind: RedirectKind,
        slot: u16,
        addr: SocketAddr,
    },

    #[error("request cancelled")]
    Cancelled,

    #[error("connection closed: {0}")]
    Disconnected(String),

    #[error("max redirects exceeded")]
    RoutingExhausted,

    #[error("cross-slot operation: keys span {0} distinct slots")]
    CrossSlot(usize),

    #[error("transaction aborted")]
    TransactionAborted,

    #[error("operation not valid while connection is in {0:?}")]
    InvalidState(crate::connection::ConnectionState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    Moved,
    Ask,
}

pub type RedisResult<T> = Result<T, RedisError>;

impl From<std::io::Error> for RedisError {
    fn from(e: std::io::Error) -> Self {
        RedisError::Disconnected(e.to_string())
    }
}

impl From<std::str::Utf8Error> for RedisError {
    fn from(e: std::str::Utf8Error) -> Self {
        RedisError::ProtocolViolation(e.to_string())
    }
}

impl From<std::num::ParseIntError> for RedisError {
    fn from(e: std::num::ParseIntError) -> Self {
        RedisError::ProtocolViolation(e.to_string())
    }
}

impl RedisError {
    /// Classify a RESP error line ("CLASS rest of message") into a structured error.
    pub fn from_server_line(line: &str) -> RedisError {
        let mut parts = line.splitn(2, ' ');
        let class = parts.next().unwrap_or("").to_string();
        let message = parts.next().unwrap_or("").to_string();
        match class.as_str() {
            "MOVED" | "ASK" => {
                if let Some(redirect) = parse_redirect(&class, &message) {
                    return redirect;
                }
                RedisError::ServerError { class, message }
            }
            _ => RedisError::ServerError { class, message },
        }
    }
}

fn parse_redirect(class: &str, message: &str) -> Option<RedisError> {
    let mut fields = message.split_whitespace();
    let slot: u16 = fields.next()?.parse().ok()?;
    let addr: SocketAddr = fields.next()?.parse().ok()?;
    let kind = if class == "MOVED" {
        RedirectKind::Moved
    } else {
        RedirectKind::Ask
    };
    Some(RedisError::Redirect { kind, slot, addr })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_plain_error() {
        let err = RedisError::from_server_line("WRONGTYPE Operation against a wrong kind");
        match err {
            RedisError::ServerError { class, message } => {
                assert_eq!(class, "WRONGTYPE");
                assert_eq!(message, "Operation against a wrong kind");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn classifies_moved_redirect() {
        let err = RedisError::from_server_line("MOVED 1649 10.0.0.2:6379");
        match err {
            RedisError::Redirect { kind, slot, addr } => {
                assert_eq!(kind, RedirectKind::Moved);
                assert_eq!(slot, 1649);
                assert_eq!(addr.to_string(), "10.0.0.2:6379");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
