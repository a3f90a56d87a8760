//! Network utilities
//!
//! Listening socket setup and classification of accept failures.

use std::io::{self, ErrorKind};
use tokio::net::{TcpListener, TcpSocket, lookup_host};

use crate::config::ServerConfig;
use crate::error::ServerError;

/// How the acceptor loop should react to a failed `accept()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptErrorKind {
    /// The pending connection died before it was accepted; keep going
    Transient,
    /// Out of descriptors or memory; back off briefly, then keep going
    ResourceExhausted,
    /// The listening socket itself is unusable
    Fatal,
}

/// Resolves the configured address and binds a listener with its backlog.
pub async fn bind_listener(config: &ServerConfig) -> Result<TcpListener, ServerError> {
    let addr_str = config.socket_addr();
    let bind_err = |source: io::Error| ServerError::Bind {
        addr: addr_str.clone(),
        source,
    };

    let addr = lookup_host(&addr_str)
        .await
        .map_err(bind_err)?
        .next()
        .ok_or_else(|| ServerError::Resolve(addr_str.clone()))?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_err)?;

    socket.set_reuseaddr(true).map_err(bind_err)?;
    socket.bind(addr).map_err(bind_err)?;
    socket.listen(config.backlog).map_err(bind_err)
}

/// Classifies an error returned by `TcpListener::accept`.
pub fn classify_accept_error(err: &io::Error) -> AcceptErrorKind {
    if let Some(kind) = err.raw_os_error().and_then(classify_os_error) {
        return kind;
    }

    match err.kind() {
        ErrorKind::InvalidInput => AcceptErrorKind::Fatal,
        ErrorKind::OutOfMemory => AcceptErrorKind::ResourceExhausted,
        _ => AcceptErrorKind::Transient,
    }
}

#[cfg(unix)]
fn classify_os_error(code: i32) -> Option<AcceptErrorKind> {
    match code {
        libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM => {
            Some(AcceptErrorKind::ResourceExhausted)
        }
        libc::EBADF | libc::ENOTSOCK | libc::EINVAL => Some(AcceptErrorKind::Fatal),
        _ => None,
    }
}

#[cfg(not(unix))]
fn classify_os_error(_code: i32) -> Option<AcceptErrorKind> {
    None
}
