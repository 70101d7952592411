//! Shared SSH connection manager.
//!
//! One logical session is kept per host. libssh2 sessions are not safe for
//! concurrent use, so every SFTP operation runs under the connection's mutex;
//! a transport-level failure drops the session and the next operation
//! reconnects lazily.

use super::config::{expand_key_path, host_config};
use crate::error::VfsError;
use crate::ignore_poison::IgnorePoison;
use ssh2::{Session, Sftp};
use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::{Arc, LazyLock, Mutex};

struct ConnState {
    // Session must stay alive while the Sftp channel is used
    _session: Session,
    sftp: Sftp,
}

/// One logical session to a host, reconnecting lazily on failure.
pub struct SshConnection {
    host: String,
    state: Mutex<Option<ConnState>>,
}

impl SshConnection {
    fn new(host: &str) -> SshConnection {
        SshConnection {
            host: host.to_string(),
            state: Mutex::new(None),
        }
    }

    fn connect(&self) -> Result<ConnState, VfsError> {
        let config = host_config(&self.host)?;
        let address = format!("{}:{}", self.host, config.port);
        log::info!("connecting to ssh host {}", address);

        let stream = TcpStream::connect(&address)
            .map_err(|e| VfsError::io(&address, format!("connect failed: {}", e)))?;
        let mut session = Session::new()
            .map_err(|e| VfsError::io(&address, format!("session init failed: {}", e)))?;
        session.set_tcp_stream(stream);
        session
            .handshake()
            .map_err(|e| VfsError::io(&address, format!("handshake failed: {}", e)))?;

        if let Some(key_file) = &config.key_file {
            let key = expand_key_path(key_file);
            session
                .userauth_pubkey_file(&config.user, None, &key, None)
                .map_err(|e| VfsError::ConfigurationError {
                    message: format!("key auth failed for {}@{}: {}", config.user, self.host, e),
                })?;
        } else if let Some(password) = &config.password {
            session
                .userauth_password(&config.user, password)
                .map_err(|e| VfsError::ConfigurationError {
                    message: format!("password auth failed for {}@{}: {}", config.user, self.host, e),
                })?;
        } else {
            session
                .userauth_agent(&config.user)
                .map_err(|e| VfsError::ConfigurationError {
                    message: format!("agent auth failed for {}@{}: {}", config.user, self.host, e),
                })?;
        }

        let sftp = session
            .sftp()
            .map_err(|e| VfsError::io(&address, format!("sftp channel failed: {}", e)))?;
        Ok(ConnState {
            _session: session,
            sftp,
        })
    }

    /// Runs one SFTP operation under the connection lock, connecting first if
    /// needed. A failed operation drops the session so the next call
    /// reconnects; the operation itself is retried once on a fresh session.
    pub fn with_sftp<T>(
        &self,
        f: impl Fn(&Sftp) -> Result<T, ssh2::Error>,
        path_for_errors: &str,
    ) -> Result<T, VfsError> {
        let mut state = self.state.lock_ignore_poison();
        if state.is_none() {
            *state = Some(self.connect()?);
        }

        let sftp = &state.as_ref().expect("connected above").sftp;
        match f(sftp) {
            Ok(value) => Ok(value),
            Err(first_err) if is_transport_error(&first_err) => {
                log::warn!(
                    "ssh session to {} failed ({}), reconnecting",
                    self.host,
                    first_err
                );
                *state = Some(self.connect()?);
                let sftp = &state.as_ref().expect("reconnected above").sftp;
                f(sftp).map_err(|e| map_sftp_error(e, path_for_errors))
            }
            Err(err) => Err(map_sftp_error(err, path_for_errors)),
        }
    }

    /// Like [`with_sftp`](Self::with_sftp) for operations that stream file
    /// data and therefore surface `io::Error`. No retry: a half-read stream
    /// cannot be resumed, so the failure is reported and the session dropped
    /// for the next caller.
    pub fn with_sftp_io<T>(
        &self,
        f: impl FnOnce(&Sftp) -> Result<T, std::io::Error>,
        path_for_errors: &str,
    ) -> Result<T, VfsError> {
        let mut state = self.state.lock_ignore_poison();
        if state.is_none() {
            *state = Some(self.connect()?);
        }
        let sftp = &state.as_ref().expect("connected above").sftp;
        match f(sftp) {
            Ok(value) => Ok(value),
            Err(err) => {
                *state = None;
                Err(VfsError::from_io(err, path_for_errors))
            }
        }
    }

    /// Drops the session; the next operation reconnects.
    pub fn disconnect(&self) {
        *self.state.lock_ignore_poison() = None;
    }
}

/// SFTP status codes from the protocol.
const SFTP_NO_SUCH_FILE: i32 = 2;
const SFTP_PERMISSION_DENIED: i32 = 3;

fn is_transport_error(err: &ssh2::Error) -> bool {
    // SFTP status codes are application-level; everything else means the
    // session itself is unusable
    !matches!(err.code(), ssh2::ErrorCode::SFTP(_))
}

/// Maps an SFTP error to the crate taxonomy.
pub fn map_sftp_error(err: ssh2::Error, path: &str) -> VfsError {
    match err.code() {
        ssh2::ErrorCode::SFTP(SFTP_NO_SUCH_FILE) => VfsError::NotFound {
            path: path.to_string(),
        },
        ssh2::ErrorCode::SFTP(SFTP_PERMISSION_DENIED) => VfsError::PermissionDenied {
            path: path.to_string(),
            message: err.to_string(),
        },
        _ => VfsError::IoError {
            path: path.to_string(),
            message: err.to_string(),
        },
    }
}

static CONNECTIONS: LazyLock<Mutex<HashMap<String, Arc<SshConnection>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Returns the shared connection for a host, creating it lazily.
pub fn connection_for(host: &str) -> Arc<SshConnection> {
    let mut connections = CONNECTIONS.lock_ignore_poison();
    Arc::clone(
        connections
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(SshConnection::new(host))),
    )
}

/// Drops every cached session (they reconnect on next use).
pub fn disconnect_all() {
    let connections = CONNECTIONS.lock_ignore_poison();
    for connection in connections.values() {
        connection.disconnect();
    }
}
