use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tokio::net::UnixStream;
use tokio::time::timeout;

use crate::agent::{socket_path_for, InstallSpec};
use crate::proto::{read_frame, write_frame, Request, Response, Status};
use crate::{Error, Result};

/// Dashboard-side handle to one attach session. Strict request/response
/// alternation over a single channel; no pipelining, no auto-reconnect.
/// Callers surface a disconnect as a stop signal to their view.
#[derive(Debug)]
pub struct AttachClient {
    stream: UnixStream,
    socket_path: PathBuf,
}

impl AttachClient {
    /// Open the rendezvous channel for a target pid.
    pub async fn connect(pid: u32, connect_timeout: Duration) -> Result<Self> {
        let path = socket_path_for(pid);
        if !path.exists() {
            return Err(Error::TargetNotFound {
                target: format!("pid {pid}"),
                hint: if pid_alive(pid) {
                    " (process is running but has no attach server)"
                } else {
                    " (no such process)"
                },
            });
        }
        Self::connect_path(&path, connect_timeout).await
    }

    /// Explicit socket path; used by tests and by hosts with their own
    /// rendezvous layout.
    pub async fn connect_path(path: &Path, connect_timeout: Duration) -> Result<Self> {
        let stream = match timeout(connect_timeout, UnixStream::connect(path)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                // A socket file nobody listens on is a dead target.
                return Err(match e.kind() {
                    std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound => {
                        Error::TargetNotFound {
                            target: path.display().to_string(),
                            hint: " (rendezvous socket is stale)",
                        }
                    }
                    _ => Error::Io(e),
                });
            }
            Err(_) => return Err(Error::Timeout("connect")),
        };
        Ok(Self {
            stream,
            socket_path: path.to_path_buf(),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send one command and block for its single response.
    pub async fn call(&mut self, name: &str, data: Option<Value>) -> Result<Response> {
        let request = Request {
            name: name.to_string(),
            data,
        };
        write_frame(&mut self.stream, &request.encode()?)
            .await
            .map_err(io_as_disconnect)?;
        let frame = read_frame(&mut self.stream).await.map_err(|e| match e {
            Error::EndOfStream | Error::TruncatedFrame => Error::Disconnected,
            other => other,
        })?;
        Response::decode(&frame)
    }

    /// Health check: `test` must answer OK with an empty payload.
    pub async fn ping(&mut self) -> Result<()> {
        let response = self.call("test", None).await?;
        match response.status {
            Status::Ok => Ok(()),
            _ => Err(Error::CommandFailed("test".into())),
        }
    }

    /// Module search path of the target.
    pub async fn module_path(&mut self) -> Result<Vec<String>> {
        let response = self.call("path", None).await?;
        match (response.status, response.payload) {
            (Status::Ok, Some(payload)) => Ok(serde_json::from_value(payload)?),
            (Status::Ok, None) => Ok(Vec::new()),
            _ => Err(Error::CommandFailed("path".into())),
        }
    }

    /// Install an extension into the target. A `Failed` status means the
    /// extension is unusable; callers must not retry silently.
    pub async fn install_extension(&mut self, spec: InstallSpec) -> Result<()> {
        let id = spec.id.clone();
        let response = self
            .call("install", Some(serde_json::to_value(&spec)?))
            .await?;
        match response.status {
            Status::Ok => Ok(()),
            Status::Failed => Err(Error::ExtensionInstall {
                id,
                reason: "target rejected the install".into(),
            }),
            Status::NotFound => Err(Error::CommandNotFound("install".into())),
        }
    }

    /// Best-effort session end. The server does not respond to `bye`.
    pub async fn bye(mut self) {
        let request = Request::new("bye");
        if let Ok(bytes) = request.encode() {
            let _ = write_frame(&mut self.stream, &bytes).await;
        }
    }
}

fn io_as_disconnect(e: Error) -> Error {
    match e {
        Error::Io(io) if matches!(
            io.kind(),
            std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::NotConnected
        ) =>
        {
            Error::Disconnected
        }
        other => other,
    }
}

fn pid_alive(pid: u32) -> bool {
    // Signal 0 probes existence without delivering anything.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}
