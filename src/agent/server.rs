use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::net::{UnixListener, UnixStream};
use tokio::time::timeout;

use crate::config::Settings;
use crate::proto::{read_frame, write_frame, Request, Response};
use crate::{Error, Result};

use super::registry::{ExtensionRegistry, InstallSpec, ProbeCatalog};
use super::session::SessionStats;

/// Rendezvous socket path for a target process, derived from its pid.
pub fn socket_path_for(pid: u32) -> PathBuf {
    std::env::temp_dir().join(format!(".periscope_{pid}"))
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub accept_timeout: Duration,
    pub idle_timeout: Duration,
    /// Module search path reported by the `path` command. The embedding
    /// host supplies it; the default comes from PERISCOPE_MODULE_PATH.
    pub module_path: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl AgentConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let module_path = std::env::var_os("PERISCOPE_MODULE_PATH")
            .map(|raw| {
                std::env::split_paths(&raw)
                    .map(|p| p.to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            accept_timeout: settings.accept_timeout(),
            idle_timeout: settings.idle_timeout(),
            module_path,
        }
    }
}

enum Flow {
    Continue,
    Bye,
}

/// One attach session inside the target: one rendezvous socket, at most one
/// peer, strict request/response alternation. Whatever ends the session,
/// cleanup always runs: extension unloaders, peer close, socket removal,
/// live-counter release. The serving task ends with the session and leaves
/// no background activity behind.
pub struct AttachServer {
    socket_path: PathBuf,
    catalog: Arc<ProbeCatalog>,
    stats: Arc<SessionStats>,
    config: AgentConfig,
    peer_accepted: bool,
}

impl AttachServer {
    pub fn for_pid(
        pid: u32,
        catalog: Arc<ProbeCatalog>,
        stats: Arc<SessionStats>,
        config: AgentConfig,
    ) -> Self {
        Self::at_path(socket_path_for(pid), catalog, stats, config)
    }

    /// Explicit socket path; used by tests and by hosts with their own
    /// rendezvous layout.
    pub fn at_path(
        socket_path: PathBuf,
        catalog: Arc<ProbeCatalog>,
        stats: Arc<SessionStats>,
        config: AgentConfig,
    ) -> Self {
        Self {
            socket_path,
            catalog,
            stats,
            config,
            peer_accepted: false,
        }
    }

    pub async fn serve(mut self) -> Result<()> {
        let listener = self.bind()?;
        tracing::info!(path = %self.socket_path.display(), "attach server listening");

        let mut registry = ExtensionRegistry::new(Arc::clone(&self.catalog));
        let result = self.run_session(listener, &mut registry).await;

        // Terminal cleanup, unconditional and ordered: unloaders first, the
        // peer is already closed (dropped in run_session), then the
        // rendezvous socket, then the live counter.
        registry.remove_all();
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            tracing::debug!(error = %e, "rendezvous socket already gone");
        }
        if self.peer_accepted {
            self.stats.peer_released();
        }
        match &result {
            Ok(()) => tracing::info!("attach session finished"),
            Err(e) => tracing::warn!(error = %e, "attach session ended with error"),
        }
        result
    }

    fn bind(&self) -> Result<UnixListener> {
        // A leftover socket from a crashed session is reclaimed by unlink;
        // if the file cannot be removed the attach attempt aborts here,
        // before any session exists.
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .map_err(|_| Error::AddressInUse(self.socket_path.clone()))?;
        }
        let listener = UnixListener::bind(&self.socket_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                Error::AddressInUse(self.socket_path.clone())
            } else {
                Error::Io(e)
            }
        })?;
        // Rendezvous access control is the socket file permission.
        std::fs::set_permissions(
            &self.socket_path,
            std::fs::Permissions::from_mode(0o600),
        )?;
        Ok(listener)
    }

    async fn run_session(
        &mut self,
        listener: UnixListener,
        registry: &mut ExtensionRegistry,
    ) -> Result<()> {
        let (mut stream, _) = match timeout(self.config.accept_timeout, listener.accept()).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(Error::Timeout("waiting for a peer")),
        };
        // Exactly one peer per session: dropping the listener makes any
        // later connection attempt fail at the transport level, before a
        // single command is read.
        drop(listener);
        self.peer_accepted = true;
        self.stats.peer_connected();
        tracing::info!(live = self.stats.live(), "peer connected");

        loop {
            let frame = match timeout(self.config.idle_timeout, read_frame(&mut stream)).await {
                Ok(Ok(frame)) => frame,
                Ok(Err(Error::EndOfStream)) => {
                    tracing::info!("peer disconnected");
                    return Ok(());
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(Error::Timeout("idle session")),
            };
            let request = Request::decode(&frame)?;
            tracing::debug!(command = %request.name, "dispatching");
            match self.dispatch(registry, request, &mut stream).await? {
                Flow::Continue => {}
                Flow::Bye => return Ok(()),
            }
        }
    }

    async fn dispatch(
        &self,
        registry: &mut ExtensionRegistry,
        request: Request,
        stream: &mut UnixStream,
    ) -> Result<Flow> {
        let response = match request.name.as_str() {
            "test" => Response::ok(),
            // No response required; the session terminates.
            "bye" => return Ok(Flow::Bye),
            "path" => Response::ok_with(json!(self.config.module_path)),
            "install" => match request.data {
                Some(data) => match serde_json::from_value::<InstallSpec>(data) {
                    Ok(spec) => match registry.install(spec) {
                        Ok(()) => Response::ok(),
                        Err(e) => {
                            tracing::warn!(error = %e, "extension install failed");
                            Response::failed()
                        }
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "unreadable install payload");
                        Response::failed()
                    }
                },
                None => {
                    tracing::warn!("install command without payload");
                    Response::failed()
                }
            },
            name => match registry.invoke(name, request.data.as_ref()) {
                Some(Ok(value)) => Response::ok_with(value),
                Some(Err(e)) => {
                    // A failing probe is reported to the peer; the server
                    // keeps serving subsequent commands.
                    tracing::warn!(extension = name, error = %e, "invoker failed");
                    Response::failed()
                }
                None => Response::not_found(),
            },
        };
        write_frame(stream, &response.encode()?).await?;
        Ok(Flow::Continue)
    }
}
