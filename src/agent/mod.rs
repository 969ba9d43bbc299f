mod registry;
mod server;
mod session;

pub use registry::{
    ExtensionRegistry, HookFn, HookSpec, InstallSpec, Namespace, ProbeCatalog,
};
pub use server::{socket_path_for, AgentConfig, AttachServer};
pub use session::SessionStats;

use std::sync::Arc;

use crate::Result;

/// Embedding entry point: start one attach session for this process on a
/// background task. The task ends when the session terminates.
pub fn spawn(
    pid: u32,
    catalog: Arc<ProbeCatalog>,
    stats: Arc<SessionStats>,
    config: AgentConfig,
) -> tokio::task::JoinHandle<Result<()>> {
    let server = AttachServer::for_pid(pid, catalog, stats, config);
    tokio::spawn(server.serve())
}
