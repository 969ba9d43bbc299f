use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use periscope::agent::{AgentConfig, AttachServer, ProbeCatalog, SessionStats};
use periscope::config;
use periscope::dashboard::{PathView, Shell, View};
use periscope::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let settings = config::resolve();

    match args.get(1).map(|s| s.as_str()) {
        Some("attach") => {
            let Some(pid) = args.get(2).and_then(|s| s.parse::<u32>().ok()) else {
                eprintln!("Usage: periscope attach <pid>");
                std::process::exit(1);
            };
            // The dashboard owns the terminal; logs go to a file instead.
            init_file_logging()?;
            let views: Vec<Box<dyn View>> = vec![Box::new(PathView)];
            Shell::run(pid, views, &settings).await
        }
        Some("agent") => {
            tracing_subscriber::fmt()
                .with_env_filter(default_filter())
                .init();
            // Demo host: serve one attach session for this process. Real
            // targets embed agent::spawn with their own probe catalog.
            let server = AttachServer::for_pid(
                std::process::id(),
                Arc::new(ProbeCatalog::new()),
                Arc::new(SessionStats::new()),
                AgentConfig::from_settings(&settings),
            );
            server.serve().await
        }
        _ => {
            eprintln!("Usage: periscope <attach <pid>|agent>");
            std::process::exit(1);
        }
    }
}

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_file_logging() -> Result<()> {
    let dir = config::runtime_dir();
    std::fs::create_dir_all(&dir)?;
    let file = std::fs::File::create(dir.join("periscope.log"))?;
    tracing_subscriber::fmt()
        .with_env_filter(default_filter())
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(file))
        .init();
    Ok(())
}
