use anyhow::Result;
use costwise_mcp::{CostwiseService, InstanceLock, LockAcquisition};
use costwise_protocol::RouterConfig;
use rmcp::transport::stdio;
use rmcp::ServiceExt;

#[tokio::main]
async fn main() -> Result<()> {
    // Logging goes to stderr (or LOG_FILE when set); stdout carries the
    // MCP protocol.
    let mut logger = env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("LOG_LEVEL", "info")
            .write_style("LOG_STYLE"),
    );
    match std::env::var("LOG_FILE") {
        Ok(path) if !path.trim().is_empty() => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            logger.target(env_logger::Target::Pipe(Box::new(file)));
        }
        _ => {
            logger.target(env_logger::Target::Stderr);
        }
    }
    logger.init();

    let config = RouterConfig::from_env();

    // One router instance per state directory. Contention is a normal
    // shutdown, not an error.
    let _lock = match InstanceLock::acquire(&config.lock_path())? {
        LockAcquisition::Acquired(lock) => lock,
        LockAcquisition::HeldByOther { pid } => {
            log::info!("Another instance (pid {pid}) owns the lock; exiting");
            return Ok(());
        }
    };

    log::info!("Starting Costwise MCP server");

    let service = CostwiseService::new(config)?;
    let server = service.serve(stdio()).await?;
    server.waiting().await?;

    log::info!("Costwise MCP server stopped");
    Ok(())
}
