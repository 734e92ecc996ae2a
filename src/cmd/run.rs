//! Pipeline execution: `pulsewatch run`.

use anyhow::Result;
use pulsewatch::config::PulsewatchToml;
use pulsewatch::logging;
use pulsewatch::pipeline::{Pipeline, Remotes};
use pulsewatch::web::WebServer;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::super::Cli;

pub async fn cmd_run(
    cli: &Cli,
    bind: Option<String>,
    port: Option<u16>,
    no_web: bool,
) -> Result<()> {
    let mut config = PulsewatchToml::load_or_default(&cli.config)?;
    config.apply_env()?;
    if let Some(bind) = bind {
        config.web.bind = bind;
    }
    if let Some(port) = port {
        config.web.port = port;
    }

    let _guard = logging::init(&config.logging, cli.verbose)?;
    info!(config = %cli.config.display(), "Starting pulsewatch");
    for warning in config.validate() {
        warn!("{}", warning);
    }

    let remotes = Remotes::connect(&config).await?;
    let pipeline = Pipeline::new(&config, remotes)?;
    let web = if no_web {
        None
    } else {
        Some(WebServer::bind(&config.web.bind, config.web.port).await?)
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received interrupt, shutting down"),
            Err(e) => error!(error = %e, "Failed to listen for interrupt, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    let remaining = pipeline.run(web, shutdown_rx).await?;
    for record in remaining.iter() {
        warn!(
            group_id = %record.group_id,
            hook_id = %record.hook_id,
            task_id = %record.task_id,
            status = %record.status,
            "Task still unresolved at shutdown"
        );
    }

    Ok(())
}
