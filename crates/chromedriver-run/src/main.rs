use std::time::Duration;

use anyhow::Context;
use chromedriver::{Config, Supervisor};

/// Printed as one JSON line on stdout once the server is up.
#[derive(Debug, serde::Serialize)]
struct ReadyLine<'a> {
    url: &'a str,
    port: u16,
    pid: Option<u32>,
    version: &'a str,
    binary: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load().context("load chromedriver config")?;
    let supervisor = Supervisor::from_config(&config).context("resolve chromedriver target")?;
    let mut server = supervisor.start().await.context("start chromedriver")?;

    let url = server.url();
    let target = supervisor.provisioner().target();
    let line = serde_json::to_string(&ReadyLine {
        url: &url,
        port: server.port(),
        pid: server.pid(),
        version: target.version(),
        binary: target.binary_path().display().to_string(),
    })?;
    println!("{line}");
    tracing::info!(%url, "chromedriver ready; press Ctrl-C to stop");

    let mut tick = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("wait for Ctrl-C")?;
                break;
            }
            _ = tick.tick() => {
                if let Some(status) = server.try_status().context("poll chromedriver")? {
                    anyhow::bail!("chromedriver exited unexpectedly ({status})");
                }
            }
        }
    }

    tracing::info!("stopping chromedriver");
    server.stop().await.context("stop chromedriver")?;
    Ok(())
}
