use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use fx_core::{spawn_rate_ticker, Runtime, RuntimeConfig};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    sync::mpsc,
    task::JoinSet,
};

pub mod config;
pub mod ipc;

pub fn run() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let data_dir = config::resolve_data_dir();
    let runtime_config = config::load_runtime_config(&data_dir)?;
    log::info!("using data dir {}", data_dir.display());

    let executor = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    executor.block_on(serve(runtime_config))
}

/// Serves invoke requests from stdin until it closes.
async fn serve(runtime_config: RuntimeConfig) -> Result<()> {
    let runtime = Arc::new(Runtime::from_config(runtime_config)?);

    let bootstrap = runtime.initialize().await;
    log::info!(
        "ready: {} currencies, {} history entries",
        bootstrap.currencies.all.len(),
        bootstrap.history.len()
    );

    let ticker = spawn_rate_ticker(
        runtime.clone(),
        Duration::from_secs(runtime.config().refresh_interval_secs),
    );
    let input = BufReader::new(tokio::io::stdin());
    let served = serve_lines(runtime.clone(), input, tokio::io::stdout()).await;
    ticker.stop();
    served.map(|_| ())
}

/// Runs every request line from `input` concurrently. Responses and events
/// share `output` through a single writer task. Returns `output` once every
/// request has finished and its events have been written.
pub async fn serve_lines<R, W>(runtime: Arc<Runtime>, input: R, output: W) -> Result<W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let events = tx.clone();
    runtime.set_event_callback(move |_event, payload| {
        let _ = events.send(ipc::event_line(payload));
    });

    let writer = tokio::spawn(async move {
        let mut output = output;
        while let Some(line) = rx.recv().await {
            output.write_all(line.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
        }
        Ok::<_, std::io::Error>(output)
    });

    let mut requests = JoinSet::new();
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("failed to read input")? {
        let runtime = runtime.clone();
        let tx = tx.clone();
        requests.spawn(async move {
            if let Some(response) = ipc::handle_line(&runtime, &line).await {
                let _ = tx.send(response);
            }
        });
        while requests.try_join_next().is_some() {}
    }

    log::info!("input closed, waiting for {} in-flight requests", requests.len());
    while requests.join_next().await.is_some() {}

    // the callback owns a sender; the writer drains once it and `tx` are gone
    runtime.clear_event_callback();
    drop(tx);
    let output = writer
        .await
        .context("output writer task failed")?
        .context("failed to write output")?;
    Ok(output)
}
