//! `vaultindex run` — stream vault events into the database until stopped.
//!
//! Resolves the resume block from persisted watermarks, subscribes, and keeps
//! going until SIGINT/SIGTERM or an unrecoverable error. Buffers are drained
//! on every exit path.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::{error, info};
use vaultindex_core::{EventBuffers, IngestMetrics, SelectorTable, WatermarkResolver};
use vaultindex_stream::{RunOutcome, ShutdownCoordinator, StreamConsumer, WsStreamClient};

use crate::RunArgs;

pub async fn run(args: RunArgs) -> Result<()> {
    let config = args.to_config();
    config.validate().context("invalid indexer configuration")?;

    let store = vaultindex_storage::open(&args.resume.database_url)
        .await
        .with_context(|| "opening the event store")?;

    let buffers = EventBuffers::shared(config.batch_size);
    let shutdown = ShutdownCoordinator::new(buffers.clone(), store.clone());
    let listener = shutdown.listen();

    let resume = WatermarkResolver::new(store.as_ref())
        .resolve(&config)
        .await
        .context("resolving the resume block")?;

    let mut client = WsStreamClient::new(config.stream_url.clone());
    if let Some(token) = &config.auth_token {
        client = client.with_auth_token(token.clone());
    }

    let metrics = Arc::new(IngestMetrics::from_global());
    let consumer = StreamConsumer::new(
        Arc::new(client),
        store,
        buffers,
        SelectorTable::vault(),
        &config,
    )
    .context("building the stream consumer")?
    .with_metrics(metrics.clone())
    .with_shutdown(shutdown.token());

    info!(
        vault = %config.vault_address,
        stream = %config.stream_url,
        start_block = resume.start_block,
        forced = resume.forced,
        batch_size = config.batch_size,
        "indexer starting"
    );

    let outcome = consumer.run(resume.start_block).await;

    // Whatever ended the run, stop the listener and flush what is buffered.
    shutdown.trigger();
    let drained = shutdown.drain().await;
    listener.abort();

    let snapshot = metrics.snapshot();
    info!(
        last_block = ?consumer.last_indexed_block(),
        blocks = snapshot.blocks_processed,
        inserted = snapshot.rows_inserted,
        duplicates = snapshot.duplicates_skipped,
        decode_failures = snapshot.decode_failures,
        unknown_events = snapshot.unknown_events,
        reconnections = snapshot.reconnections,
        "indexer stopped"
    );

    match (outcome, drained) {
        (Ok(RunOutcome::Shutdown { last_block }), Ok(_)) => {
            info!(?last_block, "shutdown complete");
            Ok(())
        }
        (Ok(_), Err(e)) => Err(anyhow!(e).context("final buffer flush")),
        (Err(e), drained) => {
            if let Err(flush) = drained {
                error!(error = %flush, "final buffer flush failed after run error");
            }
            Err(anyhow!(e).context("indexer run failed"))
        }
    }
}
