//! Price ingest loop
//!
//! Consumes price-tick batches, refreshes the price cache, runs trigger
//! detection for each updated asset, applies the close side effects for
//! every fired trigger, and publishes one lifecycle event per closed
//! position. Malformed ticks are dropped (and acknowledged) without
//! crashing the loop.

use crate::clock::now_millis;
use crate::config::EngineConfig;
use crate::messages::{LifecycleEvent, PriceBatch};
use crate::processor::{self, CloseReason};
use crate::state::SharedState;
use crate::stream::{DurableStream, StreamMessage};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use types::ids::AssetId;
use types::numeric::ScaledAmount;

/// The price-feed consumption loop.
pub struct PriceIngest<S: DurableStream> {
    stream: Arc<S>,
    state: SharedState,
    config: Arc<EngineConfig>,
}

impl<S: DurableStream> PriceIngest<S> {
    pub fn new(stream: Arc<S>, state: SharedState, config: Arc<EngineConfig>) -> Self {
        Self {
            stream,
            state,
            config,
        }
    }

    /// Run until shutdown is signalled. The current batch is always
    /// finished (including acknowledgements) before the loop exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            match self
                .stream
                .ensure_group(&self.config.price_stream, &self.config.price_group)
                .await
            {
                Ok(()) => break,
                Err(err) => {
                    warn!(error = %err, "price group setup failed, retrying");
                    tokio::time::sleep(self.config.retry_backoff).await;
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
        info!(stream = %self.config.price_stream, "listening for price updates");

        loop {
            let read = self.stream.read_group(
                &self.config.price_stream,
                &self.config.price_group,
                &self.config.consumer_name,
                self.config.read_count,
                self.config.read_block,
            );
            tokio::select! {
                _ = shutdown.changed() => break,
                result = read => match result {
                    Ok(batch) => {
                        for message in batch {
                            self.handle_message(message).await;
                        }
                    }
                    Err(err) => {
                        error!(error = %err, "price stream read failed, backing off");
                        tokio::time::sleep(self.config.retry_backoff).await;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }
        info!("price ingest stopped");
    }

    /// Process one stream entry: parse, apply, publish events, ack.
    async fn handle_message(&self, message: StreamMessage) {
        let events = match PriceBatch::from_fields(&message.fields) {
            Ok(batch) => self.apply_batch(&batch),
            Err(err) => {
                // Malformed tick: drop it, keep the loop alive.
                warn!(message_id = %message.id, error = %err, "dropping malformed price message");
                Vec::new()
            }
        };

        for event in &events {
            if let Err(err) = self
                .stream
                .publish(&self.config.event_stream, event.to_fields())
                .await
            {
                error!(
                    position_id = %event.position_id,
                    error = %err,
                    "failed to publish lifecycle event"
                );
            }
        }

        if let Err(err) = self
            .stream
            .ack(
                &self.config.price_stream,
                &self.config.price_group,
                &message.id,
            )
            .await
        {
            warn!(message_id = %message.id, error = %err, "failed to ack price message");
        }
    }

    /// Apply one tick batch inside a single state lock scope.
    ///
    /// Returns the lifecycle events of every triggered closure. The lock is
    /// released before any publishing happens.
    fn apply_batch(&self, batch: &PriceBatch) -> Vec<LifecycleEvent> {
        let now = now_millis();
        let mut events = Vec::new();
        let mut state = self.state.lock().expect("engine state lock poisoned");

        for update in &batch.updates {
            if update.price <= 0 {
                warn!(asset = %update.asset, price = update.price, "skipping non-positive price");
                continue;
            }
            let asset = AssetId::new(update.asset.clone());
            let price = ScaledAmount::new(update.price as i128, update.decimals);
            state.prices.set(asset.clone(), price);

            let hits = state.triggers.detect(&asset, price);
            if hits.is_empty() {
                continue;
            }
            debug!(asset = %asset, crossed = hits.len(), "trigger levels crossed");

            for hit in hits {
                // A position crossed through more than one level in this
                // tick is already closed by the first hit; skip the rest.
                if state.book.get_open(&hit.position_id).is_none() {
                    continue;
                }
                match processor::close_position(
                    &mut state,
                    hit.position_id,
                    price,
                    CloseReason::Trigger(hit.kind),
                    now,
                ) {
                    Ok(outcome) => {
                        info!(
                            position_id = %outcome.position.id,
                            owner = %outcome.position.owner,
                            trigger = hit.kind.as_str(),
                            pnl = %outcome.pnl,
                            "position force-closed"
                        );
                        events.push(outcome.event);
                    }
                    Err(err) => {
                        error!(
                            position_id = %hit.position_id,
                            error = %err,
                            "trigger close failed"
                        );
                    }
                }
            }
        }
        events
    }
}
