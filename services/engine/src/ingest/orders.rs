//! Order ingest loop
//!
//! Consumes inbound command messages, runs the command processor under one
//! state lock scope, publishes the correlated response, and acknowledges.
//! Every step is wrapped so one message's failure cannot halt consumption
//! of the next.

use crate::clock::now_millis;
use crate::config::EngineConfig;
use crate::messages::{
    Command, CommandEnvelope, CommandResult, LifecycleEvent, OrderResponse,
};
use crate::processor;
use crate::state::SharedState;
use crate::stream::{DurableStream, StreamMessage};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use types::ids::OwnerId;

/// The command consumption loop.
pub struct OrderIngest<S: DurableStream> {
    stream: Arc<S>,
    state: SharedState,
    config: Arc<EngineConfig>,
}

impl<S: DurableStream> OrderIngest<S> {
    pub fn new(stream: Arc<S>, state: SharedState, config: Arc<EngineConfig>) -> Self {
        Self {
            stream,
            state,
            config,
        }
    }

    /// Run until shutdown is signalled. The in-flight message is always
    /// answered and acknowledged before the loop exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            match self
                .stream
                .ensure_group(&self.config.command_stream, &self.config.order_group)
                .await
            {
                Ok(()) => break,
                Err(err) => {
                    warn!(error = %err, "order group setup failed, retrying");
                    tokio::time::sleep(self.config.retry_backoff).await;
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
        info!(stream = %self.config.command_stream, "listening for orders");

        loop {
            let read = self.stream.read_group(
                &self.config.command_stream,
                &self.config.order_group,
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
                        error!(error = %err, "command stream read failed, backing off");
                        tokio::time::sleep(self.config.retry_backoff).await;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }
        info!("order ingest stopped");
    }

    /// Process one command message: parse, execute, respond, ack.
    async fn handle_message(&self, message: StreamMessage) {
        let now = now_millis();

        let (order_id, result, events) = match CommandEnvelope::from_fields(&message.fields) {
            Ok(envelope) => {
                info!(
                    order_id = %envelope.order_id,
                    command = %envelope.command,
                    owner = %envelope.owner,
                    "processing order"
                );
                let (result, events) = self.process(&envelope, now);
                (envelope.order_id, result, events)
            }
            Err(err) => {
                // No parseable envelope. Answer if the message at least
                // carried an order id; otherwise it can only be dropped.
                warn!(message_id = %message.id, error = %err, "malformed command envelope");
                let Some(order_id) = message.fields.get("orderId").cloned() else {
                    self.ack(&message.id).await;
                    return;
                };
                (order_id, CommandResult::error(&err), Vec::new())
            }
        };

        let response = OrderResponse::new(order_id, result, now);
        if let Err(err) = self
            .stream
            .publish(&self.config.response_stream, response.to_fields())
            .await
        {
            error!(order_id = %response.order_id, error = %err, "failed to publish response");
        }

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

        self.ack(&message.id).await;
    }

    /// Parse the payload and execute it under one state lock scope.
    fn process(&self, envelope: &CommandEnvelope, now: i64) -> (CommandResult, Vec<LifecycleEvent>) {
        let command = match Command::parse(&envelope.command, envelope.trade_data.as_deref()) {
            Ok(command) => command,
            Err(err) => return (CommandResult::error(&err), Vec::new()),
        };
        let owner = OwnerId::new(envelope.owner.clone());
        let mut state = self.state.lock().expect("engine state lock poisoned");
        processor::execute(&mut state, &self.config, &owner, &command, now)
    }

    async fn ack(&self, message_id: &str) {
        if let Err(err) = self
            .stream
            .ack(&self.config.command_stream, &self.config.order_group, message_id)
            .await
        {
            warn!(message_id = %message_id, error = %err, "failed to ack command message");
        }
    }
}
