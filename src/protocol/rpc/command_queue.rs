//! Ordered command processing for one connection.
//!
//! Requests read off a connection are queued and processed by a single
//! worker task, so replies for that connection are produced in arrival
//! order while other connections proceed in parallel.

use anyhow::anyhow;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::protocol::rpc;

/// Reply buffer reused across requests of a connection.
pub struct ResponseBuffer {
    buffer: Vec<u8>,
    has_content: bool,
}

impl ResponseBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buffer: Vec::with_capacity(capacity), has_content: false }
    }

    pub fn get_mut_buffer(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }

    pub fn mark_has_content(&mut self) {
        self.has_content = true;
    }

    pub fn has_content(&self) -> bool {
        self.has_content
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.has_content = false;
    }
}

struct RpcCommand {
    data: Vec<u8>,
    context: rpc::Context,
}

/// Outcome of one command: a reply buffer, nothing (retransmission), or a
/// connection-fatal error.
pub type CommandResult = Result<Option<ResponseBuffer>, anyhow::Error>;

/// Processor invoked per command; returns whether a reply must be sent.
pub type AsyncCommandProcessor = for<'a> fn(
    data: &[u8],
    output: &'a mut ResponseBuffer,
    context: rpc::Context,
) -> futures::future::BoxFuture<'a, anyhow::Result<bool>>;

/// FIFO queue in front of the per-connection worker task.
#[derive(Clone)]
pub struct CommandQueue {
    command_sender: mpsc::UnboundedSender<RpcCommand>,
}

impl CommandQueue {
    /// Starts the worker. Results are pushed to `result_sender` in the
    /// order their commands were submitted.
    pub fn new(
        processor: AsyncCommandProcessor,
        result_sender: mpsc::UnboundedSender<CommandResult>,
        buffer_capacity: usize,
    ) -> Self {
        let (command_sender, mut command_receiver) = mpsc::unbounded_channel::<RpcCommand>();

        tokio::spawn(async move {
            let mut output_buffer = ResponseBuffer::with_capacity(buffer_capacity);
            while let Some(command) = command_receiver.recv().await {
                trace!("processing queued command");
                output_buffer.clear();
                let result =
                    match processor(&command.data, &mut output_buffer, command.context).await {
                        Ok(true) => {
                            output_buffer.mark_has_content();
                            let full = std::mem::replace(
                                &mut output_buffer,
                                ResponseBuffer::with_capacity(buffer_capacity),
                            );
                            Ok(Some(full))
                        }
                        Ok(false) => Ok(None),
                        Err(e) => Err(e),
                    };
                if let Err(e) = result_sender.send(result) {
                    error!("failed to forward command result: {:?}", e);
                    break;
                }
            }
            debug!("command queue worker finished");
        });

        Self { command_sender }
    }

    /// Enqueues one complete RPC record for processing.
    pub fn submit(&self, data: Vec<u8>, context: rpc::Context) -> Result<(), anyhow::Error> {
        self.command_sender
            .send(RpcCommand { data, context })
            .map_err(|e| anyhow!("command queue closed: {e}"))
    }
}
