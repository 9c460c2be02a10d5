//! ONC-RPC version 2 runtime: record-marked framing, per-connection ordered
//! command processing, retransmission tracking and program dispatch.

mod command_queue;
mod context;
mod transaction_tracker;
mod wire;

pub use command_queue::{CommandQueue, CommandResult, ResponseBuffer};
pub use context::Context;
pub use transaction_tracker::TransactionTracker;
pub use wire::{
    handle_rpc, process_rpc_command, read_fragment, write_fragment, MAX_RPC_RECORD_LENGTH,
};
