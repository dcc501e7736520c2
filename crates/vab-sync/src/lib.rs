//! Background synchronization runtimes for the VoiceAttack bridge.
//!
//! Two independent poll loops mediate all traffic with the peer automation
//! tool through plain files: the update-queue runtime drains peer-appended
//! `key=value` commands into the per-process variable stores, and the
//! request runtime drains `Name?` queries and answers them over a local
//! fire-and-forget UDP datagram socket.

pub mod inbox;
pub mod pairs;
pub mod request_runtime;
pub mod transport;
pub mod update_queue_runtime;

pub use inbox::InboxFile;
pub use pairs::split_pairs;
pub use request_runtime::{
    load_request_snapshot, start_request_runtime, RequestConfig, RequestHandle, RequestSnapshot,
};
pub use transport::UdpNotifier;
pub use update_queue_runtime::{
    load_update_queue_snapshot, start_update_queue_runtime, StoreUpdatedCallback,
    UpdateQueueConfig, UpdateQueueHandle, UpdateQueueSnapshot,
};
