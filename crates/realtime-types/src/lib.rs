#![doc = include_str!("../README.md")]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    clippy::missing_const_for_fn,
    rustdoc::all
)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod kind;
pub use kind::{KindSet, UpdateKind};

mod status;
pub use status::{ConnectionState, ConnectionStatus, ManagerState};

mod update;
pub use update::{GasPrice, MempoolStats, ScheduledTransaction, Update};

/// Re-export of the RPC block header carried by [`Update::NewBlock`].
pub use alloy::rpc::types::Header;
