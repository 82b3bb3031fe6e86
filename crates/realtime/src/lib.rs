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

mod cache;
pub use cache::CacheSnapshot;

mod error;
pub use error::{
    ProtocolError, RealtimeError, RefreshError, RefreshResult, SubscriberError, SubscriptionError,
    TransportError, TransportResult,
};

mod fanout;
pub use fanout::{SubscribeOptions, UpdateHandler};

pub mod global;

mod manager;
pub use manager::{BuilderError, RealtimeManager, RealtimeManagerBuilder, Subscription};

pub(crate) mod metrics;

mod mux;

pub(crate) mod rpc;

pub mod transport;

mod utils;

pub use explorer_realtime_types::{
    ConnectionState, ConnectionStatus, GasPrice, Header, KindSet, ManagerState, MempoolStats,
    ScheduledTransaction, Update, UpdateKind,
};
