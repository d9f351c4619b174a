//! valwatch-rpc — node access for valwatch.
//!
//! - [`CosmosHttpClient`]: LCD + Tendermint RPC queries with retry, implementing
//!   [`valwatch_core::ChainClient`]
//! - [`StreamSupervisor`]: `NewBlock` WebSocket subscription with
//!   primary/backup failover, reconnect backoff and a liveness watchdog
//! - [`decode`]: payload decoders for both legacy and newer node formats

pub mod backoff;
pub mod decode;
pub mod error;
pub mod http;
pub mod stream;

pub use backoff::{Backoff, RetryConfig};
pub use error::TransportError;
pub use http::{CosmosHttpClient, HttpClientConfig};
pub use stream::{Endpoints, LatestHeight, StreamConfig, StreamSupervisor, Watchdog};
