//! Device broker
//!
//! An out-of-process broker that arbitrates shared access to capture and
//! playback devices among many client processes. Clients open a session,
//! query and configure devices, start and stop streams (each stream endpoint
//! has at most one owner), and receive change notifications. When a client
//! disconnects or dies, everything its session held is released.
//!
//! # Layout
//!
//! - [`device`]: device data model and the [`DeviceBackend`] trait device
//!   families implement, plus an in-memory [`SampleDevice`]
//! - [`registry`]: devices keyed by GUID, with permanent GUID retirement
//! - [`session`]: client handles, sessions and the stream ownership table
//! - [`notify`]: subscriptions and bounded drop-oldest delivery queues
//! - [`broker`]: the [`Broker`] tying the above together
//! - [`protocol`], [`server`], [`client`]: the TCP transport
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use device_broker::{Broker, BrokerServer, SampleDevice, Guid, Scope, ServerConfig};
//!
//! let broker = Arc::new(Broker::new());
//! broker
//!     .add_device(Arc::new(SampleDevice::new(Guid(42), "Camera").with_stream(Scope::Input, 0)))
//!     .await?;
//!
//! let server = BrokerServer::new(ServerConfig::default(), broker);
//! server.run_until(async { tokio::signal::ctrl_c().await.ok(); }).await?;
//! ```

pub mod broker;
pub mod client;
pub mod device;
pub mod error;
pub mod notify;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;

pub use broker::{Broker, BrokerConfig};
pub use client::{BrokerClient, ClientError};
pub use device::{
    DeckCommand, DeviceBackend, DeviceState, DeviceStatus, Element, Guid, PropertyAddress,
    SampleDevice, Scope, Selector,
};
pub use error::{BrokerError, ErrorKind, Result};
pub use notify::{delivery_channel, EventKind, Notification, NotificationReceiver};
pub use server::{BrokerServer, ServerConfig};
pub use session::{ClientHandle, StreamSpecifier};
pub use stats::{BrokerStats, SessionStats};
