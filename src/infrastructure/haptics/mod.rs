//! Haptics Module
//!
//! Drives an external haptic control endpoint from application events.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     HapticService                        │
//! │   (command worker - public API for the application)      │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!           ┌───────────┴────────────┐
//!           ▼                        ▼
//! ┌───────────────────┐    ┌───────────────────┐
//! │ VibrationPipeline │───▶│ConnectionController│
//! │ - intensity math  │    │ - state machine    │
//! │ - stop policy     │    │ - device registry  │
//! └───────────────────┘    └─────────┬─────────┘
//!                                    │ TransportAdapter
//!                       ┌────────────┴────────────┐
//!                       ▼                         ▼
//!               ┌──────────────┐        ┌──────────────────┐
//!               │  Simulator   │        │ ExternalTransport │
//!               │  (embedded)  │        │  (local socket)   │
//!               └──────────────┘        └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`transport`] - Adapter capability, events and factory
//! - [`simulator`] - In-process endpoint behind the `Embedded` connector
//! - [`protocol`] - Line-delimited JSON messages
//! - [`external`] - Local-socket client behind the `External` connector
//! - [`endpoint`] - Local-socket server exposing a simulator
//! - [`connection`] - Connection state machine and event relay
//! - [`pipeline`] - Vibration command pipeline
//! - [`service`] - Command worker

pub mod connection;
pub mod endpoint;
pub mod external;
pub mod pipeline;
pub mod protocol;
pub mod service;
pub mod simulator;
pub mod transport;

pub use connection::ConnectionController;
pub use pipeline::VibrationPipeline;
pub use service::HapticService;
pub use simulator::Simulator;
pub use transport::{DefaultTransportFactory, TransportAdapter, TransportFactory};
