//! Core of the meshgate commissioning gateway.
//!
//! This crate turns authenticated serial commands into calls on a mesh
//! stack: starting and stopping the commissioner, admitting joiners,
//! forming networks and resetting the device. It also reacts to the stack's
//! own notifications, starting the commissioner when the device becomes
//! leader.
//!
//! ## Architecture
//!
//! Two threads touch the stack: the [`SerialWorker`], which frames and
//! dispatches one line at a time, and the stack's notification thread,
//! which drives the [`EventBridge`] and the commissioner callbacks. Every
//! stack call goes through [`SharedStack::acquire`], a bounded wait that
//! yields a scoped guard.
//!
//! ## Key Types
//!
//! - [`MeshStack`]: calls into the mesh stack
//! - [`Platform`] and [`PersistentStore`]: device services
//! - [`Dispatcher`]: routes lines to the components below
//! - [`CommissionerController`], [`JoinerAdmission`], [`NetworkFormer`]
//! - [`Gateway`]: wires everything from a [`GatewayConfig`]
//! - [`SimStack`]: an in-memory stack for hosts and tests

mod bridge;
mod commissioner;
mod config;
mod dispatcher;
mod error;
mod gateway;
mod joiner;
mod lock;
mod network;
mod platform;
mod sim;
mod sink;
mod stack;
mod watchdog;
mod worker;

pub use bridge::EventBridge;
pub use commissioner::{joiner_record, state_record, CommissionerController, CommissionerEvents, StartOutcome};
pub use config::{
    ConfigError, GatewayConfig, HmacKey, LockConfig, LockTimeouts, SerialConfig, TransportConfig, DEFAULT_CHANNEL,
    DEFAULT_HMAC_KEY,
};
pub use dispatcher::{Dispatch, Dispatcher};
pub use error::{BusyError, FatalInitError, GatewayError, Result, StackError, StackErrorCode};
pub use gateway::Gateway;
pub use joiner::JoinerAdmission;
pub use lock::{SharedStack, StackGuard, WeakStack};
pub use network::{generate_dataset, NetworkFormer};
pub use platform::{
    init_store, shared_store, HostPlatform, MemoryStore, PersistentStore, Platform, RestartSignal, SharedStore,
    StoreError,
};
pub use sim::{is_valid_pskd, SimStack, StackCall};
pub use sink::{MemorySink, ResponseSink};
pub use stack::{
    truncate_network_name, CommissionerHandler, CommissionerState, DeviceRole, JoinerEvent, MeshStack,
    NetworkDataset, StackEvent, StackEventHandler, MAX_NETWORK_NAME_LEN,
};
pub use watchdog::{CurrentCommandInfo, Watchdog, WatchdogState};
pub use worker::{channel_port, verb_label, ChannelPort, SerialPort, SerialWorker, WorkerExit, WorkerSettings};
