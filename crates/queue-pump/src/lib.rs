//! # Queue Pump
//!
//! Concurrent message and session pump for broker queue consumers.
//!
//! This library provides:
//! - Receive/dispatch/dispose worker loops with fixed parallelism
//! - Automatic lock renewal for peek-lock receives
//! - Session acceptance with per-session worker pools and drain detection
//! - A disposition facade (complete/abandon/defer/dead-letter) over the
//!   inner receiver
//! - An in-memory provider for testing and development
//!
//! The pump is transport-agnostic: it consumes the [`MessageReceiver`],
//! [`SessionReceiver`], and [`ReceiverFactory`] capabilities and drives the
//! registered [`MessageHandler`] or [`SessionHandler`] callbacks. Faults are
//! reported through the handler's exception sink tagged with the
//! [`ExceptionPhase`] in which they occurred.

pub mod error;
pub mod handler;
pub mod message;
pub mod providers;
pub mod pump;
pub mod receiver;

mod renewal;
mod sessions;

pub use error::{PumpError, ValidationError};
pub use handler::{
    CallbackError, ExceptionPhase, MessageHandler, MessageHandlerOptions, SessionHandler,
    SessionHandlerOptions,
};
pub use message::{EntityPath, LockToken, Message, MessageId, ReceivedMessage, SessionId, Timestamp};
pub use pump::MessageAndSessionPump;
pub use receiver::{MessageReceiver, PropertyMap, ReceiveMode, ReceiverFactory, SessionReceiver};
