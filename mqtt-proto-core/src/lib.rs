//! `mqtt-proto-core`: the transport-independent MQTT client protocol engine. [`state::ProtocolState`]
//! is a pure transducer over `(elapsed time, user events, network events)` — it never reads or
//! writes a socket. Wire encoding/decoding lives in `mqtt-packet`; this crate schedules,
//! acknowledges, times out, and resubmits the packets that crate knows how to serialize.

#[macro_use]
extern crate log;

mod connect;
mod disconnect;
mod error;
mod flow_control;
mod fold;
mod keepalive;
mod operation;
mod policy;
mod publish;
mod queue;
mod state;
mod subscribe;
mod timeouts;
mod unsubscribe;

pub use crate::connect::{ConnectOptions, WillOptions};
pub use crate::disconnect::DisconnectOptions;
pub use crate::error::{EventError, OperationError, ProtocolFatalError};
pub use crate::flow_control::DEFAULT_RECEIVE_MAXIMUM;
pub use crate::fold::ElapsedMillis;
pub use crate::operation::{OnFailure, OnSuccess, OperationId, OperationKind, OperationOptions, OperationOutcome};
pub use crate::policy::{OfflineQueuePolicy, ResumeSessionPolicy};
pub use crate::publish::PublishOptions;
pub use crate::state::{NetworkEvent, ProtocolState, ProtocolStateConfig, ServiceOutcome, UserRequest};
pub use crate::subscribe::SubscribeOptions;
pub use crate::unsubscribe::UnsubscribeOptions;
