//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Value and channel bus shared by components and calculators."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Typed, timestamped values and the channel bus used for inter-component
//! data exchange. Channels hold only their latest value and notify listeners
//! synchronously, in registration order.
#![warn(missing_docs)]

pub mod bus;
pub mod channel;
pub mod collection;
pub mod value;

pub use bus::{ChannelBus, ChannelPattern};
pub use channel::{Channel, ListenerHandle, ListenerResult};
pub use collection::{ChannelCollection, CollectionError};
pub use ems_common::UnknownChannelError;
pub use value::{Payload, Value, ValueType};
