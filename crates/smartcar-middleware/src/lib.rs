//! `smartcar-middleware` – Outbound notification routing
//!
//! Carries `{command}` / `{response}` notifications from the voice and text
//! paths to whatever transport is attached, without caring how they are
//! delivered.
//!
//! # Modules
//!
//! - [`bus`] – [`NotificationBus`]: a cloneable publish/subscribe channel
//!   built on Tokio broadcast.

pub mod bus;

pub use bus::{NotificationBus, NotificationSubscriber, to_wire};
