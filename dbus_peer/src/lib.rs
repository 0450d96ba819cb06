//! A peer-to-peer and bus-aware D-Bus runtime: address resolution, the wire codec, a connection
//! worker/façade pair, signal subscriptions, object/subtree dispatch, and the handful of standard
//! interfaces every peer is expected to answer for itself.
//!
//! The authentication exchange ([`auth`]) only implements the `EXTERNAL` SASL mechanism; anything
//! richer is out of scope here and left to a higher layer that wants to negotiate other mechanisms
//! before handing the authenticated stream to [`connection::Connection::connect`].

pub mod address;
pub mod auth;
#[cfg(feature = "async-io")]
pub mod bus;
pub mod connection;
mod error;
pub mod fdo;
mod guid;
pub mod message;
pub mod object_server;
mod rt;
#[cfg(feature = "async-io")]
pub mod server;

pub use connection::{Connection, Filter, WeakConnection};
pub use error::{Error, Result};
pub use guid::Guid;
pub use message::{Flags, Message, MessageType};
#[cfg(feature = "async-io")]
pub use server::Server;
