//! Capability negotiation and a single offer/accept exchange between two
//! documents that do not trust each other.
//!
//! The client declares what it can accept or offer as a list of
//! [`ConnectorSpec`]s, opens a [`Request`] that drives a modal window to
//! the service page, and negotiates one (role, scheme) pair over
//! dedicated message ports. The service side is [`Service`]. Everything
//! environmental (windows, timers, name lookup) sits behind traits in
//! [`host`] and [`discovery`]; [`memory`] implements them in-process.
//!
//! All types are single-threaded (`Rc`, `RefCell`) and run on a local
//! executor.

#![allow(clippy::future_not_send)]

pub mod channel;
pub mod client;
pub mod connector;
pub mod current;
pub mod discovery;
pub mod envelope;
pub mod error;
pub mod exchange;
pub mod host;
pub mod matching;
pub mod memory;
pub mod request;
pub mod service;

pub use channel::{Message, Payload, Port, Transferable, channel};
pub use client::{Client, ClientConfig, ClientOverrides, Launcher};
pub use connector::{Consumer, ConnectorSpec, Producer, Role, validate_local, validate_peer};
pub use error::{DiscoveryError, ErrorKind, HandlerError, HostError, LinkError, ValidationError};
pub use exchange::{OfferPoster, ReceivedOffer, ResultPoster};
pub use host::{Environment, ModalHost, Timer};
pub use matching::{PeerDescriptor, match_connectors};
pub use request::{Exchange, Request, RequestState};
pub use service::{ClientWindow, Service, ServiceOutcome};
