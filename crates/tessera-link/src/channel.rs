//! In-process message ports.
//!
//! [`channel`] returns two entangled [`Port`]s: whatever is posted on
//! one arrives in the other's inbox. Ports are cheap handles and can be
//! sent inside messages as [`Transferable::Port`], which is how dedicated
//! channels are handed to a peer.

use std::cell::RefCell;
use std::rc::Rc;

use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use serde_json::Value;

/// Stream of messages arriving at a port.
pub type Inbox = UnboundedReceiver<Message>;

/// A value that travels alongside a message's data.
#[derive(Debug, Clone)]
pub enum Transferable {
    /// A port end handed over to the receiver.
    Port(Port),
    /// An opaque byte buffer.
    Bytes(Rc<[u8]>),
}

/// A message posted on a port.
#[derive(Debug, Clone)]
pub struct Message {
    /// Structured data.
    pub data: Value,
    /// Handles moved with the message.
    pub transfer: Vec<Transferable>,
}

impl Message {
    /// A message without transferables.
    #[must_use]
    pub const fn new(data: Value) -> Self {
        Self {
            data,
            transfer: Vec::new(),
        }
    }

    /// A message carrying `transfer`.
    #[must_use]
    pub const fn with_transfer(data: Value, transfer: Vec<Transferable>) -> Self {
        Self { data, transfer }
    }

    /// The transferred ports, in order.
    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.transfer.iter().filter_map(|t| match t {
            Transferable::Port(port) => Some(port),
            Transferable::Bytes(_) => None,
        })
    }

    /// Consume the message, returning its only transferred port.
    ///
    /// Returns `None` when it carries no port or more than one.
    #[must_use]
    pub fn into_single_port(self) -> Option<Port> {
        let mut ports = self.transfer.into_iter().filter_map(|t| match t {
            Transferable::Port(port) => Some(port),
            Transferable::Bytes(_) => None,
        });
        let port = ports.next()?;
        ports.next().is_none().then_some(port)
    }
}

/// Application data exchanged as an offer or a result.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    /// Structured data.
    pub data: Value,
    /// Handles moved with the data.
    pub transfer: Vec<Transferable>,
}

impl Payload {
    /// A payload with data only.
    #[must_use]
    pub const fn data(data: Value) -> Self {
        Self {
            data,
            transfer: Vec::new(),
        }
    }

    /// The empty payload (`null`, nothing transferred).
    #[must_use]
    pub const fn empty() -> Self {
        Self::data(Value::Null)
    }

    /// Attach a byte buffer.
    #[must_use]
    pub fn with_bytes(mut self, bytes: impl Into<Rc<[u8]>>) -> Self {
        self.transfer.push(Transferable::Bytes(bytes.into()));
        self
    }

    /// Transferred byte buffers, in order.
    pub fn bytes(&self) -> impl Iterator<Item = &[u8]> {
        self.transfer.iter().filter_map(|t| match t {
            Transferable::Bytes(bytes) => Some(&**bytes),
            Transferable::Port(_) => None,
        })
    }
}

/// One end of a message channel.
#[derive(Debug, Clone)]
pub struct Port {
    outgoing: UnboundedSender<Message>,
    incoming: Rc<RefCell<Option<Inbox>>>,
}

/// Create a pair of entangled ports.
#[must_use]
pub fn channel() -> (Port, Port) {
    let (a_tx, a_rx) = unbounded();
    let (b_tx, b_rx) = unbounded();
    (
        Port {
            outgoing: b_tx,
            incoming: Rc::new(RefCell::new(Some(a_rx))),
        },
        Port {
            outgoing: a_tx,
            incoming: Rc::new(RefCell::new(Some(b_rx))),
        },
    )
}

impl Port {
    /// Post a message to the other end. Posting after either end closed
    /// is a silent no-op.
    pub fn post(&self, message: Message) {
        if self.outgoing.unbounded_send(message).is_err() {
            tracing::trace!("post on closed port dropped");
        }
    }

    /// Take this port's inbox. Only the first caller gets it.
    #[must_use]
    pub fn take_inbox(&self) -> Option<Inbox> {
        self.incoming.borrow_mut().take()
    }

    /// Close the channel in both directions: the other end's inbox ends
    /// after draining what was already posted.
    pub fn close(&self) {
        self.outgoing.close_channel();
        if let Some(inbox) = self.incoming.borrow_mut().as_mut() {
            inbox.close();
        }
    }

    /// Whether the other end can no longer receive.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.outgoing.is_closed()
    }
}

/// Closes a port when dropped.
#[derive(Debug)]
pub(crate) struct PortGuard(pub Port);

impl Drop for PortGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}
