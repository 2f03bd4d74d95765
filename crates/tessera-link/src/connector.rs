//! Connectors: declared capabilities to accept or offer data kinds.
//!
//! Local lists are built from [`ConnectorSpec`]s and validated with
//! [`validate_local`]; lists received from a peer arrive as JSON and are
//! re-validated with [`validate_peer`] under the same rules, since the
//! peer is not trusted. Either way the output is a fresh list in the
//! declared order.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use serde_json::{Map, Value};

use crate::channel::Payload;
use crate::error::{HandlerError, ValidationError};
use crate::exchange::{OfferPoster, ReceivedOffer};

/// Which side of an exchange a connector takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Receives an offer and answers with a result.
    Accepting,
    /// Produces the offer.
    Offering,
}

impl Role {
    /// The role a matching peer connector must have.
    #[must_use]
    pub const fn complement(self) -> Self {
        match self {
            Self::Accepting => Self::Offering,
            Self::Offering => Self::Accepting,
        }
    }

    /// Wire key: `"accept"` or `"offer"`.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Accepting => "accept",
            Self::Offering => "offer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Callback form of a [`Producer`].
pub type ProduceFn = Box<dyn FnOnce(OfferPoster) -> LocalBoxFuture<'static, Result<(), HandlerError>>>;

/// Supplies the offer of an offering connector.
pub enum Producer {
    /// Posted as soon as the exchange starts.
    Value(Payload),
    /// Awaited, then posted.
    Deferred(LocalBoxFuture<'static, Result<Payload, HandlerError>>),
    /// Handed the capability to post the offer itself.
    Callback(ProduceFn),
}

impl Producer {
    /// A ready payload.
    #[must_use]
    pub const fn value(payload: Payload) -> Self {
        Self::Value(payload)
    }

    /// A payload computed asynchronously.
    pub fn deferred<Fut>(payload: Fut) -> Self
    where
        Fut: Future<Output = Result<Payload, HandlerError>> + 'static,
    {
        Self::Deferred(payload.boxed_local())
    }

    /// A callback that posts the offer through the given [`OfferPoster`].
    pub fn callback<F, Fut>(f: F) -> Self
    where
        F: FnOnce(OfferPoster) -> Fut + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + 'static,
    {
        Self::Callback(Box::new(move |poster| f(poster).boxed_local()))
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(payload) => f.debug_tuple("Value").field(payload).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Handles a received offer and posts the result.
pub struct Consumer(Box<dyn FnOnce(ReceivedOffer) -> LocalBoxFuture<'static, Result<(), HandlerError>>>);

impl Consumer {
    /// Wrap an async callback.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(ReceivedOffer) -> Fut + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + 'static,
    {
        Self(Box::new(move |offer| f(offer).boxed_local()))
    }

    pub(crate) fn call(self, offer: ReceivedOffer) -> LocalBoxFuture<'static, Result<(), HandlerError>> {
        (self.0)(offer)
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Consumer(..)")
    }
}

/// The application side of a connector.
#[derive(Debug)]
pub enum Handler {
    /// Supplies an offer.
    Produce(Producer),
    /// Receives an offer.
    Consume(Consumer),
}

/// An unvalidated connector declaration.
///
/// Setting both `accept` and `offer`, or neither, is representable on
/// purpose: [`validate_local`] reports it.
#[derive(Debug, Default)]
pub struct ConnectorSpec {
    /// Schemes this connector accepts.
    pub accept: Option<Vec<String>>,
    /// Schemes this connector offers.
    pub offer: Option<Vec<String>>,
    /// Opaque metadata forwarded to the peer.
    pub extra: Value,
    /// Producer or consumer.
    pub handler: Option<Handler>,
}

impl ConnectorSpec {
    /// Accept `schemes`.
    pub fn accept<S: Into<String>>(schemes: impl IntoIterator<Item = S>) -> Self {
        Self {
            accept: Some(schemes.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Offer `schemes`.
    pub fn offer<S: Into<String>>(schemes: impl IntoIterator<Item = S>) -> Self {
        Self {
            offer: Some(schemes.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = extra;
        self
    }

    /// Attach a producer.
    #[must_use]
    pub fn producing(mut self, producer: Producer) -> Self {
        self.handler = Some(Handler::Produce(producer));
        self
    }

    /// Attach a consumer.
    #[must_use]
    pub fn consuming(mut self, consumer: Consumer) -> Self {
        self.handler = Some(Handler::Consume(consumer));
        self
    }
}

/// What matching needs to know about a connector.
pub trait Declares {
    /// The connector's role.
    fn role(&self) -> Role;
    /// Declared schemes, in order.
    fn schemes(&self) -> &[String];
}

/// A validated local connector.
#[derive(Debug)]
pub struct Connector {
    /// Role.
    pub role: Role,
    /// Schemes, in declared order.
    pub schemes: Vec<String>,
    /// Opaque metadata.
    pub extra: Value,
    /// Producer (offering) or optional consumer (accepting). Taken when
    /// the connector is matched.
    pub handler: Option<Handler>,
}

impl Connector {
    /// Wire form: `{"accept": [..]}` or `{"offer": [..]}`, plus `extra`
    /// when set. Handlers never cross the wire.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        wire(self.role, &self.schemes, &self.extra)
    }
}

impl Declares for Connector {
    fn role(&self) -> Role {
        self.role
    }

    fn schemes(&self) -> &[String] {
        &self.schemes
    }
}

/// A validated connector declared by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConnector {
    /// Role.
    pub role: Role,
    /// Schemes, in declared order.
    pub schemes: Vec<String>,
    /// Opaque metadata.
    pub extra: Value,
}

impl PeerConnector {
    /// Wire form, as for [`Connector::to_wire`].
    #[must_use]
    pub fn to_wire(&self) -> Value {
        wire(self.role, &self.schemes, &self.extra)
    }
}

impl Declares for PeerConnector {
    fn role(&self) -> Role {
        self.role
    }

    fn schemes(&self) -> &[String] {
        &self.schemes
    }
}

/// Wire form of a whole list.
#[must_use]
pub fn list_to_wire(connectors: &[Connector]) -> Value {
    Value::Array(connectors.iter().map(Connector::to_wire).collect())
}

fn wire(role: Role, schemes: &[String], extra: &Value) -> Value {
    let mut object = Map::new();
    object.insert(
        role.key().to_owned(),
        Value::Array(schemes.iter().cloned().map(Value::String).collect()),
    );
    if !extra.is_null() {
        object.insert("extra".to_owned(), extra.clone());
    }
    Value::Object(object)
}

/// Tracks `(role, scheme)` pairs claimed so far within one list.
#[derive(Default)]
struct Claims(HashSet<(Role, String)>);

impl Claims {
    fn claim(&mut self, role: Role, schemes: &[String]) -> Result<(), ValidationError> {
        for scheme in schemes {
            if !self.0.insert((role, scheme.clone())) {
                return Err(ValidationError::DuplicateScheme {
                    scheme: scheme.clone(),
                    role: role.key(),
                });
            }
        }
        Ok(())
    }
}

/// Validate and normalize a local connector list.
///
/// Accepts anything iterable, so a single spec can be passed as
/// `[spec]` or `Some(spec)`.
///
/// # Errors
///
/// Returns the first [`ValidationError`] in list order.
pub fn validate_local(specs: impl IntoIterator<Item = ConnectorSpec>) -> Result<Vec<Connector>, ValidationError> {
    let mut claims = Claims::default();
    let mut out = Vec::new();
    for (index, spec) in specs.into_iter().enumerate() {
        let (role, schemes) = match (spec.accept, spec.offer) {
            (Some(_), Some(_)) => return Err(ValidationError::ConflictingRole { index }),
            (None, None) => return Err(ValidationError::MissingRole { index }),
            (Some(schemes), None) => (Role::Accepting, schemes),
            (None, Some(schemes)) => (Role::Offering, schemes),
        };
        if schemes.is_empty() {
            return Err(ValidationError::MalformedConnector {
                index,
                reason: "no schemes",
            });
        }
        claims.claim(role, &schemes)?;
        match (role, &spec.handler) {
            (Role::Offering, Some(Handler::Produce(_))) | (Role::Accepting, None | Some(Handler::Consume(_))) => {}
            (Role::Offering, _) => return Err(ValidationError::MissingProducer { index }),
            (Role::Accepting, Some(Handler::Produce(_))) => {
                return Err(ValidationError::InvalidConsumer { index });
            }
        }
        out.push(Connector {
            role,
            schemes,
            extra: spec.extra,
            handler: spec.handler,
        });
    }
    if out.is_empty() {
        return Err(ValidationError::NoConnectors);
    }
    Ok(out)
}

/// Validate a connector list received from the peer.
///
/// A single object is treated as a one-element list. Each entry must be
/// an object with exactly one of `accept`/`offer`, holding a scheme
/// string or a non-empty array of scheme strings.
///
/// # Errors
///
/// Returns the first [`ValidationError`] in list order.
pub fn validate_peer(value: &Value) -> Result<Vec<PeerConnector>, ValidationError> {
    let items: &[Value] = match value {
        Value::Array(items) => items,
        single => std::slice::from_ref(single),
    };
    if items.is_empty() {
        return Err(ValidationError::NoConnectors);
    }
    let mut claims = Claims::default();
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let object = item.as_object().ok_or(ValidationError::MalformedConnector {
                index,
                reason: "not an object",
            })?;
            let (role, raw) = match (object.get("accept"), object.get("offer")) {
                (Some(_), Some(_)) => return Err(ValidationError::ConflictingRole { index }),
                (None, None) => return Err(ValidationError::MissingRole { index }),
                (Some(raw), None) => (Role::Accepting, raw),
                (None, Some(raw)) => (Role::Offering, raw),
            };
            let schemes = peer_schemes(raw).ok_or(ValidationError::MalformedConnector {
                index,
                reason: "schemes must be a string or a non-empty array of strings",
            })?;
            claims.claim(role, &schemes)?;
            Ok(PeerConnector {
                role,
                schemes,
                extra: object.get("extra").cloned().unwrap_or(Value::Null),
            })
        })
        .collect()
}

fn peer_schemes(raw: &Value) -> Option<Vec<String>> {
    match raw {
        Value::String(scheme) => Some(vec![scheme.clone()]),
        Value::Array(items) if !items.is_empty() => items
            .iter()
            .map(|item| item.as_str().map(str::to_owned))
            .collect(),
        _ => None,
    }
}
