//! Error types for validation, negotiation and exchange.

/// A connector list failed validation.
///
/// Raised synchronously by the validating operation, for local and peer
/// lists alike.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The list was empty.
    #[error("connector list is empty")]
    NoConnectors,

    /// An entry was not an object, or its schemes were not strings.
    #[error("connector {index} is malformed: {reason}")]
    MalformedConnector {
        /// Position in the list.
        index: usize,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// An entry declared both `accept` and `offer`.
    #[error("connector {index} declares both accept and offer")]
    ConflictingRole {
        /// Position in the list.
        index: usize,
    },

    /// An entry declared neither `accept` nor `offer`.
    #[error("connector {index} declares neither accept nor offer")]
    MissingRole {
        /// Position in the list.
        index: usize,
    },

    /// A scheme was already declared under the same role.
    #[error("scheme {scheme:?} is declared more than once as {role}")]
    DuplicateScheme {
        /// The repeated scheme.
        scheme: String,
        /// `"accept"` or `"offer"`.
        role: &'static str,
    },

    /// An offering connector has no payload producer.
    #[error("offering connector {index} has no producer")]
    MissingProducer {
        /// Position in the list.
        index: usize,
    },

    /// An accepting connector carries a handler that is not a consumer.
    #[error("accepting connector {index} has a handler that is not a consumer")]
    InvalidConsumer {
        /// Position in the list.
        index: usize,
    },
}

/// The modal host could not provide a window.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// Opening the window was refused (e.g. a popup blocker).
    #[error("modal window was blocked")]
    Blocked,

    /// The host is missing or failed.
    #[error("modal host unavailable: {0}")]
    Unavailable(String),
}

/// Name discovery failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    /// The identifier was empty after normalization.
    #[error("no identifier given")]
    NoIdentifier,

    /// The domain publishes no usable service link.
    #[error("no service found")]
    NotFound,

    /// The lookup itself failed (transport error, non-200 status).
    #[error("lookup failed: {0}")]
    LookupError(String),

    /// The published document could not be parsed.
    #[error("malformed host metadata: {0}")]
    Malformed(String),
}

/// An application producer or consumer reported failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("handler failed: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    /// Wrap any displayable error.
    pub fn new(message: impl std::fmt::Display) -> Self {
        Self(message.to_string())
    }
}

/// Taxonomy of [`LinkError`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed declarations or misuse by the caller; nothing was sent.
    Validation,
    /// The peer broke the protocol; the request was closed.
    ProtocolViolation,
    /// The environment (host, discovery, handlers) failed; the request
    /// was closed.
    Environment,
    /// The session ended before anything was received.
    PrematureClosure,
}

/// Errors surfaced by a request, a service, or an exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// A connector list failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No (local, peer, scheme) triple matched.
    #[error("no matching connector")]
    NoMatchingConnector,

    /// `connect` was called when the request was not open.
    #[error("request is not connectable")]
    ConnectWhenNotConnectable,

    /// The request was already closed.
    #[error("request is closed")]
    RequestClosed,

    /// Neither a service URL nor a launcher is configured.
    #[error("no service url or launcher configured")]
    NoServiceConfigured,

    /// The match channel carried an unknown or malformed envelope.
    #[error("invalid message on the match channel")]
    InvalidMatchMessage,

    /// A `connect` envelope did not carry exactly one port.
    #[error("connect message must transfer exactly one port")]
    InvalidConnectMessage,

    /// A second `connect` arrived after the request connected.
    #[error("request is already connected")]
    AlreadyConnected,

    /// The offer was already posted.
    #[error("offer already posted")]
    OfferAlreadyPosted,

    /// The result was already posted.
    #[error("result already posted")]
    ResultAlreadyPosted,

    /// The peer sent a second offer.
    #[error("peer sent a second offer")]
    DuplicateOffer,

    /// The exchange port carried an unrecognized envelope.
    #[error("unknown message on the exchange channel")]
    UnknownChannelMessage,

    /// The session closed before any offer arrived.
    #[error("closed before an offer was received")]
    ClosedBeforeOffer,

    /// The client had already connected to another service.
    #[error("request expired")]
    Expired,

    /// The client replaced this match channel with a newer one.
    #[error("match channel invalidated")]
    Invalidated,

    /// The modal host failed.
    #[error(transparent)]
    Host(#[from] HostError),

    /// Name discovery failed.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// A producer or consumer failed.
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

impl LinkError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::ConnectWhenNotConnectable => ErrorKind::Validation,
            Self::NoMatchingConnector
            | Self::InvalidMatchMessage
            | Self::InvalidConnectMessage
            | Self::AlreadyConnected
            | Self::OfferAlreadyPosted
            | Self::ResultAlreadyPosted
            | Self::DuplicateOffer
            | Self::UnknownChannelMessage => ErrorKind::ProtocolViolation,
            Self::NoServiceConfigured | Self::Host(_) | Self::Discovery(_) | Self::Handler(_) => {
                ErrorKind::Environment
            }
            Self::RequestClosed | Self::ClosedBeforeOffer | Self::Expired | Self::Invalidated => {
                ErrorKind::PrematureClosure
            }
        }
    }
}
