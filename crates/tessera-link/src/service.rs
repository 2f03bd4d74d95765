//! The service page's side of a negotiation.
//!
//! A [`Service`] announces itself with `listen`, takes the client's
//! request and match port, matches the client's connectors against its
//! own with the client's declaration order deciding, answers `connect`
//! with a fresh exchange port, and runs the complementary half of the
//! exchange.

use std::cell::Cell;
use std::rc::Rc;

use futures::StreamExt;

use crate::channel::{Inbox, Message, Payload, Port, PortGuard, Transferable, channel};
use crate::connector::{Connector, ConnectorSpec, Handler, PeerConnector, Role, list_to_wire, validate_local, validate_peer};
use crate::envelope::{CHANNEL, Envelope, LaunchInfo, TO_CLIENT, TO_SERVICE};
use crate::error::{HostError, LinkError, ValidationError};
use crate::exchange::{perform_accept, perform_offer};
use crate::matching::{PeerDescriptor, match_connectors};

/// The service page's handle on the client window.
pub trait ClientWindow {
    /// Post a message to the client window.
    fn send(&self, message: Message);

    /// Messages the client posted back. Only the first call gets them.
    fn replies(&self) -> Option<Inbox>;

    /// The client page's origin.
    fn client_origin(&self) -> &str;
}

/// What a finished session looked like from the service.
#[derive(Debug, Clone)]
pub struct ServiceOutcome {
    /// The role the service took.
    pub role: Role,
    /// The agreed scheme.
    pub scheme: String,
    /// The client, with its matched connector.
    pub client: PeerDescriptor,
    /// The client's preferred language.
    pub lang: Option<String>,
    /// Launch details, when the client shared them.
    pub launch: Option<LaunchInfo>,
    /// Offers sent or received.
    pub offers: Vec<Payload>,
    /// Results sent or received.
    pub results: Vec<Payload>,
}

/// A service declaration ready to serve one request.
#[derive(Debug)]
pub struct Service {
    connectors: Vec<Connector>,
}

struct ClientRequest {
    connectors: Vec<PeerConnector>,
    lang: Option<String>,
    launch: Option<LaunchInfo>,
    port: Port,
}

impl Service {
    /// Validate the service's connectors.
    ///
    /// # Errors
    ///
    /// [`ValidationError`] for a bad list.
    pub fn new(specs: impl IntoIterator<Item = ConnectorSpec>) -> Result<Self, ValidationError> {
        Ok(Self {
            connectors: validate_local(specs)?,
        })
    }

    /// The validated connectors.
    #[must_use]
    pub fn connectors(&self) -> &[Connector] {
        &self.connectors
    }

    /// Serve one request from the client behind `client`.
    ///
    /// # Errors
    ///
    /// [`LinkError::Expired`] when the client already connected
    /// elsewhere, [`LinkError::Invalidated`] when it replaced this match
    /// channel, [`LinkError::NoMatchingConnector`] (after telling the
    /// client to close), and the exchange's own errors.
    pub async fn serve(mut self, client: &impl ClientWindow) -> Result<ServiceOutcome, LinkError> {
        let mut replies = client
            .replies()
            .ok_or_else(|| HostError::Unavailable("client replies already taken".to_owned()))?;
        client.send(Envelope::Listen.message(TO_CLIENT));
        tracing::debug!("listening");

        let request = await_request(&mut replies).await?;
        let match_port = PortGuard(request.port);
        let matched = match match_connectors(&request.connectors, &self.connectors) {
            Ok(matched) => matched,
            Err(e) => {
                tracing::debug!("no connector matches the request");
                match_port.0.post(Envelope::Close.message(CHANNEL));
                return Err(e);
            }
        };

        let wire = list_to_wire(&self.connectors);
        let own = self.connectors.swap_remove(matched.peer);
        let (exchange, theirs) = channel();
        match_port.0.post(
            Envelope::Connect { connector_list: wire }.message_with(CHANNEL, vec![Transferable::Port(theirs)]),
        );

        let invalidated = Rc::new(Cell::new(false));
        let closed = watch_match(&match_port.0, Rc::clone(&invalidated));
        let role = own.role;
        let scheme = matched.scheme;
        let origin = client.client_origin().to_owned();
        tracing::debug!(%role, %scheme, %origin, "connected");

        let record = match (role, own.handler) {
            (Role::Offering, Some(Handler::Produce(producer))) => perform_offer(exchange, producer, closed).await?,
            (Role::Accepting, handler) => {
                let consumer = match handler {
                    Some(Handler::Consume(consumer)) => Some(consumer),
                    _ => None,
                };
                perform_accept(exchange, consumer, scheme.clone(), origin.clone(), closed).await?
            }
            (Role::Offering, _) => {
                return Err(ValidationError::MissingProducer { index: matched.peer }.into());
            }
        };
        if invalidated.get() {
            return Err(LinkError::Invalidated);
        }
        Ok(ServiceOutcome {
            role,
            scheme,
            client: PeerDescriptor {
                origin,
                connectors: request.connectors,
                matched: matched.local,
            },
            lang: request.lang,
            launch: request.launch,
            offers: record.offers,
            results: record.results,
        })
    }
}

async fn await_request(replies: &mut Inbox) -> Result<ClientRequest, LinkError> {
    while let Some(message) = replies.next().await {
        match Envelope::open(&message.data, TO_SERVICE) {
            Some(Ok(Envelope::Request {
                connector_list,
                lang,
                launch,
            })) => {
                let connectors = validate_peer(&connector_list)?;
                let port = message
                    .into_single_port()
                    .ok_or(LinkError::InvalidConnectMessage)?;
                return Ok(ClientRequest {
                    connectors,
                    lang,
                    launch,
                    port,
                });
            }
            Some(Ok(Envelope::Expired)) => return Err(LinkError::Expired),
            Some(Ok(other)) => tracing::debug!(?other, "ignored reply"),
            Some(Err(e)) => tracing::debug!(error = %e, "ignored malformed reply"),
            None => {}
        }
    }
    Err(LinkError::RequestClosed)
}

/// Resolves when the match channel ends, flagging `invalidated` if the
/// client replaced it.
fn watch_match(port: &Port, invalidated: Rc<Cell<bool>>) -> impl Future<Output = ()> + 'static {
    let inbox = port.take_inbox();
    async move {
        let Some(mut inbox) = inbox else {
            return;
        };
        while let Some(message) = inbox.next().await {
            match Envelope::open(&message.data, CHANNEL) {
                Some(Ok(Envelope::Invalidated)) => {
                    tracing::debug!("match channel invalidated by the client");
                    invalidated.set(true);
                    return;
                }
                Some(Ok(Envelope::Close)) => return,
                _ => {}
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::RefCell;

    use futures::executor::block_on;
    use serde_json::json;

    use super::*;
    use crate::connector::Producer;

    /// A client window scripted by the test.
    struct Scripted {
        sent: RefCell<Vec<Message>>,
        replies: RefCell<Option<Inbox>>,
    }

    impl Scripted {
        fn new() -> (Self, Port) {
            let (ours, theirs) = channel();
            let scripted = Self {
                sent: RefCell::default(),
                replies: RefCell::new(ours.take_inbox()),
            };
            (scripted, theirs)
        }
    }

    impl ClientWindow for Scripted {
        fn send(&self, message: Message) {
            self.sent.borrow_mut().push(message);
        }

        fn replies(&self) -> Option<Inbox> {
            self.replies.borrow_mut().take()
        }

        fn client_origin(&self) -> &str {
            "https://client.test"
        }
    }

    fn offering() -> Service {
        Service::new([ConnectorSpec::offer(["text/plain"]).producing(Producer::value(Payload::data(json!("hi"))))])
            .unwrap()
    }

    #[test]
    fn expired_reply_ends_the_service() {
        let (client, to_service) = Scripted::new();
        to_service.post(Envelope::Expired.message(TO_SERVICE));
        let err = block_on(offering().serve(&client)).unwrap_err();
        assert_eq!(err, LinkError::Expired);
        assert_eq!(client.sent.borrow()[0].data[TO_CLIENT]["tag"], "listen");
    }

    #[test]
    fn mismatch_tells_the_client_to_close() {
        let (client, to_service) = Scripted::new();
        let (match_ours, match_theirs) = channel();
        to_service.post(
            Envelope::Request {
                connector_list: json!([{"accept": "image/png"}]),
                lang: None,
                launch: None,
            }
            .message_with(TO_SERVICE, vec![Transferable::Port(match_theirs)]),
        );
        let err = block_on(offering().serve(&client)).unwrap_err();
        assert_eq!(err, LinkError::NoMatchingConnector);
        let mut inbox = match_ours.take_inbox().unwrap();
        let close = inbox.try_recv().unwrap();
        assert_eq!(close.data[CHANNEL]["tag"], "close");
    }

    #[test]
    fn request_must_carry_exactly_one_port() {
        let (client, to_service) = Scripted::new();
        let (_first, first) = channel();
        let (_second, second) = channel();
        to_service.post(
            Envelope::Request {
                connector_list: json!([{"accept": "text/plain"}]),
                lang: None,
                launch: None,
            }
            .message_with(TO_SERVICE, vec![Transferable::Port(first), Transferable::Port(second)]),
        );
        let err = block_on(offering().serve(&client)).unwrap_err();
        assert_eq!(err, LinkError::InvalidConnectMessage);
    }

    #[test]
    fn invalidation_surfaces_after_exchange_is_cut_short() {
        let (client, to_service) = Scripted::new();
        let (match_ours, match_theirs) = channel();
        to_service.post(
            Envelope::Request {
                connector_list: json!([{"accept": "text/plain"}]),
                lang: Some("en".into()),
                launch: None,
            }
            .message_with(TO_SERVICE, vec![Transferable::Port(match_theirs)]),
        );
        match_ours.post(Envelope::Invalidated.message(CHANNEL));
        let err = block_on(offering().serve(&client)).unwrap_err();
        assert_eq!(err, LinkError::Invalidated);
    }

    #[test]
    fn client_order_decides_the_scheme() {
        let (client, to_service) = Scripted::new();
        let (match_ours, match_theirs) = channel();
        to_service.post(
            Envelope::Request {
                connector_list: json!([{"accept": ["b", "a"]}]),
                lang: None,
                launch: None,
            }
            .message_with(TO_SERVICE, vec![Transferable::Port(match_theirs)]),
        );
        // Close right after connect so the exchange ends.
        match_ours.post(Envelope::Close.message(CHANNEL));
        let service = Service::new([
            ConnectorSpec::offer(["x"]).producing(Producer::value(Payload::empty())),
            ConnectorSpec::offer(["a", "b"]).producing(Producer::value(Payload::empty())),
        ])
        .unwrap();
        let outcome = block_on(service.serve(&client)).unwrap();
        assert_eq!(outcome.scheme, "b");
        assert_eq!(outcome.role, Role::Offering);
        assert_eq!(outcome.client.matched, 0);
        assert_eq!(outcome.client.origin, "https://client.test");
        let connect = match_ours.take_inbox().unwrap().try_recv().unwrap();
        assert_eq!(connect.data[CHANNEL]["tag"], "connect");
        assert_eq!(connect.data[CHANNEL]["connectorList"].as_array().unwrap().len(), 2);
    }
}
