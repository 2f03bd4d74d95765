//! The offer/accept exchange run over a dedicated port once a match is
//! found.
//!
//! Each session carries exactly one `offer` and one `result`. The
//! offering side finishes, and posts `release`, once it has both posted
//! its offer and received the result; the accepting side finishes once it
//! has posted its result and received `release`. Either order works.

use std::cell::RefCell;
use std::future::Future;
use std::pin::pin;
use std::rc::Rc;

use futures::channel::oneshot;
use futures::future::{Fuse, LocalBoxFuture};
use futures::{FutureExt, StreamExt, select_biased};

use crate::channel::{Message, Payload, Port, PortGuard};
use crate::connector::{Consumer, Producer};
use crate::envelope::{CHANNEL, Envelope};
use crate::error::{HandlerError, LinkError};

/// Payloads that crossed the exchange port, in order.
#[derive(Debug, Clone, Default)]
pub struct ExchangeRecord {
    /// Offers posted or received.
    pub offers: Vec<Payload>,
    /// Results posted or received.
    pub results: Vec<Payload>,
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Offer,
    Result,
}

/// One-shot outgoing slot shared by a poster and its exchange loop.
#[derive(Debug)]
struct Outbox {
    port: Port,
    kind: Kind,
    sent: RefCell<Option<Payload>>,
    notify: RefCell<Option<oneshot::Sender<()>>>,
}

impl Outbox {
    fn new(port: Port, kind: Kind) -> (Rc<Self>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let outbox = Self {
            port,
            kind,
            sent: RefCell::new(None),
            notify: RefCell::new(Some(tx)),
        };
        (Rc::new(outbox), rx)
    }

    fn post(&self, payload: Payload) -> Result<(), LinkError> {
        if self.sent.borrow().is_some() {
            return Err(match self.kind {
                Kind::Offer => LinkError::OfferAlreadyPosted,
                Kind::Result => LinkError::ResultAlreadyPosted,
            });
        }
        let data = payload.data.clone();
        let envelope = match self.kind {
            Kind::Offer => Envelope::Offer { payload: data },
            Kind::Result => Envelope::Result { payload: data },
        };
        self.port
            .post(envelope.message_with(CHANNEL, payload.transfer.clone()));
        *self.sent.borrow_mut() = Some(payload);
        if let Some(tx) = self.notify.borrow_mut().take() {
            tx.send(()).ok();
        }
        Ok(())
    }

    fn sent(&self) -> Option<Payload> {
        self.sent.borrow().clone()
    }
}

/// Capability to post the single offer of a session.
#[derive(Debug, Clone)]
pub struct OfferPoster(Rc<Outbox>);

impl OfferPoster {
    /// Post the offer.
    ///
    /// # Errors
    ///
    /// [`LinkError::OfferAlreadyPosted`] on every call after the first;
    /// nothing is sent.
    pub fn post(&self, payload: Payload) -> Result<(), LinkError> {
        self.0.post(payload)
    }
}

/// Capability to post the single result of a session.
#[derive(Debug, Clone)]
pub struct ResultPoster(Rc<Outbox>);

impl ResultPoster {
    /// Post the result.
    ///
    /// # Errors
    ///
    /// [`LinkError::ResultAlreadyPosted`] on every call after the first;
    /// nothing is sent.
    pub fn post(&self, payload: Payload) -> Result<(), LinkError> {
        self.0.post(payload)
    }
}

/// An offer handed to a [`Consumer`].
#[derive(Debug, Clone)]
pub struct ReceivedOffer {
    /// The agreed scheme.
    pub scheme: String,
    /// The offering peer's origin.
    pub origin: String,
    /// The offered data and handles.
    pub payload: Payload,
    /// Posts the answer.
    pub poster: ResultPoster,
}

impl ReceivedOffer {
    /// Shorthand for `self.poster.post(payload)`.
    ///
    /// # Errors
    ///
    /// See [`ResultPoster::post`].
    pub fn post_result(&self, payload: Payload) -> Result<(), LinkError> {
        self.poster.post(payload)
    }
}

fn received(message: Message, payload: serde_json::Value) -> Payload {
    Payload {
        data: payload,
        transfer: message.transfer,
    }
}

/// Run the offering side on `port` until the exchange completes, the
/// peer goes away, or `closed` resolves.
///
/// Closure before completion is not an error: whatever was collected is
/// returned.
///
/// # Errors
///
/// [`LinkError::UnknownChannelMessage`] for an unexpected envelope, and
/// [`LinkError::Handler`] when the producer fails.
pub async fn perform_offer(
    port: Port,
    producer: Producer,
    closed: impl Future<Output = ()>,
) -> Result<ExchangeRecord, LinkError> {
    let _guard = PortGuard(port.clone());
    let Some(mut inbox) = port.take_inbox() else {
        tracing::debug!("exchange port already drained");
        return Ok(ExchangeRecord::default());
    };
    let (outbox, posted) = Outbox::new(port.clone(), Kind::Offer);
    let poster = OfferPoster(Rc::clone(&outbox));

    let producing: LocalBoxFuture<'static, Result<(), LinkError>> = match producer {
        Producer::Value(payload) => futures::future::ready(poster.post(payload)).boxed_local(),
        Producer::Deferred(payload) => async move { poster.post(payload.await?) }.boxed_local(),
        Producer::Callback(f) => {
            let running = f(poster);
            async move { running.await.map_err(LinkError::from) }.boxed_local()
        }
    };
    let mut producing = producing.fuse();
    let mut posted = posted.fuse();
    let mut closed = pin!(closed.fuse());
    let mut result: Option<Payload> = None;

    let record = |result: &Option<Payload>| ExchangeRecord {
        offers: outbox.sent().into_iter().collect(),
        results: result.iter().cloned().collect(),
    };

    loop {
        if outbox.sent().is_some() && result.is_some() {
            port.post(Envelope::Release.message(CHANNEL));
            tracing::debug!("offer exchange complete");
            return Ok(record(&result));
        }
        select_biased! {
            produced = producing => produced?,
            _ = posted => {}
            message = inbox.next() => {
                let Some(message) = message else {
                    return Ok(record(&result));
                };
                match Envelope::open(&message.data, CHANNEL) {
                    None => {}
                    Some(Ok(Envelope::Result { payload })) => {
                        if result.is_some() {
                            tracing::warn!("duplicate result ignored");
                        } else {
                            result = Some(received(message, payload));
                        }
                    }
                    Some(_) => return Err(LinkError::UnknownChannelMessage),
                }
            }
            () = closed => return Ok(record(&result)),
        }
    }
}

/// Run the accepting side on `port` until the exchange completes, the
/// peer goes away, or `closed` resolves.
///
/// Without a consumer an empty result is posted as soon as the offer
/// arrives.
///
/// # Errors
///
/// [`LinkError::ClosedBeforeOffer`] when the session ends before any
/// offer; [`LinkError::DuplicateOffer`] and
/// [`LinkError::UnknownChannelMessage`] for protocol violations;
/// [`LinkError::Handler`] when the consumer fails.
pub async fn perform_accept(
    port: Port,
    consumer: Option<Consumer>,
    scheme: String,
    origin: String,
    closed: impl Future<Output = ()>,
) -> Result<ExchangeRecord, LinkError> {
    let _guard = PortGuard(port.clone());
    let Some(mut inbox) = port.take_inbox() else {
        return Err(LinkError::ClosedBeforeOffer);
    };
    let (outbox, posted) = Outbox::new(port.clone(), Kind::Result);
    let mut consumer = consumer;
    let mut consuming: Fuse<LocalBoxFuture<'static, Result<(), HandlerError>>> = Fuse::terminated();
    let mut posted = posted.fuse();
    let mut closed = pin!(closed.fuse());
    let mut offer: Option<Payload> = None;
    let mut released = false;

    let finish = |offer: Option<Payload>| -> Result<ExchangeRecord, LinkError> {
        let offer = offer.ok_or(LinkError::ClosedBeforeOffer)?;
        Ok(ExchangeRecord {
            offers: vec![offer],
            results: outbox.sent().into_iter().collect(),
        })
    };

    loop {
        if released && outbox.sent().is_some() {
            tracing::debug!("accept exchange complete");
            return finish(offer);
        }
        select_biased! {
            consumed = consuming => consumed?,
            _ = posted => {}
            message = inbox.next() => {
                let Some(message) = message else {
                    return finish(offer);
                };
                match Envelope::open(&message.data, CHANNEL) {
                    None => {}
                    Some(Ok(Envelope::Offer { payload })) => {
                        if offer.is_some() {
                            return Err(LinkError::DuplicateOffer);
                        }
                        let payload = received(message, payload);
                        offer = Some(payload.clone());
                        let poster = ResultPoster(Rc::clone(&outbox));
                        match consumer.take() {
                            Some(consumer) => {
                                consuming = consumer
                                    .call(ReceivedOffer {
                                        scheme: scheme.clone(),
                                        origin: origin.clone(),
                                        payload,
                                        poster,
                                    })
                                    .fuse();
                            }
                            None => poster.post(Payload::empty())?,
                        }
                    }
                    Some(Ok(Envelope::Release)) => released = true,
                    Some(_) => return Err(LinkError::UnknownChannelMessage),
                }
            }
            () = closed => return finish(offer),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;

    use futures::executor::block_on;
    use futures::future::{pending, ready};
    use serde_json::{Value, json};

    use super::*;
    use crate::channel::channel;

    fn tag(message: &Message) -> Value {
        message.data[CHANNEL]["tag"].clone()
    }

    fn drain(port: &Port) -> Vec<Message> {
        let mut inbox = port.take_inbox().unwrap();
        let mut out = Vec::new();
        while let Ok(message) = inbox.try_recv() {
            out.push(message);
        }
        out
    }

    #[test]
    fn offer_completes_after_result() {
        let (ours, theirs) = channel();
        theirs.post(Envelope::Result { payload: json!("thanks") }.message(CHANNEL));
        let record = block_on(perform_offer(
            ours,
            Producer::value(Payload::data(json!({"n": 1}))),
            pending(),
        ))
        .unwrap();
        assert_eq!(record.offers[0].data, json!({"n": 1}));
        assert_eq!(record.results[0].data, json!("thanks"));
        let sent = drain(&theirs);
        assert_eq!(tag(&sent[0]), "offer");
        assert_eq!(tag(&sent[1]), "release");
    }

    #[test]
    fn offer_closed_before_result_resolves_partially() {
        let (ours, _theirs) = channel();
        let record = block_on(perform_offer(
            ours,
            Producer::deferred(async { Ok(Payload::data(json!(5))) }),
            ready(()),
        ))
        .unwrap();
        assert!(record.results.is_empty());
    }

    #[test]
    fn second_offer_post_is_rejected_without_sending() {
        let (ours, theirs) = channel();
        theirs.post(Envelope::Result { payload: Value::Null }.message(CHANNEL));
        let second = Rc::new(Cell::new(None));
        let seen = Rc::clone(&second);
        let producer = Producer::callback(move |poster: OfferPoster| async move {
            poster.post(Payload::data(json!(1))).map_err(HandlerError::new)?;
            seen.set(Some(poster.post(Payload::data(json!(2)))));
            Ok(())
        });
        block_on(perform_offer(ours, producer, pending())).unwrap();
        assert_eq!(second.take(), Some(Err(LinkError::OfferAlreadyPosted)));
        let offers = drain(&theirs).iter().filter(|m| tag(m) == "offer").count();
        assert_eq!(offers, 1);
    }

    #[test]
    fn offer_rejects_unknown_envelope() {
        let (ours, theirs) = channel();
        theirs.post(Envelope::Listen.message(CHANNEL));
        let err = block_on(perform_offer(ours, Producer::value(Payload::empty()), pending()));
        assert_eq!(err.unwrap_err(), LinkError::UnknownChannelMessage);
    }

    #[test]
    fn producer_failure_surfaces() {
        let (ours, _theirs) = channel();
        let producer = Producer::deferred(async { Err(HandlerError::new("disk full")) });
        let err = block_on(perform_offer(ours, producer, pending())).unwrap_err();
        assert!(matches!(err, LinkError::Handler(_)));
    }

    #[test]
    fn accept_without_consumer_posts_empty_result() {
        let (ours, theirs) = channel();
        theirs.post(Envelope::Offer { payload: json!("data") }.message(CHANNEL));
        theirs.post(Envelope::Release.message(CHANNEL));
        let record = block_on(perform_accept(
            ours,
            None,
            "text/plain".into(),
            "https://peer.example".into(),
            pending(),
        ))
        .unwrap();
        assert_eq!(record.offers[0].data, json!("data"));
        assert_eq!(record.results[0].data, Value::Null);
        assert_eq!(tag(&drain(&theirs)[0]), "result");
    }

    #[test]
    fn accept_consumer_sees_offer() {
        let (ours, theirs) = channel();
        theirs.post(
            Envelope::Offer { payload: json!(21) }
                .message_with(CHANNEL, Payload::empty().with_bytes(vec![9u8; 4]).transfer),
        );
        theirs.post(Envelope::Release.message(CHANNEL));
        let consumer = Consumer::new(|offer: ReceivedOffer| async move {
            assert_eq!(offer.scheme, "number");
            assert_eq!(offer.payload.bytes().next().unwrap().len(), 4);
            let doubled = offer.payload.data.as_i64().unwrap_or_default() * 2;
            offer.post_result(Payload::data(json!(doubled))).map_err(HandlerError::new)?;
            let again = offer.post_result(Payload::empty());
            assert_eq!(again, Err(LinkError::ResultAlreadyPosted));
            Ok(())
        });
        let record = block_on(perform_accept(
            ours,
            Some(consumer),
            "number".into(),
            "https://peer.example".into(),
            pending(),
        ))
        .unwrap();
        assert_eq!(record.results[0].data, json!(42));
    }

    #[test]
    fn accept_closed_before_offer_rejects() {
        let (ours, _theirs) = channel();
        let err = block_on(perform_accept(ours, None, "a".into(), "o".into(), ready(())));
        assert_eq!(err.unwrap_err(), LinkError::ClosedBeforeOffer);
    }

    #[test]
    fn accept_closed_after_offer_resolves() {
        let (ours, theirs) = channel();
        theirs.post(Envelope::Offer { payload: json!(1) }.message(CHANNEL));
        theirs.close();
        let consumer = Consumer::new(|_offer| pending::<Result<(), HandlerError>>());
        let record =
            block_on(perform_accept(ours, Some(consumer), "a".into(), "o".into(), pending())).unwrap();
        assert_eq!(record.offers.len(), 1);
        assert!(record.results.is_empty());
    }

    #[test]
    fn accept_rejects_second_offer() {
        let (ours, theirs) = channel();
        theirs.post(Envelope::Offer { payload: json!(1) }.message(CHANNEL));
        theirs.post(Envelope::Offer { payload: json!(2) }.message(CHANNEL));
        let consumer = Consumer::new(|_offer| pending::<Result<(), HandlerError>>());
        let err = block_on(perform_accept(ours, Some(consumer), "a".into(), "o".into(), pending()));
        assert_eq!(err.unwrap_err(), LinkError::DuplicateOffer);
    }

    #[test]
    fn accept_rejects_unknown_tag() {
        let (ours, theirs) = channel();
        theirs.post(Message::new(json!({CHANNEL: {"tag": "bogus"}})));
        let err = block_on(perform_accept(ours, None, "a".into(), "o".into(), pending()));
        assert_eq!(err.unwrap_err(), LinkError::UnknownChannelMessage);
    }

    #[test]
    fn unaddressed_messages_are_ignored() {
        let (ours, theirs) = channel();
        theirs.post(Message::new(json!({"other": 1})));
        theirs.post(Envelope::Offer { payload: json!(1) }.message(CHANNEL));
        theirs.post(Envelope::Release.message(CHANNEL));
        assert!(block_on(perform_accept(ours, None, "a".into(), "o".into(), pending())).is_ok());
    }
}
