//! Integration tests: a client request and a service page negotiating
//! over the in-memory host.

#![allow(clippy::unwrap_used, clippy::future_not_send)]

use std::rc::Rc;

use futures::channel::oneshot;
use futures::executor::{LocalPool, LocalSpawner};
use futures::future::{LocalBoxFuture, pending, ready};
use futures::task::LocalSpawnExt;
use futures::FutureExt;
use serde_json::json;
use tessera_link::discovery::{NameResolver, Resolution};
use tessera_link::memory::{HostEvent, ManualTimer, MemoryHost};
use tessera_link::{
    Client, ClientConfig, ClientOverrides, ConnectorSpec, Consumer, DiscoveryError, Environment, HandlerError,
    Launcher, LinkError, Payload, Producer, ReceivedOffer, RequestState, Role, Service,
};

const SERVICE_URL: &str = "https://service.example/pick";
const SERVICE_ORIGIN: &str = "https://service.example";

struct World {
    pool: LocalPool,
    spawner: LocalSpawner,
    host: Rc<MemoryHost>,
    client: Client,
}

fn world() -> World {
    let pool = LocalPool::new();
    let spawner = pool.spawner();
    let host = Rc::new(MemoryHost::new("https://client.test"));
    let timer = Rc::new(ManualTimer::default());
    let env = Environment::new(host.clone(), timer, Rc::new(spawner.clone()));
    let config = ClientConfig {
        client_name: Some("Editor".to_owned()),
        url: Some(SERVICE_URL.to_owned()),
        own_origin: Some("https://client.test".to_owned()),
        ..ClientConfig::default()
    };
    World {
        pool,
        spawner,
        host,
        client: Client::new(config, env),
    }
}

impl World {
    /// Load `service` into the most recent window.
    fn serve(&self, service: Service) -> futures::future::RemoteHandle<Result<tessera_link::ServiceOutcome, LinkError>> {
        let window = self.host.last_window().unwrap();
        let page = self.host.endpoint(window, SERVICE_ORIGIN).unwrap();
        self.spawner
            .spawn_local_with_handle(async move { service.serve(&page).await })
            .unwrap()
    }
}

fn png_service() -> Service {
    let payload = Payload::data(json!({ "bytes": vec![7u8; 42] }));
    Service::new([ConnectorSpec::offer(["image/png"]).producing(Producer::value(payload))]).unwrap()
}

#[test]
fn client_accepts_a_png_from_the_service() {
    let mut w = world();
    let outcome = w.client.accept(["image/png"], None);
    let served = w.serve(png_service());

    let exchange = w.pool.run_until(outcome).unwrap().unwrap();
    assert_eq!(exchange.role, Role::Accepting);
    assert_eq!(exchange.scheme, "image/png");
    assert_eq!(exchange.peer.origin, SERVICE_ORIGIN);
    assert_eq!(exchange.offers[0].data["bytes"].as_array().unwrap().len(), 42);
    assert!(exchange.results[0].data.is_null());

    let service = w.pool.run_until(served).unwrap();
    assert_eq!(service.role, Role::Offering);
    assert_eq!(service.results.len(), 1);
    // Launch details are for trusted origins only.
    assert!(service.launch.is_none());

    let window = w.host.last_window().unwrap();
    let events = w.host.events();
    assert!(events.contains(&HostEvent::Navigated(window, SERVICE_URL.to_owned())));
    assert!(events.contains(&HostEvent::Closed(window)));
    assert_eq!(events.last(), Some(&HostEvent::ProxyRemoved));
}

#[test]
fn client_offers_and_receives_the_result() {
    let mut w = world();
    let producer = Producer::callback(|poster: tessera_link::OfferPoster| async move {
        poster.post(Payload::data(json!("draft"))).map_err(HandlerError::new)
    });
    let outcome = w.client.offer(["text/plain"], producer);
    let consumer = Consumer::new(|offer: ReceivedOffer| async move {
        let reply = json!({ "saved": offer.payload.data });
        offer.post_result(Payload::data(reply)).map_err(HandlerError::new)
    });
    let service = Service::new([ConnectorSpec::accept(["text/plain"]).consuming(consumer)]).unwrap();
    let served = w.serve(service);

    let exchange = w.pool.run_until(outcome).unwrap().unwrap();
    assert_eq!(exchange.role, Role::Offering);
    assert_eq!(exchange.results[0].data, json!({ "saved": "draft" }));
    let service = w.pool.run_until(served).unwrap();
    assert_eq!(service.offers[0].data, json!("draft"));
}

#[test]
fn mismatch_resolves_without_a_session() {
    let mut w = world();
    let outcome = w.client.accept(["image/jpeg"], None);
    let served = w.serve(png_service());
    assert!(w.pool.run_until(outcome).unwrap().is_none());
    assert_eq!(w.pool.run_until(served).unwrap_err(), LinkError::NoMatchingConnector);
}

#[test]
fn closing_before_the_offer_rejects() {
    let mut w = world();
    let request = w.client.request();
    request.open().unwrap();
    let pending_offer = Producer::deferred(pending::<Result<Payload, HandlerError>>());
    let service = Service::new([ConnectorSpec::offer(["image/png"]).producing(pending_offer)]).unwrap();
    let connecting = w
        .spawner
        .spawn_local_with_handle(request.connect([ConnectorSpec::accept(["image/png"])]))
        .unwrap();
    let _served = w.serve(service);
    w.pool.run_until_stalled();
    assert_eq!(request.state(), RequestState::Connected);

    request.close();
    assert_eq!(w.pool.run_until(connecting).unwrap_err(), LinkError::ClosedBeforeOffer);
}

#[test]
fn connect_twice_is_rejected_without_disturbing_the_first() {
    let mut w = world();
    let request = w.client.request();
    request.open().unwrap();
    let first = request.connect([ConnectorSpec::accept(["image/png"])]);
    let second = request.connect([ConnectorSpec::accept(["image/png"])]);
    assert_eq!(
        w.pool.run_until(second).unwrap_err(),
        LinkError::ConnectWhenNotConnectable
    );
    assert_eq!(request.state(), RequestState::Connecting);

    let _served = w.serve(png_service());
    let exchange = w.pool.run_until(first).unwrap().unwrap();
    assert_eq!(exchange.offers.len(), 1);
}

#[test]
fn late_listener_is_told_it_expired() {
    let mut w = world();
    let (go, wait) = oneshot::channel::<()>();
    let consumer = Consumer::new(move |offer: ReceivedOffer| async move {
        wait.await.ok();
        offer.post_result(Payload::empty()).map_err(HandlerError::new)
    });
    let outcome = w
        .spawner
        .spawn_local_with_handle(w.client.accept(["image/png"], Some(consumer)))
        .unwrap();
    let _served = w.serve(png_service());
    w.pool.run_until_stalled();

    let late = w.serve(png_service());
    assert_eq!(w.pool.run_until(late).unwrap_err(), LinkError::Expired);

    go.send(()).unwrap();
    let exchange = w.pool.run_until(outcome).unwrap().unwrap();
    assert_eq!(exchange.offers.len(), 1);
}

struct FixedResolver;

impl NameResolver for FixedResolver {
    fn resolve(&self, identifier: &str) -> LocalBoxFuture<'static, Result<Resolution, DiscoveryError>> {
        let found = (identifier == "service.example").then(|| Resolution {
            url: SERVICE_URL.to_owned(),
            origins: vec![SERVICE_ORIGIN.to_owned(), "https://cdn.service.example".to_owned()],
            verified: false,
        });
        ready(found.ok_or(DiscoveryError::NotFound)).boxed_local()
    }
}

#[test]
fn discovery_launcher_authorizes_published_origins() {
    let mut w = world();
    let base = Client::new(
        ClientConfig {
            url: None,
            ..w.client.config().clone()
        },
        w.client_env(),
    );
    let client = base.with(ClientOverrides {
        launcher: Some(Launcher::Discover {
            resolver: Rc::new(FixedResolver),
            identifier: "service.example".to_owned(),
        }),
        ..ClientOverrides::default()
    });
    let request = client.request();
    request.open().unwrap();
    let connecting = request.connect([ConnectorSpec::accept(["image/png"])]);
    let _served = w.serve(png_service());
    let exchange = w.pool.run_until(connecting).unwrap().unwrap();
    assert_eq!(exchange.offers.len(), 1);
    assert_eq!(
        request.origins(),
        vec!["https://cdn.service.example".to_owned(), SERVICE_ORIGIN.to_owned()]
    );
    let window = w.host.last_window().unwrap();
    assert_eq!(w.host.location(window).as_deref(), Some(SERVICE_URL));
}

#[test]
fn failed_discovery_fails_the_request() {
    let mut w = world();
    let client = Client::new(
        ClientConfig {
            url: None,
            launcher: Some(Launcher::Discover {
                resolver: Rc::new(FixedResolver),
                identifier: "nowhere.example".to_owned(),
            }),
            ..w.client.config().clone()
        },
        w.client_env(),
    );
    let err = w.pool.run_until(client.accept(["image/png"], None)).unwrap_err();
    assert_eq!(err, LinkError::Discovery(DiscoveryError::NotFound));
}

impl World {
    fn client_env(&self) -> Environment {
        Environment::new(
            self.host.clone(),
            Rc::new(ManualTimer::default()),
            Rc::new(self.spawner.clone()),
        )
    }
}
