//! The client-side negotiation session.
//!
//! A [`Request`] moves through `Unopened → Open → Connecting → Connected
//! → Closed`, and may be closed from any state. Resources acquired on the
//! way (the current-request slot, proxy, overlay, window) register
//! finalizers that run once, last first, when the request closes.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::pin::pin;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use futures::channel::oneshot;
use futures::future::{Fuse, LocalBoxFuture, Shared, ready};
use futures::task::LocalSpawnExt;
use futures::{FutureExt, StreamExt, select, select_biased};

use crate::channel::{Inbox, Message, Payload, Port, PortGuard, Transferable, channel};
use crate::client::{ClientConfig, Launcher};
use crate::connector::{Connector, ConnectorSpec, Handler, Role, list_to_wire, validate_local, validate_peer};
use crate::current;
use crate::discovery::origin_of;
use crate::envelope::{CHANNEL, Envelope, LaunchInfo, TO_CLIENT, TO_SERVICE, string_list};
use crate::error::{HandlerError, HostError, LinkError, ValidationError};
use crate::exchange::{ExchangeRecord, perform_accept, perform_offer};
use crate::host::{Environment, WindowId, WindowInbox, WindowMessage};
use crate::matching::{PeerDescriptor, match_connectors};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a [`Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Created, nothing acquired.
    Unopened,
    /// Window open, waiting for `connect`.
    Open,
    /// Navigated, negotiating with the service.
    Connecting,
    /// Matched; the exchange is running.
    Connected,
    /// Finalizers have run.
    Closed,
}

/// A cleanup action run when the request closes.
pub type Finalizer = Box<dyn FnOnce() -> Result<(), HandlerError>>;

/// A completed (or cut short) negotiation.
#[derive(Debug, Clone)]
pub struct Exchange {
    /// The role the client took.
    pub role: Role,
    /// The agreed scheme.
    pub scheme: String,
    /// The service that answered.
    pub peer: PeerDescriptor,
    /// Offers sent or received.
    pub offers: Vec<Payload>,
    /// Results sent or received.
    pub results: Vec<Payload>,
}

struct Inner {
    state: RequestState,
    origins: BTreeSet<String>,
    window: Option<WindowId>,
    finalizers: Vec<Finalizer>,
}

struct Core {
    id: u64,
    config: ClientConfig,
    env: Environment,
    closed_tx: RefCell<Option<oneshot::Sender<()>>>,
    closed: Shared<oneshot::Receiver<()>>,
    inner: RefCell<Inner>,
}

/// One negotiation session. Cloning yields another handle to the same
/// session.
#[derive(Clone)]
pub struct Request {
    core: Rc<Core>,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.core.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Request {
    /// A new, unopened request.
    #[must_use]
    pub fn new(config: ClientConfig, env: Environment) -> Self {
        let (closed_tx, closed_rx) = oneshot::channel();
        let origins = config.origins.iter().cloned().collect();
        Self {
            core: Rc::new(Core {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                config,
                env,
                closed_tx: RefCell::new(Some(closed_tx)),
                closed: closed_rx.shared(),
                inner: RefCell::new(Inner {
                    state: RequestState::Unopened,
                    origins,
                    window: None,
                    finalizers: Vec::new(),
                }),
            }),
        }
    }

    /// Process-unique id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.core.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RequestState {
        self.core.inner.borrow().state
    }

    /// Whether the request has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == RequestState::Closed
    }

    /// Origins currently authorized to talk to this request.
    #[must_use]
    pub fn origins(&self) -> Vec<String> {
        self.core.inner.borrow().origins.iter().cloned().collect()
    }

    /// Resolves once the request closes.
    pub fn closed(&self) -> impl Future<Output = ()> + 'static {
        self.core.closed.clone().map(|_| ())
    }

    /// Register a cleanup action. On a closed request it runs at once.
    pub fn add_finalizer(&self, finalizer: impl FnOnce() -> Result<(), HandlerError> + 'static) {
        let finalizer: Finalizer = Box::new(finalizer);
        let mut inner = self.core.inner.borrow_mut();
        if inner.state == RequestState::Closed {
            drop(inner);
            run_finalizer(self.core.id, 0, finalizer);
        } else {
            inner.finalizers.push(finalizer);
        }
    }

    /// Acquire the modal window and become the current request.
    ///
    /// Opening an already open request does nothing. Any other current
    /// request is closed first.
    ///
    /// # Errors
    ///
    /// [`LinkError::RequestClosed`] after close, and [`LinkError::Host`]
    /// when the window cannot be opened (the request is then closed).
    pub fn open(&self) -> Result<(), LinkError> {
        match self.state() {
            RequestState::Closed => return Err(LinkError::RequestClosed),
            RequestState::Unopened => {}
            _ => return Ok(()),
        }
        let id = self.core.id;

        let weak = Rc::downgrade(&self.core);
        current::displace(id, move || {
            if let Some(core) = weak.upgrade() {
                Self { core }.close();
            }
        });
        self.add_finalizer(move || {
            current::release(id);
            Ok(())
        });

        let host = Rc::clone(&self.core.env.host);
        host.insert_proxy();
        let proxy = Rc::clone(&host);
        self.add_finalizer(move || {
            proxy.remove_proxy();
            Ok(())
        });
        host.show_overlay();
        let overlay = Rc::clone(&host);
        self.add_finalizer(move || {
            overlay.hide_overlay();
            Ok(())
        });

        let window = match host.open() {
            Ok(window) => window,
            Err(e) => {
                tracing::warn!(request = id, error = %e, "modal host failed to open");
                self.close();
                return Err(e.into());
            }
        };
        let closer = Rc::clone(&host);
        self.add_finalizer(move || {
            closer.close(window);
            Ok(())
        });

        {
            let mut inner = self.core.inner.borrow_mut();
            inner.window = Some(window);
            inner.state = RequestState::Open;
        }
        self.watch(window);
        tracing::debug!(request = id, ?window, "request open");
        Ok(())
    }

    /// Poll for the window disappearing and listen for page unload.
    fn watch(&self, window: WindowId) {
        let weak = Rc::downgrade(&self.core);
        let env = self.core.env.clone();
        let interval = self.core.config.poll_interval;
        let closed = self.core.closed.clone();
        let unload = env.host.unload();
        let spawner = Rc::clone(&env.spawner);
        let task = async move {
            let mut closed = closed.fuse();
            let mut unload = unload.map_or_else(Fuse::terminated, FutureExt::fuse);
            loop {
                let mut tick = env.timer.sleep(interval).fuse();
                select! {
                    _ = closed => return,
                    () = unload => {
                        tracing::debug!("page unloading");
                        break;
                    }
                    () = tick => {
                        if env.host.is_closed(window) {
                            tracing::debug!(?window, "modal window gone");
                            break;
                        }
                    }
                }
            }
            close_weak(&weak);
        };
        if let Err(e) = spawner.spawn_local(task) {
            tracing::warn!(error = %e, "could not spawn window watcher");
        }
    }

    /// Navigate to the service and negotiate.
    ///
    /// The returned future resolves to `Ok(None)` when the request closes
    /// before a session is established, and to the exchange otherwise.
    /// The request is closed when the future completes or is dropped.
    ///
    /// # Errors
    ///
    /// Synchronous failures leave the request untouched:
    /// [`LinkError::ConnectWhenNotConnectable`] unless the request is
    /// exactly `Open`, and [`LinkError::Validation`] for a bad list.
    /// [`LinkError::NoServiceConfigured`] closes the request. Everything
    /// else comes from the negotiation itself.
    pub fn connect(
        &self,
        specs: impl IntoIterator<Item = ConnectorSpec>,
    ) -> LocalBoxFuture<'static, Result<Option<Exchange>, LinkError>> {
        if self.state() != RequestState::Open {
            return ready(Err(LinkError::ConnectWhenNotConnectable)).boxed_local();
        }
        let connectors = match validate_local(specs) {
            Ok(connectors) => connectors,
            Err(e) => return ready(Err(e.into())).boxed_local(),
        };
        let config = &self.core.config;
        if config.url.is_none() && config.launcher.is_none() {
            self.close();
            return ready(Err(LinkError::NoServiceConfigured)).boxed_local();
        }
        self.set_state(RequestState::Connecting);

        let request = self.clone();
        async move {
            let _closer = CloseOnDrop(request.clone());
            let outcome = Driver::new(request, connectors).run().await;
            if let Err(e) = &outcome {
                tracing::warn!(error = %e, kind = ?e.kind(), "request failed");
            }
            outcome
        }
        .boxed_local()
    }

    /// Close the request, running finalizers last-registered first.
    /// Closing again does nothing.
    pub fn close(&self) {
        let finalizers = {
            let mut inner = self.core.inner.borrow_mut();
            if inner.state == RequestState::Closed {
                return;
            }
            inner.state = RequestState::Closed;
            std::mem::take(&mut inner.finalizers)
        };
        if let Some(tx) = self.core.closed_tx.borrow_mut().take() {
            tx.send(()).ok();
        }
        for (index, finalizer) in finalizers.into_iter().enumerate().rev() {
            run_finalizer(self.core.id, index, finalizer);
        }
        tracing::debug!(request = self.core.id, "request closed");
    }

    fn set_state(&self, state: RequestState) {
        let mut inner = self.core.inner.borrow_mut();
        if inner.state != RequestState::Closed {
            tracing::trace!(request = self.core.id, from = ?inner.state, to = ?state, "state");
            inner.state = state;
        }
    }

    fn authorize(&self, origins: impl IntoIterator<Item = String>) {
        self.core.inner.borrow_mut().origins.extend(origins);
    }

    fn replace_origins(&self, origins: Vec<String>) {
        tracing::debug!(request = self.core.id, ?origins, "authorized origins replaced");
        self.core.inner.borrow_mut().origins = origins.into_iter().collect();
    }

    fn is_own_origin(&self, origin: &str) -> bool {
        self.core.config.own_origin.as_deref() == Some(origin)
    }

    fn trusts(&self, origin: &str) -> bool {
        self.is_own_origin(origin) || self.core.inner.borrow().origins.contains(origin)
    }

    fn window(&self) -> Option<WindowId> {
        self.core.inner.borrow().window
    }
}

fn run_finalizer(request: u64, index: usize, finalizer: Finalizer) {
    if let Err(e) = finalizer() {
        tracing::warn!(request, finalizer = index, error = %e, "finalizer failed");
    }
}

fn close_weak(core: &Weak<Core>) {
    if let Some(core) = core.upgrade() {
        Request { core }.close();
    }
}

struct CloseOnDrop(Request);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// The match channel currently offered to the service.
struct MatchChannel {
    port: PortGuard,
    inbox: Option<Inbox>,
    origin: String,
}

/// A successful `connect` on the match channel.
struct Connected {
    peer: PeerDescriptor,
    local: usize,
    scheme: String,
    port: Port,
}

enum Event {
    Closed,
    Window(Option<WindowMessage>),
    Match(Option<Message>),
    Exchange(Result<ExchangeRecord, LinkError>),
}

/// State of one `connect` call.
struct Driver {
    request: Request,
    connectors: Vec<Connector>,
    wire: serde_json::Value,
    closed: Fuse<LocalBoxFuture<'static, ()>>,
    matching: Option<MatchChannel>,
}

async fn next_match(matching: &mut Option<MatchChannel>) -> Option<Message> {
    match matching.as_mut().and_then(|m| m.inbox.as_mut()) {
        Some(inbox) => inbox.next().await,
        None => futures::future::pending().await,
    }
}

impl Driver {
    fn new(request: Request, connectors: Vec<Connector>) -> Self {
        let closed = request.closed().boxed_local().fuse();
        Self {
            wire: list_to_wire(&connectors),
            request,
            connectors,
            closed,
            matching: None,
        }
    }

    async fn run(mut self) -> Result<Option<Exchange>, LinkError> {
        let host = Rc::clone(&self.request.core.env.host);
        let window = self.request.window().ok_or(LinkError::RequestClosed)?;
        let mut window_inbox = host
            .messages(window)
            .ok_or_else(|| HostError::Unavailable("window messages already taken".to_owned()))?;

        let Some(target) = self.target().await? else {
            return Ok(None);
        };
        tracing::debug!(request = self.request.id(), %target, "navigating");
        host.navigate(window, &target)?;

        let Some(connected) = self.handshake(&mut window_inbox).await? else {
            return Ok(None);
        };
        self.exchange(connected, &mut window_inbox).await.map(Some)
    }

    /// Resolve the service URL, authorizing its origins.
    async fn target(&mut self) -> Result<Option<String>, LinkError> {
        let config = &self.request.core.config;
        if let Some(url) = &config.url {
            self.request.authorize(origin_of(url).map(str::to_owned));
            return Ok(Some(url.clone()));
        }
        match &config.launcher {
            Some(Launcher::Url(url)) => Ok(Some(url.clone())),
            Some(Launcher::Discover { resolver, identifier }) => {
                let mut lookup = resolver.resolve(identifier).fuse();
                let resolution = select_biased! {
                    () = &mut self.closed => return Ok(None),
                    resolution = lookup => resolution?,
                };
                if resolution.origins.is_empty() {
                    self.request
                        .authorize(origin_of(&resolution.url).map(str::to_owned));
                } else {
                    self.request.authorize(resolution.origins.iter().cloned());
                }
                Ok(Some(resolution.url))
            }
            None => Err(LinkError::NoServiceConfigured),
        }
    }

    async fn handshake(&mut self, window_inbox: &mut WindowInbox) -> Result<Option<Connected>, LinkError> {
        loop {
            let event = {
                let mut from_match = pin!(next_match(&mut self.matching).fuse());
                select_biased! {
                    () = &mut self.closed => Event::Closed,
                    message = window_inbox.next() => Event::Window(message),
                    message = from_match => Event::Match(message),
                }
            };
            match event {
                Event::Closed | Event::Exchange(_) => return Ok(None),
                Event::Window(None) => {
                    tracing::debug!("window message stream ended");
                    self.request.close();
                    return Ok(None);
                }
                Event::Window(Some(message)) => self.on_window(message),
                Event::Match(None) => self.drop_match_inbox(),
                Event::Match(Some(message)) => {
                    if let Some(connected) = self.on_match(message)? {
                        return Ok(Some(connected));
                    }
                }
            }
        }
    }

    async fn exchange(&mut self, connected: Connected, window_inbox: &mut WindowInbox) -> Result<Exchange, LinkError> {
        let Connected {
            peer,
            local,
            scheme,
            port,
        } = connected;
        let connector = self.connectors.swap_remove(local);
        let role = connector.role;
        let closed = self.request.closed();
        let running = match (role, connector.handler) {
            (Role::Offering, Some(Handler::Produce(producer))) => perform_offer(port, producer, closed).boxed_local(),
            (Role::Accepting, handler) => {
                let consumer = match handler {
                    Some(Handler::Consume(consumer)) => Some(consumer),
                    _ => None,
                };
                perform_accept(port, consumer, scheme.clone(), peer.origin.clone(), closed).boxed_local()
            }
            (Role::Offering, _) => {
                port.close();
                return Err(ValidationError::MissingProducer { index: local }.into());
            }
        };
        tracing::debug!(request = self.request.id(), %role, %scheme, origin = %peer.origin, "connected");

        let mut running = running.fuse();
        let record = loop {
            let event = {
                let mut from_match = pin!(next_match(&mut self.matching).fuse());
                select_biased! {
                    record = running => Event::Exchange(record),
                    message = window_inbox.next() => Event::Window(message),
                    message = from_match => Event::Match(message),
                }
            };
            match event {
                Event::Exchange(record) => break record?,
                Event::Window(Some(message)) => self.on_window(message),
                Event::Match(Some(message)) => {
                    self.on_match(message)?;
                }
                Event::Match(None) => self.drop_match_inbox(),
                // The exchange observes closure itself and returns what it has.
                Event::Window(None) | Event::Closed => {}
            }
        };
        Ok(Exchange {
            role,
            scheme,
            peer,
            offers: record.offers,
            results: record.results,
        })
    }

    fn drop_match_inbox(&mut self) {
        if let Some(matching) = self.matching.as_mut() {
            matching.inbox = None;
        }
    }

    fn on_window(&mut self, message: WindowMessage) {
        if !self.request.trusts(&message.origin) {
            tracing::warn!(origin = %message.origin, "discarded message from unauthorized origin");
            return;
        }
        let envelope = match Envelope::open(&message.data, TO_CLIENT) {
            None => return,
            Some(Ok(envelope)) => envelope,
            Some(Err(e)) => {
                tracing::debug!(error = %e, "ignored malformed window envelope");
                return;
            }
        };
        match envelope {
            Envelope::Close => self.request.close(),
            Envelope::Origins { origins } => match string_list(&origins) {
                Some(origins) => self.request.replace_origins(origins),
                None => tracing::debug!("ignored origins envelope without a list"),
            },
            Envelope::Listen if self.request.state() == RequestState::Connected => {
                message.source.post(Envelope::Expired.message(TO_SERVICE));
            }
            Envelope::Listen => self.listen(message.origin, &message.source),
            other => tracing::debug!(?other, "ignored window envelope"),
        }
    }

    /// Answer `listen` with a fresh match channel, invalidating the
    /// previous one.
    fn listen(&mut self, origin: String, source: &Port) {
        let config = &self.request.core.config;
        let launch = self.request.is_own_origin(&origin).then(|| LaunchInfo {
            client_name: config.client_name.clone(),
            service: config.url.clone(),
        });
        let (ours, theirs) = channel();
        let request = Envelope::Request {
            connector_list: self.wire.clone(),
            lang: config.lang.clone(),
            launch,
        };
        source.post(request.message_with(TO_SERVICE, vec![Transferable::Port(theirs)]));
        let inbox = ours.take_inbox();
        let previous = self.matching.replace(MatchChannel {
            port: PortGuard(ours),
            inbox,
            origin,
        });
        if let Some(previous) = previous {
            tracing::debug!("match channel invalidated");
            previous.port.0.post(Envelope::Invalidated.message(CHANNEL));
        }
    }

    fn on_match(&mut self, message: Message) -> Result<Option<Connected>, LinkError> {
        let envelope = match Envelope::open(&message.data, CHANNEL) {
            None => return Ok(None),
            Some(parsed) => parsed.map_err(|_| LinkError::InvalidMatchMessage)?,
        };
        match envelope {
            Envelope::Close => {
                self.request.close();
                Ok(None)
            }
            Envelope::Origins { origins } => {
                let origins = string_list(&origins).ok_or(LinkError::InvalidMatchMessage)?;
                self.request.replace_origins(origins);
                Ok(None)
            }
            Envelope::Connect { connector_list } => {
                if self.request.state() == RequestState::Connected {
                    return Err(LinkError::AlreadyConnected);
                }
                let peer = validate_peer(&connector_list)?;
                let port = message.into_single_port().ok_or(LinkError::InvalidConnectMessage)?;
                self.request.set_state(RequestState::Connected);
                let matched = match match_connectors(&self.connectors, &peer) {
                    Ok(matched) => matched,
                    Err(e) => {
                        port.close();
                        return Err(e);
                    }
                };
                let origin = self
                    .matching
                    .as_ref()
                    .map(|m| m.origin.clone())
                    .unwrap_or_default();
                Ok(Some(Connected {
                    peer: PeerDescriptor {
                        origin,
                        connectors: peer,
                        matched: matched.peer,
                    },
                    local: matched.local,
                    scheme: matched.scheme,
                    port,
                }))
            }
            _ => Err(LinkError::InvalidMatchMessage),
        }
    }
}
