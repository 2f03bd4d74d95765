//! In-process implementations of the environment seams.
//!
//! [`MemoryHost`] keeps windows as message queues and records what the
//! protocol asked of it; [`ServiceEndpoint`] is the service page's view
//! of the client window; [`ManualTimer`] sleeps until told otherwise.
//! Together they run a whole negotiation on one `LocalPool`.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::time::Duration;

use futures::channel::mpsc::{UnboundedSender, unbounded};
use futures::channel::oneshot;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::channel::{Inbox, Message, Port, Transferable, channel};
use crate::error::HostError;
use crate::host::{ModalHost, Timer, WindowId, WindowInbox, WindowMessage};
use crate::service::ClientWindow;

/// Something the protocol did to a [`MemoryHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// Proxy element inserted.
    ProxyInserted,
    /// Proxy element removed.
    ProxyRemoved,
    /// Overlay shown.
    OverlayShown,
    /// Overlay hidden.
    OverlayHidden,
    /// Window opened.
    Opened(WindowId),
    /// Window pointed at a URL.
    Navigated(WindowId, String),
    /// Window closed by the protocol.
    Closed(WindowId),
}

struct Window {
    sender: UnboundedSender<WindowMessage>,
    inbox: Option<WindowInbox>,
    closed: bool,
}

/// A [`ModalHost`] whose windows are in-process queues.
pub struct MemoryHost {
    origin: String,
    next_id: Cell<u64>,
    windows: RefCell<HashMap<WindowId, Window>>,
    events: RefCell<Vec<HostEvent>>,
    blocked: Cell<bool>,
    unload: RefCell<Vec<oneshot::Sender<()>>>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new("https://client.test")
    }
}

impl MemoryHost {
    /// A host for a client page served from `origin`.
    #[must_use]
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            next_id: Cell::new(1),
            windows: RefCell::default(),
            events: RefCell::default(),
            blocked: Cell::new(false),
            unload: RefCell::default(),
        }
    }

    /// Refuse to open windows from now on.
    pub fn block(&self) {
        self.blocked.set(true);
    }

    /// Everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<HostEvent> {
        self.events.borrow().clone()
    }

    /// The most recently opened window.
    #[must_use]
    pub fn last_window(&self) -> Option<WindowId> {
        self.windows.borrow().keys().max_by_key(|id| id.0).copied()
    }

    /// The URL `window` was last navigated to.
    #[must_use]
    pub fn location(&self, window: WindowId) -> Option<String> {
        self.events.borrow().iter().rev().find_map(|event| match event {
            HostEvent::Navigated(id, url) if *id == window => Some(url.clone()),
            _ => None,
        })
    }

    /// The page inside `window`, posting as `origin`.
    #[must_use]
    pub fn endpoint(&self, window: WindowId, origin: impl Into<String>) -> Option<ServiceEndpoint> {
        let sender = self.windows.borrow().get(&window)?.sender.clone();
        let (port, reply_to) = channel();
        let inbox = port.take_inbox();
        Some(ServiceEndpoint {
            origin: origin.into(),
            client_origin: self.origin.clone(),
            window: sender,
            reply_to,
            inbox: RefCell::new(inbox),
        })
    }

    /// Close `window` behind the protocol's back, as a user would.
    pub fn close_externally(&self, window: WindowId) {
        if let Some(w) = self.windows.borrow_mut().get_mut(&window) {
            w.closed = true;
        }
    }

    /// Fire the page-unload notification.
    pub fn unload_page(&self) {
        for tx in self.unload.borrow_mut().drain(..) {
            tx.send(()).ok();
        }
    }

    fn record(&self, event: HostEvent) {
        tracing::trace!(?event, "host");
        self.events.borrow_mut().push(event);
    }
}

impl ModalHost for MemoryHost {
    fn open(&self) -> Result<WindowId, HostError> {
        if self.blocked.get() {
            return Err(HostError::Blocked);
        }
        let id = WindowId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        let (sender, inbox) = unbounded();
        self.windows.borrow_mut().insert(
            id,
            Window {
                sender,
                inbox: Some(inbox),
                closed: false,
            },
        );
        self.record(HostEvent::Opened(id));
        Ok(id)
    }

    fn navigate(&self, window: WindowId, url: &str) -> Result<(), HostError> {
        if self.is_closed(window) {
            return Err(HostError::Unavailable(format!("window {} is closed", window.0)));
        }
        self.record(HostEvent::Navigated(window, url.to_owned()));
        Ok(())
    }

    fn close(&self, window: WindowId) {
        if let Some(w) = self.windows.borrow_mut().get_mut(&window) {
            w.closed = true;
            w.sender.close_channel();
        }
        self.record(HostEvent::Closed(window));
    }

    fn is_closed(&self, window: WindowId) -> bool {
        self.windows.borrow().get(&window).is_none_or(|w| w.closed)
    }

    fn messages(&self, window: WindowId) -> Option<WindowInbox> {
        self.windows.borrow_mut().get_mut(&window)?.inbox.take()
    }

    fn insert_proxy(&self) {
        self.record(HostEvent::ProxyInserted);
    }

    fn remove_proxy(&self) {
        self.record(HostEvent::ProxyRemoved);
    }

    fn show_overlay(&self) {
        self.record(HostEvent::OverlayShown);
    }

    fn hide_overlay(&self) {
        self.record(HostEvent::OverlayHidden);
    }

    fn unload(&self) -> Option<LocalBoxFuture<'static, ()>> {
        let (tx, rx) = oneshot::channel();
        self.unload.borrow_mut().push(tx);
        Some(
            async move {
                // A dropped host never unloads.
                if rx.await.is_err() {
                    futures::future::pending::<()>().await;
                }
            }
            .boxed_local(),
        )
    }
}

/// The service page's handle on the client window that opened it.
pub struct ServiceEndpoint {
    origin: String,
    client_origin: String,
    window: UnboundedSender<WindowMessage>,
    reply_to: Port,
    inbox: RefCell<Option<Inbox>>,
}

impl ServiceEndpoint {
    /// Post `data` to the client window.
    pub fn post(&self, data: Value) {
        self.post_with(data, Vec::new());
    }

    /// Post `data` with transferables to the client window.
    pub fn post_with(&self, data: Value, transfer: Vec<Transferable>) {
        let message = WindowMessage {
            origin: self.origin.clone(),
            data,
            transfer,
            source: self.reply_to.clone(),
        };
        if self.window.unbounded_send(message).is_err() {
            tracing::trace!("client window gone");
        }
    }

    /// Replies received so far, without waiting.
    #[must_use]
    pub fn drain(&self) -> Vec<Message> {
        let mut out = Vec::new();
        if let Some(inbox) = self.inbox.borrow_mut().as_mut() {
            while let Ok(message) = inbox.try_recv() {
                out.push(message);
            }
        }
        out
    }
}

impl ClientWindow for ServiceEndpoint {
    fn send(&self, message: Message) {
        self.post_with(message.data, message.transfer);
    }

    fn replies(&self) -> Option<Inbox> {
        self.inbox.borrow_mut().take()
    }

    fn client_origin(&self) -> &str {
        &self.client_origin
    }
}

/// A [`Timer`] whose sleeps end only when [`ManualTimer::fire`] is called.
#[derive(Default)]
pub struct ManualTimer {
    sleepers: RefCell<Vec<(Duration, oneshot::Sender<()>)>>,
}

impl ManualTimer {
    /// Wake every pending sleep.
    pub fn fire(&self) {
        for (_, tx) in self.sleepers.borrow_mut().drain(..) {
            tx.send(()).ok();
        }
    }

    /// Durations of the sleeps still waiting.
    #[must_use]
    pub fn pending(&self) -> Vec<Duration> {
        self.sleepers
            .borrow()
            .iter()
            .filter(|(_, tx)| !tx.is_canceled())
            .map(|(d, _)| *d)
            .collect()
    }
}

impl Timer for ManualTimer {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        let (tx, rx) = oneshot::channel();
        self.sleepers.borrow_mut().push((duration, tx));
        rx.map(|_| ()).boxed_local()
    }
}
