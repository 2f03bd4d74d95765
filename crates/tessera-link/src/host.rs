//! Seams to the environment a request runs in.
//!
//! The protocol drives the popup or frame through [`ModalHost`], sleeps
//! through [`Timer`] and spawns background tasks on a
//! [`LocalSpawn`] executor. Browser bindings implement these traits;
//! [`crate::memory`] provides in-process fakes.

use std::rc::Rc;
use std::time::Duration;

use futures::channel::mpsc::UnboundedReceiver;
use futures::future::LocalBoxFuture;
use futures::task::LocalSpawn;
use serde_json::Value;

use crate::channel::{Port, Transferable};
use crate::error::HostError;

/// Handle to a window opened by a [`ModalHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub u64);

/// A cross-document message received from a hosted window.
#[derive(Debug, Clone)]
pub struct WindowMessage {
    /// The sender's origin as reported by the host.
    pub origin: String,
    /// Structured data.
    pub data: Value,
    /// Handles moved with the message.
    pub transfer: Vec<Transferable>,
    /// Where replies to the sender go.
    pub source: Port,
}

/// Messages arriving from a hosted window.
pub type WindowInbox = UnboundedReceiver<WindowMessage>;

/// The popup or frame that shows the service page.
pub trait ModalHost {
    /// Open an empty window.
    ///
    /// # Errors
    ///
    /// [`HostError::Blocked`] when the window is refused.
    fn open(&self) -> Result<WindowId, HostError>;

    /// Point `window` at `url`.
    ///
    /// # Errors
    ///
    /// [`HostError`] when the host cannot navigate.
    fn navigate(&self, window: WindowId, url: &str) -> Result<(), HostError>;

    /// Close `window`. Closing twice is harmless.
    fn close(&self, window: WindowId);

    /// Whether `window` has gone away, by any means.
    fn is_closed(&self, window: WindowId) -> bool;

    /// Messages posted by `window`. Only the first call gets the inbox.
    fn messages(&self, window: WindowId) -> Option<WindowInbox>;

    /// Insert the sandboxed proxy element.
    fn insert_proxy(&self) {}

    /// Remove the sandboxed proxy element.
    fn remove_proxy(&self) {}

    /// Show the modal overlay.
    fn show_overlay(&self) {}

    /// Hide the modal overlay.
    fn hide_overlay(&self) {}

    /// Resolves when the page unloads, if the host can tell.
    fn unload(&self) -> Option<LocalBoxFuture<'static, ()>> {
        None
    }
}

/// Asynchronous sleep.
pub trait Timer {
    /// Resolves after `duration`.
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;
}

/// Browser timer backed by `setTimeout`.
#[cfg(target_arch = "wasm32")]
#[derive(Debug, Clone, Copy, Default)]
pub struct GlooTimer;

#[cfg(target_arch = "wasm32")]
impl Timer for GlooTimer {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        use futures::FutureExt;
        gloo_timers::future::sleep(duration).boxed_local()
    }
}

/// Everything a request needs from the outside world.
#[derive(Clone)]
pub struct Environment {
    /// Modal window host.
    pub host: Rc<dyn ModalHost>,
    /// Timer for window polling.
    pub timer: Rc<dyn Timer>,
    /// Executor for background tasks.
    pub spawner: Rc<dyn LocalSpawn>,
}

impl Environment {
    /// Bundle the three seams.
    pub fn new(
        host: Rc<dyn ModalHost>,
        timer: Rc<dyn Timer>,
        spawner: Rc<dyn LocalSpawn>,
    ) -> Self {
        Self {
            host,
            timer,
            spawner,
        }
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment").finish_non_exhaustive()
    }
}
