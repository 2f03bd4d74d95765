//! Client configuration and the convenience entry points built on it.

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{LocalBoxFuture, ready};

use crate::connector::{ConnectorSpec, Consumer, Producer};
use crate::discovery::NameResolver;
use crate::error::LinkError;
use crate::host::Environment;
use crate::request::{Exchange, Request};

/// How to find the service page when no URL is configured.
#[derive(Clone)]
pub enum Launcher {
    /// Navigate straight to this URL. Its origin is not authorized
    /// automatically.
    Url(String),
    /// Resolve `identifier` first.
    Discover {
        /// The lookup service.
        resolver: Rc<dyn NameResolver>,
        /// A human identifier such as a domain.
        identifier: String,
    },
}

impl fmt::Debug for Launcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => f.debug_tuple("Url").field(url).finish(),
            Self::Discover { identifier, .. } => f
                .debug_struct("Discover")
                .field("identifier", identifier)
                .finish_non_exhaustive(),
        }
    }
}

/// Immutable client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Name shown to trusted services.
    pub client_name: Option<String>,
    /// Service page URL. Takes precedence over `launcher`.
    pub url: Option<String>,
    /// Fallback when `url` is unset.
    pub launcher: Option<Launcher>,
    /// Origins authorized from the start.
    pub origins: Vec<String>,
    /// The client page's own origin; always trusted.
    pub own_origin: Option<String>,
    /// Preferred language sent with the request.
    pub lang: Option<String>,
    /// How often the modal window is checked for closure.
    pub poll_interval: Duration,
}

impl ClientConfig {
    /// Default window polling interval.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// A copy with every `Some` field of `overrides` applied.
    #[must_use]
    pub fn derive(&self, overrides: ClientOverrides) -> Self {
        Self {
            client_name: overrides.client_name.or_else(|| self.client_name.clone()),
            url: overrides.url.or_else(|| self.url.clone()),
            launcher: overrides.launcher.or_else(|| self.launcher.clone()),
            origins: overrides.origins.unwrap_or_else(|| self.origins.clone()),
            own_origin: overrides.own_origin.or_else(|| self.own_origin.clone()),
            lang: overrides.lang.or_else(|| self.lang.clone()),
            poll_interval: overrides.poll_interval.unwrap_or(self.poll_interval),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_name: None,
            url: None,
            launcher: None,
            origins: Vec::new(),
            own_origin: None,
            lang: None,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Field-by-field overrides for [`ClientConfig::derive`].
#[derive(Debug, Clone, Default)]
pub struct ClientOverrides {
    /// See [`ClientConfig::client_name`].
    pub client_name: Option<String>,
    /// See [`ClientConfig::url`].
    pub url: Option<String>,
    /// See [`ClientConfig::launcher`].
    pub launcher: Option<Launcher>,
    /// See [`ClientConfig::origins`].
    pub origins: Option<Vec<String>>,
    /// See [`ClientConfig::own_origin`].
    pub own_origin: Option<String>,
    /// See [`ClientConfig::lang`].
    pub lang: Option<String>,
    /// See [`ClientConfig::poll_interval`].
    pub poll_interval: Option<Duration>,
}

/// Creates requests from one configuration and environment.
#[derive(Debug, Clone)]
pub struct Client {
    config: ClientConfig,
    env: Environment,
}

impl Client {
    /// A client for `config` running in `env`.
    #[must_use]
    pub const fn new(config: ClientConfig, env: Environment) -> Self {
        Self { config, env }
    }

    /// A client sharing this environment with a derived configuration.
    #[must_use]
    pub fn with(&self, overrides: ClientOverrides) -> Self {
        Self {
            config: self.config.derive(overrides),
            env: self.env.clone(),
        }
    }

    /// The configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// A fresh, unopened request.
    #[must_use]
    pub fn request(&self) -> Request {
        Request::new(self.config.clone(), self.env.clone())
    }

    /// Open a request and accept one of `schemes`.
    ///
    /// Without a consumer the offer is acknowledged with an empty result.
    pub fn accept<S: Into<String>>(
        &self,
        schemes: impl IntoIterator<Item = S>,
        consumer: Option<Consumer>,
    ) -> LocalBoxFuture<'static, Result<Option<Exchange>, LinkError>> {
        let mut spec = ConnectorSpec::accept(schemes);
        if let Some(consumer) = consumer {
            spec = spec.consuming(consumer);
        }
        self.run(spec)
    }

    /// Open a request and offer one of `schemes`.
    pub fn offer<S: Into<String>>(
        &self,
        schemes: impl IntoIterator<Item = S>,
        producer: Producer,
    ) -> LocalBoxFuture<'static, Result<Option<Exchange>, LinkError>> {
        self.run(ConnectorSpec::offer(schemes).producing(producer))
    }

    fn run(&self, spec: ConnectorSpec) -> LocalBoxFuture<'static, Result<Option<Exchange>, LinkError>> {
        let request = self.request();
        if let Err(e) = request.open() {
            return ready(Err(e)).boxed_local();
        }
        request.connect([spec])
    }
}
