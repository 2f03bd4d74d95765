//! Resolving a human identifier (a domain) to a service URL.
//!
//! [`HostMetaResolver`] reads the domain's `/.well-known/host-meta.json`
//! through an injected [`Fetch`] transport. Signature checks are
//! optional and plug in through [`NameVerifier`].

use std::rc::Rc;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use serde::Deserialize;
use serde_json::{Map, Value};
use unicode_normalization::UnicodeNormalization;

use crate::error::DiscoveryError;

/// Link relation naming the service page.
pub const SERVICE_REL: &str = "tessera.link/service";

/// Link property listing additional authorized origins, space separated.
pub const ORIGINS_PROPERTY: &str = "tessera.link/origins";

/// Where an identifier leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Service page URL.
    pub url: String,
    /// Origins the service may answer from, if the domain lists any.
    pub origins: Vec<String>,
    /// Whether a [`NameVerifier`] vouched for the domain.
    pub verified: bool,
}

/// Resolves identifiers to service URLs.
pub trait NameResolver {
    /// Look `identifier` up.
    fn resolve(&self, identifier: &str) -> LocalBoxFuture<'static, Result<Resolution, DiscoveryError>>;
}

/// A completed HTTP GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: String,
}

/// HTTP GET transport.
pub trait Fetch {
    /// Fetch `url`.
    fn get(&self, url: &str) -> LocalBoxFuture<'static, Result<FetchResponse, DiscoveryError>>;
}

/// Checks a domain's signed claims.
pub trait NameVerifier {
    /// Whether `properties` (the document's top-level properties) prove
    /// that `domain` is entitled to `resolution`.
    fn verify(&self, domain: &str, properties: &Map<String, Value>, resolution: &Resolution) -> bool;
}

#[derive(Debug, Deserialize)]
struct HostMeta {
    #[serde(default)]
    links: Value,
    #[serde(default)]
    properties: Map<String, Value>,
}

/// Host-meta based [`NameResolver`].
pub struct HostMetaResolver<F> {
    fetch: Rc<F>,
    verifier: Option<Rc<dyn NameVerifier>>,
}

impl<F: Fetch + 'static> HostMetaResolver<F> {
    /// Resolve through `fetch`, without verification.
    pub fn new(fetch: F) -> Self {
        Self {
            fetch: Rc::new(fetch),
            verifier: None,
        }
    }

    /// Consult `verifier` on every successful lookup.
    #[must_use]
    pub fn with_verifier(mut self, verifier: Rc<dyn NameVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }
}

impl<F: Fetch + 'static> NameResolver for HostMetaResolver<F> {
    fn resolve(&self, identifier: &str) -> LocalBoxFuture<'static, Result<Resolution, DiscoveryError>> {
        let domain = normalize_identifier(identifier);
        let fetch = Rc::clone(&self.fetch);
        let verifier = self.verifier.clone();
        async move {
            if domain.is_empty() {
                return Err(DiscoveryError::NoIdentifier);
            }
            let url = format!("https://{domain}/.well-known/host-meta.json");
            tracing::debug!(%url, "looking up service");
            let response = fetch.get(&url).await?;
            if response.status != 200 {
                return Err(DiscoveryError::LookupError(format!("status {}", response.status)));
            }
            let meta: HostMeta =
                serde_json::from_str(&response.body).map_err(|e| DiscoveryError::Malformed(e.to_string()))?;
            let mut resolution = service_link(&domain, &meta.links).ok_or(DiscoveryError::NotFound)?;
            if let Some(verifier) = verifier {
                resolution.verified = verifier.verify(&domain, &meta.properties, &resolution);
            }
            Ok(resolution)
        }
        .boxed_local()
    }
}

/// Trim, lower-case and NFKC-normalize an identifier.
#[must_use]
pub fn normalize_identifier(identifier: &str) -> String {
    identifier.trim().to_lowercase().nfkc().collect()
}

fn service_link(domain: &str, links: &Value) -> Option<Resolution> {
    let link = links.as_array()?.iter().find(|link| {
        link.get("rel").and_then(Value::as_str) == Some(SERVICE_REL)
            && link.get("href").is_some_and(Value::is_string)
    })?;
    let href = link.get("href").and_then(Value::as_str)?;
    let url = if has_scheme(href) {
        href.to_owned()
    } else {
        format!("https://{domain}/{}", href.trim_start_matches('/'))
    };
    let origins = link
        .get("properties")
        .and_then(|p| p.get(ORIGINS_PROPERTY))
        .and_then(Value::as_str)
        .map(|s| s.split_whitespace().map(str::to_owned).collect())
        .unwrap_or_default();
    Some(Resolution {
        url,
        origins,
        verified: false,
    })
}

fn has_scheme(href: &str) -> bool {
    href.split_once(':').is_some_and(|(scheme, _)| {
        !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// The `scheme://host[:port]` prefix of `url`, if it has one.
#[must_use]
pub fn origin_of(url: &str) -> Option<&str> {
    let (scheme, rest) = url.split_once("://")?;
    if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphabetic() || matches!(c, '+' | '.' | '-')) {
        return None;
    }
    let host_len = rest.find('/').unwrap_or(rest.len());
    if host_len == 0 {
        return None;
    }
    Some(&url[..scheme.len() + 3 + host_len])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::RefCell;

    use futures::executor::block_on;
    use futures::future::ready;
    use serde_json::json;

    use super::*;

    struct Canned {
        status: u16,
        body: String,
        requested: RefCell<Vec<String>>,
    }

    impl Canned {
        fn ok(body: &Value) -> Self {
            Self {
                status: 200,
                body: body.to_string(),
                requested: RefCell::default(),
            }
        }
    }

    impl Fetch for Rc<Canned> {
        fn get(&self, url: &str) -> LocalBoxFuture<'static, Result<FetchResponse, DiscoveryError>> {
            self.requested.borrow_mut().push(url.to_owned());
            ready(Ok(FetchResponse {
                status: self.status,
                body: self.body.clone(),
            }))
            .boxed_local()
        }
    }

    struct Always(bool);

    impl NameVerifier for Always {
        fn verify(&self, _: &str, properties: &Map<String, Value>, _: &Resolution) -> bool {
            self.0 && properties.contains_key("sig")
        }
    }

    fn document() -> Value {
        json!({
            "properties": {"sig": "abc"},
            "links": [
                null,
                {"rel": "other", "href": "/nope"},
                {"rel": SERVICE_REL, "href": 7},
                {
                    "rel": SERVICE_REL,
                    "href": "pick/index.html",
                    "properties": {ORIGINS_PROPERTY: "https://a.example https://b.example"}
                },
                {"rel": SERVICE_REL, "href": "https://late.example/"}
            ]
        })
    }

    #[test]
    fn resolves_first_usable_link() {
        let fetch = Rc::new(Canned::ok(&document()));
        let resolver = HostMetaResolver::new(Rc::clone(&fetch));
        let resolution = block_on(resolver.resolve("  Example.COM ")).unwrap();
        assert_eq!(
            fetch.requested.borrow()[0],
            "https://example.com/.well-known/host-meta.json"
        );
        assert_eq!(resolution.url, "https://example.com/pick/index.html");
        assert_eq!(resolution.origins, vec!["https://a.example", "https://b.example"]);
        assert!(!resolution.verified);
    }

    #[test]
    fn verifier_is_consulted() {
        let resolver =
            HostMetaResolver::new(Rc::new(Canned::ok(&document()))).with_verifier(Rc::new(Always(true)));
        assert!(block_on(resolver.resolve("example.com")).unwrap().verified);
    }

    #[test]
    fn empty_identifier_is_rejected() {
        let resolver = HostMetaResolver::new(Rc::new(Canned::ok(&document())));
        assert_eq!(
            block_on(resolver.resolve("   ")).unwrap_err(),
            DiscoveryError::NoIdentifier
        );
    }

    #[test]
    fn failures_map_to_discovery_errors() {
        let missing = Canned {
            status: 404,
            ..Canned::ok(&json!({}))
        };
        let resolver = HostMetaResolver::new(Rc::new(missing));
        assert!(matches!(
            block_on(resolver.resolve("a.example")),
            Err(DiscoveryError::LookupError(_))
        ));

        let garbage = Canned {
            body: "not json".into(),
            ..Canned::ok(&json!({}))
        };
        let resolver = HostMetaResolver::new(Rc::new(garbage));
        assert!(matches!(
            block_on(resolver.resolve("a.example")),
            Err(DiscoveryError::Malformed(_))
        ));

        let resolver = HostMetaResolver::new(Rc::new(Canned::ok(&json!({"links": {}}))));
        assert_eq!(
            block_on(resolver.resolve("a.example")).unwrap_err(),
            DiscoveryError::NotFound
        );
    }

    #[test]
    fn identifiers_are_nfkc_normalized() {
        assert_eq!(normalize_identifier("ｅｘａｍｐｌｅ.com"), "example.com");
    }

    #[test]
    fn origin_extraction() {
        assert_eq!(origin_of("https://svc.example:8443/a/b?c"), Some("https://svc.example:8443"));
        assert_eq!(origin_of("chrome-extension://abc"), Some("chrome-extension://abc"));
        assert_eq!(origin_of("/relative/path"), None);
        assert_eq!(origin_of("https:///nohost"), None);
        assert_eq!(origin_of("1http://x"), None);
    }
}
