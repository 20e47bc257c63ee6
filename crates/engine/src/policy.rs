//! Policy Registry: which strategy and namespace apply to a request.
//!
//! Rules are evaluated in a fixed order and the first match wins:
//!
//! 0. Pre-warmed app shell resources (non-navigation) → cache-first from the precache
//! 1. Static-asset hosts (fonts, CDN, map tiles) → cache-first
//! 2. API origin, POST/PUT/PATCH/DELETE → network-only, queued on transport failure
//! 3. API origin, GET → network-first
//! 4. `destination == image` → stale-while-revalidate
//! 5. Navigations → network-first with the offline document as last resort
//! 6. Anything else → no rule; the router passes it through untouched
//!
//! URLs matching a configured bypass pattern skip the rules entirely.

use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use stowaway_core::cache::request_key;
use stowaway_core::{AppConfig, Destination, Error, ExpirationPolicy, Method, NamespaceConfig, Request, Response};
use url::Url;

use crate::fetch::canonicalize;

/// Read/write order of operations for a matched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
    NetworkOnly,
}

/// Namespace suffixes of one lifecycle generation.
pub const NAMESPACE_KINDS: [&str; 5] = ["precache", "static", "api", "images", "pages"];

/// `<version>-<kind>`, e.g. `v2-images`.
pub fn namespace_name(version: &str, kind: &str) -> String {
    format!("{version}-{kind}")
}

/// Whether `name` belongs to the generation of `version`.
pub fn belongs_to_generation(name: &str, version: &str) -> bool {
    name.strip_prefix(version)
        .is_some_and(|rest| rest.starts_with('-'))
}

/// A named cache partition and its policy.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheNamespace {
    pub name: String,
    /// `None` for the precache: entries there live until the generation is purged.
    pub expiration: Option<ExpirationPolicy>,
    pub cacheable_statuses: Vec<u16>,
    /// Request headers that distinguish otherwise identical URLs.
    pub vary_headers: Vec<String>,
    pub network_timeout: Option<Duration>,
}

impl CacheNamespace {
    pub fn new(name: impl Into<String>, expiration: ExpirationPolicy) -> Self {
        Self {
            name: name.into(),
            expiration: Some(expiration),
            cacheable_statuses: vec![200],
            vary_headers: Vec::new(),
            network_timeout: None,
        }
    }

    /// Namespace without expiration.
    pub fn unbounded(name: impl Into<String>) -> Self {
        Self { expiration: None, ..Self::new(name, ExpirationPolicy::new(usize::MAX, Duration::MAX)) }
    }

    pub fn from_config(name: impl Into<String>, cfg: &NamespaceConfig) -> Self {
        Self {
            name: name.into(),
            expiration: Some(ExpirationPolicy::from(cfg)),
            cacheable_statuses: cfg.cacheable_statuses.clone(),
            vary_headers: cfg.vary_headers.clone(),
            network_timeout: cfg.network_timeout_seconds.map(Duration::from_secs),
        }
    }

    pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = Some(timeout);
        self
    }

    pub fn is_cacheable(&self, response: &Response) -> bool {
        self.cacheable_statuses.contains(&response.status)
    }

    pub fn key_for(&self, request: &Request) -> String {
        request_key(request, &self.vary_headers)
    }
}

/// Predicate over method, URL, and destination. Unset fields match anything.
#[derive(Debug, Clone, Default)]
pub struct RequestMatcher {
    hosts: Vec<String>,
    origin: Option<String>,
    urls: Vec<Url>,
    methods: Vec<Method>,
    destination: Option<Destination>,
    navigation: Option<bool>,
}

impl RequestMatcher {
    pub fn any() -> Self {
        Self::default()
    }

    /// Host equals one of `hosts` or is a subdomain of one.
    pub fn hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts = hosts.into_iter().map(|h| h.into().to_ascii_lowercase()).collect();
        self
    }

    pub fn origin(mut self, origin: &Url) -> Self {
        self.origin = Some(origin.origin().ascii_serialization());
        self
    }

    /// Exact URL match, fragment ignored.
    pub fn urls(mut self, urls: Vec<Url>) -> Self {
        self.urls = urls;
        self
    }

    pub fn methods(mut self, methods: &[Method]) -> Self {
        self.methods = methods.to_vec();
        self
    }

    pub fn destination(mut self, destination: Destination) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn navigation(mut self, navigation: bool) -> Self {
        self.navigation = Some(navigation);
        self
    }

    pub fn matches(&self, request: &Request) -> bool {
        if !self.methods.is_empty() && !self.methods.contains(&request.method) {
            return false;
        }

        if !self.hosts.is_empty() {
            let Some(host) = request.url.host_str() else {
                return false;
            };
            let host = host.to_ascii_lowercase();
            let allowed = self
                .hosts
                .iter()
                .any(|h| host == *h || host.strip_suffix(h.as_str()).is_some_and(|p| p.ends_with('.')));
            if !allowed {
                return false;
            }
        }

        if let Some(origin) = &self.origin
            && request.origin() != *origin
        {
            return false;
        }

        if !self.urls.is_empty() {
            let mut url = request.url.clone();
            url.set_fragment(None);
            if !self.urls.contains(&url) {
                return false;
            }
        }

        if let Some(destination) = self.destination
            && request.destination != destination
        {
            return false;
        }

        if let Some(navigation) = self.navigation
            && request.is_navigation() != navigation
        {
            return false;
        }

        true
    }
}

/// Last-resort document for navigations, looked up in a namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineFallback {
    pub namespace: String,
    pub url: Url,
}

/// One entry of the registry.
#[derive(Debug, Clone)]
pub struct PolicyRule {
    pub name: String,
    pub matcher: RequestMatcher,
    pub strategy: StrategyKind,
    /// Always `Some` unless `strategy` is network-only.
    pub namespace: Option<CacheNamespace>,
    /// Queue tag for mutations that fail in transit.
    pub queue_tag: Option<String>,
    pub offline_fallback: Option<OfflineFallback>,
}

impl PolicyRule {
    pub fn cached(
        name: impl Into<String>, matcher: RequestMatcher, strategy: StrategyKind, namespace: CacheNamespace,
    ) -> Self {
        Self { name: name.into(), matcher, strategy, namespace: Some(namespace), queue_tag: None, offline_fallback: None }
    }

    pub fn network_only(name: impl Into<String>, matcher: RequestMatcher) -> Self {
        Self {
            name: name.into(),
            matcher,
            strategy: StrategyKind::NetworkOnly,
            namespace: None,
            queue_tag: None,
            offline_fallback: None,
        }
    }

    pub fn queue_on_failure(mut self, tag: impl Into<String>) -> Self {
        self.queue_tag = Some(tag.into());
        self
    }

    pub fn with_offline_fallback(mut self, fallback: OfflineFallback) -> Self {
        self.offline_fallback = Some(fallback);
        self
    }
}

/// Ordered rule list, loaded once and never mutated.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    rules: Vec<PolicyRule>,
    bypass: Vec<Regex>,
}

impl PolicyRegistry {
    pub fn new(rules: Vec<PolicyRule>) -> Self {
        Self { rules, bypass: Vec::new() }
    }

    /// Requests whose URL matches any of `patterns` are never handled.
    pub fn with_bypass(mut self, patterns: Vec<Regex>) -> Self {
        self.bypass = patterns;
        self
    }

    /// The standard rule set for `config`'s generation.
    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let app_origin = Url::parse(&config.app_origin)?;
        let api_origin = Url::parse(&config.api_origin)?;
        let version = config.version.as_str();

        let precache_ns = namespace_name(version, "precache");
        let precache_urls = config
            .precache_urls
            .iter()
            .map(|u| canonicalize(&app_origin, u).map_err(|e| Error::InvalidUrl(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        let offline_url =
            canonicalize(&app_origin, &config.offline_document).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let bypass = config
            .bypass_patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|e| Error::Config(format!("bypass pattern {p:?}: {e}"))))
            .collect::<Result<Vec<_>, _>>()?;

        let rules = vec![
            PolicyRule::cached(
                "precache",
                RequestMatcher::any()
                    .methods(&[Method::Get])
                    .urls(precache_urls)
                    .navigation(false),
                StrategyKind::CacheFirst,
                CacheNamespace::unbounded(precache_ns.clone()),
            ),
            PolicyRule::cached(
                "static-assets",
                RequestMatcher::any()
                    .methods(&[Method::Get])
                    .hosts(config.static_hosts.iter().cloned()),
                StrategyKind::CacheFirst,
                CacheNamespace::from_config(namespace_name(version, "static"), &config.static_assets),
            ),
            PolicyRule::network_only(
                "api-mutations",
                RequestMatcher::any()
                    .origin(&api_origin)
                    .methods(&[Method::Post, Method::Put, Method::Patch, Method::Delete]),
            )
            .queue_on_failure(config.queue_tag.clone()),
            PolicyRule::cached(
                "api-reads",
                RequestMatcher::any().origin(&api_origin).methods(&[Method::Get]),
                StrategyKind::NetworkFirst,
                CacheNamespace::from_config(namespace_name(version, "api"), &config.api),
            ),
            PolicyRule::cached(
                "images",
                RequestMatcher::any()
                    .methods(&[Method::Get])
                    .destination(Destination::Image),
                StrategyKind::StaleWhileRevalidate,
                CacheNamespace::from_config(namespace_name(version, "images"), &config.images),
            ),
            PolicyRule::cached(
                "pages",
                RequestMatcher::any().methods(&[Method::Get]).navigation(true),
                StrategyKind::NetworkFirst,
                CacheNamespace::from_config(namespace_name(version, "pages"), &config.pages),
            )
            .with_offline_fallback(OfflineFallback { namespace: precache_ns, url: offline_url }),
        ];

        Ok(Self::new(rules).with_bypass(bypass))
    }

    /// First rule matching `request`, or `None` for pass-through.
    pub fn resolve(&self, request: &Request) -> Option<&PolicyRule> {
        if self.bypass.iter().any(|p| p.is_match(request.url.as_str())) {
            tracing::trace!(url = %request.url, "bypass pattern; passing through");
            return None;
        }

        let rule = self.rules.iter().find(|rule| rule.matcher.matches(request));
        match rule {
            Some(rule) => tracing::trace!(rule = %rule.name, url = %request.url, "policy resolved"),
            None => tracing::trace!(url = %request.url, "no policy; passing through"),
        }
        rule
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    /// Every cache namespace some rule writes to.
    pub fn namespaces(&self) -> Vec<&CacheNamespace> {
        let mut seen: Vec<&CacheNamespace> = Vec::new();
        for ns in self.rules.iter().filter_map(|r| r.namespace.as_ref()) {
            if !seen.iter().any(|s| s.name == ns.name) {
                seen.push(ns);
            }
        }
        seen
    }
}
