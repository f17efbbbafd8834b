//! Builder for [`crate::SandboxClient`] construction options, and the
//! credential/endpoint resolution order from `spec.md` §4.5. No env-file or
//! environment-variable loading — out of scope per `spec.md` §1 — the
//! `CredentialStore` capability injection point covers persistence instead,
//! the way the teacher's `UplinkConfig`/`ReceiverConfig` are built
//! explicitly by their `main.rs` rather than read implicitly from the
//! environment inside library code.

use crate::credentials::{CredentialStore, Slot};
use sbx_wire::ProtocolMode;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Construction options for [`crate::SandboxClient`].
#[derive(Clone)]
pub struct SandboxClientConfig {
    pub(crate) sandbox_url: Option<String>,
    pub(crate) session_token: Option<String>,
    /// The URL of the page/request this SDK is being constructed from, used
    /// only to recover `sandbox_url`/`session_token` from its query string
    /// (the Rust-native stand-in for "running in a document context" in
    /// `spec.md` §4.5 step 1-2 — there is no implicit global document here).
    pub(crate) page_url: Option<Url>,
    pub(crate) credential_store: Option<Arc<dyn CredentialStore>>,
    pub(crate) protocol: ProtocolMode,
    pub(crate) request_timeout: Duration,
    pub(crate) reconnect_delay: Duration,
    pub(crate) reconnect_delay_max: Duration,
    pub(crate) reconnect_max_attempts: u32,
    pub(crate) auto_reconnect: bool,
    pub(crate) ping_interval: Duration,
    /// Second-level domain substituted into port-preview URLs
    /// (`spec.md` §4.5, S5): `<first-label>-<port>.<preview_base>`.
    pub(crate) preview_base: Option<String>,
}

impl Default for SandboxClientConfig {
    fn default() -> Self {
        SandboxClientConfig {
            sandbox_url: None,
            session_token: None,
            page_url: None,
            credential_store: None,
            protocol: ProtocolMode::Binary,
            request_timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_max_attempts: 0,
            auto_reconnect: true,
            ping_interval: Duration::from_secs(20),
            preview_base: None,
        }
    }
}

impl SandboxClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sandbox_url(mut self, url: impl Into<String>) -> Self {
        self.sandbox_url = Some(url.into());
        self
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn with_page_url(mut self, page_url: Url) -> Self {
        self.page_url = Some(page_url);
        self
    }

    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credential_store = Some(store);
        self
    }

    pub fn with_protocol(mut self, protocol: ProtocolMode) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_reconnect_max_attempts(mut self, max: u32) -> Self {
        self.reconnect_max_attempts = max;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_preview_base(mut self, preview_base: impl Into<String>) -> Self {
        self.preview_base = Some(preview_base.into());
        self
    }
}

/// Names of the two query parameters `spec.md` §4.5 resolves credentials
/// and endpoint from.
pub(crate) const SANDBOX_URL_QUERY_PARAM: &str = "sandbox_url";
pub(crate) const SESSION_TOKEN_QUERY_PARAM: &str = "session_token";

/// The outcome of resolving `sandbox_url`/`session_token` per the priority
/// order explicit config -> page URL query parameter -> persisted store,
/// persisting and noting removal of anything discovered via the query
/// string (`spec.md` §4.5, testable property #7).
pub(crate) struct ResolvedEndpoint {
    pub(crate) sandbox_url: String,
    pub(crate) session_token: Option<String>,
}

pub(crate) fn resolve_endpoint(
    config: &SandboxClientConfig,
    store: &dyn CredentialStore,
) -> Option<ResolvedEndpoint> {
    let sandbox_url = resolve_slot(
        config.sandbox_url.as_deref(),
        config.page_url.as_ref(),
        SANDBOX_URL_QUERY_PARAM,
        Slot::SandboxUrl,
        store,
    )?;
    let session_token = resolve_slot(
        config.session_token.as_deref(),
        config.page_url.as_ref(),
        SESSION_TOKEN_QUERY_PARAM,
        Slot::SessionToken,
        store,
    );

    Some(ResolvedEndpoint {
        sandbox_url: sandbox_url.trim_end_matches('/').to_owned(),
        session_token,
    })
}

fn resolve_slot(
    explicit: Option<&str>,
    page_url: Option<&Url>,
    query_param: &str,
    slot: Slot,
    store: &dyn CredentialStore,
) -> Option<String> {
    if let Some(value) = explicit {
        return Some(value.to_owned());
    }
    if let Some(page_url) = page_url {
        if let Some((_, value)) = page_url.query_pairs().find(|(k, _)| k == query_param) {
            let value = value.into_owned();
            store.set(slot, Some(value.clone()));
            return Some(value);
        }
    }
    store.get(slot)
}

/// Strip the query parameters `spec.md` §4.5 says are removed from the
/// visible URL once discovered (testable property #7).
pub fn strip_discovered_query_params(page_url: &Url) -> Url {
    let mut stripped = page_url.clone();
    let remaining: Vec<(String, String)> = page_url
        .query_pairs()
        .filter(|(k, _)| k != SANDBOX_URL_QUERY_PARAM && k != SESSION_TOKEN_QUERY_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if remaining.is_empty() {
        stripped.set_query(None);
    } else {
        let pairs: Vec<String> = remaining
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        stripped.set_query(Some(&pairs.join("&")));
    }
    stripped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::InMemoryCredentialStore;

    #[test]
    fn explicit_config_wins_over_query_and_store() {
        let store = InMemoryCredentialStore::new();
        store.set(Slot::SandboxUrl, Some("https://stored.example.com".to_owned()));
        let config = SandboxClientConfig::new()
            .with_sandbox_url("https://explicit.example.com")
            .with_page_url(Url::parse("https://app.example.com/?sandbox_url=https://query.example.com").unwrap());

        let resolved = resolve_endpoint(&config, &store).unwrap();
        assert_eq!(resolved.sandbox_url, "https://explicit.example.com");
    }

    #[test]
    fn query_param_wins_over_store_and_gets_persisted() {
        let store = InMemoryCredentialStore::new();
        store.set(Slot::SandboxUrl, Some("https://stored.example.com".to_owned()));
        let config = SandboxClientConfig::new().with_page_url(
            Url::parse("https://app.example.com/?sandbox_url=https://query.example.com").unwrap(),
        );

        let resolved = resolve_endpoint(&config, &store).unwrap();
        assert_eq!(resolved.sandbox_url, "https://query.example.com");
        assert_eq!(
            store.get(Slot::SandboxUrl),
            Some("https://query.example.com".to_owned())
        );
    }

    #[test]
    fn falls_back_to_persisted_store_when_nothing_else_resolves() {
        let store = InMemoryCredentialStore::new();
        store.set(Slot::SandboxUrl, Some("https://stored.example.com".to_owned()));
        let config = SandboxClientConfig::new();

        let resolved = resolve_endpoint(&config, &store).unwrap();
        assert_eq!(resolved.sandbox_url, "https://stored.example.com");
    }

    #[test]
    fn none_resolved_anywhere_is_none() {
        let store = InMemoryCredentialStore::new();
        let config = SandboxClientConfig::new();
        assert!(resolve_endpoint(&config, &store).is_none());
    }

    #[test]
    fn strip_discovered_query_params_removes_only_the_two_named_slots() {
        let url = Url::parse(
            "https://app.example.com/path?sandbox_url=https://x.example.com&session_token=abc&other=1",
        )
        .unwrap();
        let stripped = strip_discovered_query_params(&url);
        assert_eq!(stripped.as_str(), "https://app.example.com/path?other=1");
    }

    #[test]
    fn trailing_slash_is_stripped_from_an_explicit_sandbox_url() {
        let store = InMemoryCredentialStore::new();
        let config = SandboxClientConfig::new().with_sandbox_url("https://explicit.example.com/");
        let resolved = resolve_endpoint(&config, &store).unwrap();
        assert_eq!(resolved.sandbox_url, "https://explicit.example.com");
    }
}
