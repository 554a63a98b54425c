//! Session acquisition and release.
//!
//! A lease wraps one remote browser session with an attached page. Release
//! must run exactly once per acquire on every exit path; the remote session
//! is billed until it does.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use inboxshot_core_types::{Engine, PipelineError, Provider};

use crate::page::{CdpPage, PageDriver};
use crate::state_cache::{SessionState, SessionStateCache};
use crate::transport::{CdpTransport, CommandTarget};

/// Source of cached login state; implemented by [`SessionStateCache`] and by
/// test stubs.
#[async_trait]
pub trait StateSource: Send + Sync {
    async fn fetch(&self, provider: Provider, engine: Engine) -> Option<SessionState>;
}

#[async_trait]
impl StateSource for SessionStateCache {
    async fn fetch(&self, provider: Provider, engine: Engine) -> Option<SessionState> {
        SessionStateCache::fetch(self, provider, engine).await
    }
}

/// Cleanup half of a lease.
#[async_trait]
pub trait LeaseCloser: Send + Sync {
    async fn close(&self);
}

/// An acquired remote session with one open page.
pub struct SessionLease {
    page: Arc<dyn PageDriver>,
    provider: Provider,
    engine: Engine,
    closer: Option<Arc<dyn LeaseCloser>>,
}

impl SessionLease {
    pub fn new(
        page: Arc<dyn PageDriver>,
        provider: Provider,
        engine: Engine,
        closer: Arc<dyn LeaseCloser>,
    ) -> Self {
        Self {
            page,
            provider,
            engine,
            closer: Some(closer),
        }
    }

    pub fn page(&self) -> Arc<dyn PageDriver> {
        Arc::clone(&self.page)
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    /// Free the remote session. Consuming the lease makes a second release
    /// unrepresentable.
    pub async fn release(mut self) {
        if let Some(closer) = self.closer.take() {
            closer.close().await;
            debug!(target: "session-broker", provider = %self.provider, engine = %self.engine,
                   "session released");
        }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if self.closer.is_some() {
            // The remote session will idle out on the vendor side, but that
            // window is billed.
            warn!(target: "session-broker", provider = %self.provider, engine = %self.engine,
                  "session lease dropped without release");
        }
    }
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn acquire(
        &self,
        provider: Provider,
        engine: Engine,
    ) -> Result<SessionLease, PipelineError>;
}

#[async_trait]
impl<P> SessionProvider for Arc<P>
where
    P: SessionProvider + ?Sized,
{
    async fn acquire(
        &self,
        provider: Provider,
        engine: Engine,
    ) -> Result<SessionLease, PipelineError> {
        (**self).acquire(provider, engine).await
    }
}

pub type TransportFactory = Arc<
    dyn Fn(Provider, Engine) -> BoxFuture<'static, Result<Arc<dyn CdpTransport>, PipelineError>>
        + Send
        + Sync,
>;

#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Vendor websocket endpoint; provider and engine are appended as query
    /// parameters so the vendor provisions the matching browser build.
    pub ws_url: String,
    pub command_deadline: std::time::Duration,
    pub keepalive: std::time::Duration,
}

impl BrokerConfig {
    pub fn ws_url_for(&self, provider: Provider, engine: Engine) -> String {
        let sep = if self.ws_url.contains('?') { '&' } else { '?' };
        format!("{}{}provider={}&engine={}", self.ws_url, sep, provider, engine)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            ws_url: String::new(),
            command_deadline: std::time::Duration::from_secs(30),
            keepalive: std::time::Duration::from_secs(15),
        }
    }
}

pub struct SessionBroker {
    factory: TransportFactory,
    state_source: Option<Arc<dyn StateSource>>,
}

impl SessionBroker {
    pub fn new(cfg: BrokerConfig, state_source: Option<Arc<dyn StateSource>>) -> Self {
        let factory: TransportFactory = Arc::new(move |provider, engine| {
            let cfg = cfg.clone();
            Box::pin(async move {
                let url = cfg.ws_url_for(provider, engine);
                let transport =
                    crate::transport::RemoteTransport::connect(&url, cfg.command_deadline, cfg.keepalive)
                        .await?;
                Ok(Arc::new(transport) as Arc<dyn CdpTransport>)
            })
        });
        Self {
            factory,
            state_source,
        }
    }

    /// Inject a transport factory; used by tests and alternate vendors.
    pub fn with_factory(factory: TransportFactory, state_source: Option<Arc<dyn StateSource>>) -> Self {
        Self {
            factory,
            state_source,
        }
    }

    async fn open_page(
        transport: &Arc<dyn CdpTransport>,
    ) -> Result<(String, String), PipelineError> {
        let created = transport
            .send_command(
                CommandTarget::Browser,
                "Target.createTarget",
                json!({ "url": "about:blank" }),
            )
            .await?;
        let target_id = created
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| PipelineError::session("createTarget returned no targetId"))?
            .to_string();

        let attached = transport
            .send_command(
                CommandTarget::Browser,
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let session_id = attached
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| PipelineError::session("attachToTarget returned no sessionId"))?
            .to_string();

        Ok((target_id, session_id))
    }

    async fn seed_state(
        transport: &Arc<dyn CdpTransport>,
        session_id: &str,
        state: &SessionState,
    ) -> Result<(), PipelineError> {
        if state.cookies.is_empty() {
            return Ok(());
        }
        let cookies: Vec<Value> = state
            .cookies
            .iter()
            .map(|c| {
                let mut cookie = json!({
                    "name": c.name,
                    "value": c.value,
                    "domain": c.domain,
                    "path": if c.path.is_empty() { "/" } else { &c.path },
                    "httpOnly": c.http_only,
                    "secure": c.secure,
                });
                if let Some(expires) = c.expires {
                    cookie["expires"] = json!(expires);
                }
                if let Some(same_site) = &c.same_site {
                    cookie["sameSite"] = json!(same_site);
                }
                cookie
            })
            .collect();

        transport
            .send_command(
                CommandTarget::Session(session_id.to_string()),
                "Network.setCookies",
                json!({ "cookies": cookies }),
            )
            .await?;
        Ok(())
    }
}

struct TargetCloser {
    transport: Arc<dyn CdpTransport>,
    target_id: String,
}

#[async_trait]
impl LeaseCloser for TargetCloser {
    async fn close(&self) {
        let result = self
            .transport
            .send_command(
                CommandTarget::Browser,
                "Target.closeTarget",
                json!({ "targetId": self.target_id }),
            )
            .await;
        if let Err(err) = result {
            warn!(target: "session-broker", ?err, "closeTarget failed during release");
        }
    }
}

#[async_trait]
impl SessionProvider for SessionBroker {
    async fn acquire(
        &self,
        provider: Provider,
        engine: Engine,
    ) -> Result<SessionLease, PipelineError> {
        let transport = (self.factory)(provider, engine).await?;
        let (target_id, session_id) = Self::open_page(&transport).await?;

        // Absent cached state degrades capture reliability, never the acquire.
        if let Some(source) = &self.state_source {
            match source.fetch(provider, engine).await {
                Some(state) => {
                    Self::seed_state(&transport, &session_id, &state).await?;
                    info!(target: "session-broker", %provider, %engine,
                          cookies = state.cookies.len(), "seeded cached login state");
                }
                None => {
                    debug!(target: "session-broker", %provider, %engine,
                           "no cached login state; fresh context");
                }
            }
        }

        let page = Arc::new(CdpPage::new(
            Arc::clone(&transport),
            session_id,
            target_id.clone(),
        ));
        let closer = Arc::new(TargetCloser {
            transport,
            target_id,
        });
        Ok(SessionLease::new(page, provider, engine, closer))
    }
}
