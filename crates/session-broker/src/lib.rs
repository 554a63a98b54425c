//! Remote browser session acquisition and raw-CDP page driving.
//!
//! - [`transport`]: websocket command/event plumbing to the remote browser.
//! - [`page`]: the [`page::PageDriver`] seam the locator, capture engine and
//!   fallback agent drive pages through.
//! - [`state_cache`]: read-only client for the out-of-band login-state cache.
//! - [`broker`]: lease-based session acquisition with exactly-once release.

pub mod broker;
pub mod page;
pub mod state_cache;
pub mod transport;

pub use broker::{
    BrokerConfig, LeaseCloser, SessionBroker, SessionLease, SessionProvider, StateSource,
    TransportFactory,
};
pub use page::{CdpPage, PageDriver, Rect};
pub use state_cache::{EnvTier, SessionState, SessionStateCache, StateCacheConfig, StateCookie};
pub use transport::{CdpTransport, CommandTarget, NoopTransport, RemoteTransport, TransportEvent};
