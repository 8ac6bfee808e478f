//! Client-side glue: session lifecycle around a single shared
//! [`ChannelClient`](peerline_net::ChannelClient), the caller-facing message
//! timeline and file attachments.

pub mod config;
pub mod error;
pub mod files;
pub mod identity;
pub mod session;
pub mod timeline;

pub use config::ClientConfig;
pub use error::SessionError;
pub use files::{fetch_file, send_file};
pub use identity::{IdentityProvider, StaticIdentityProvider};
pub use session::SessionManager;
pub use timeline::Timeline;

use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LOG_FILTER: &str =
    "peerline_client=debug,peerline_net=debug,peerline_store=info,warn";

/// Install the global tracing subscriber.
///
/// Honours `RUST_LOG`. Calling it again after a subscriber is installed does
/// nothing.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Starting {} client", peerline_shared::constants::APP_NAME);
    }
}
