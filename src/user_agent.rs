//! Shared User-Agent string for every outbound HTTP request (downloads,
//! index searches and webhooks).

const PROJECT_UA_URL: &str = "https://github.com/mediaflow/mediaflow";

/// Default User-Agent identifying the engine.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("mediaflow/{version} (media-pipeline; +{PROJECT_UA_URL})")
}
