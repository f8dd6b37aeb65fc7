//! User-Agent sniffing for requests that omit a compile group.
//!
//! When a compiled URL carries no group segment the server has to decide
//! which profile fits the caller before redirecting. The detection here is
//! deliberately coarse: it only needs to tell the runtimes in the plugin
//! matrix apart, not fingerprint browsers precisely.

use kiln_profile::{CompileProfile, ProfileSet, RuntimeVersion};

/// Extracts a runtime name and version from a User-Agent string.
///
/// Returns `None` when the agent does not look like any runtime the
/// compatibility matrix knows about, in which case callers should fall
/// back to the most conservative profile.
pub fn detect_runtime(user_agent: &str) -> Option<(&'static str, RuntimeVersion)> {
    // Firefox first: its agent string never mentions Chrome, but Chrome's
    // mentions Safari, so the order of checks matters.
    if let Some(version) = version_after(user_agent, "Firefox/") {
        return Some(("firefox", version));
    }
    if let Some(version) = version_after(user_agent, "HeadlessChrome/") {
        return Some(("chrome", version));
    }
    if let Some(version) = version_after(user_agent, "Chrome/") {
        return Some(("chrome", version));
    }
    if let Some(version) = version_after(user_agent, "Chromium/") {
        return Some(("chrome", version));
    }
    if user_agent.contains("Safari/") {
        if let Some(version) = version_after(user_agent, "Version/") {
            return Some(("safari", version));
        }
    }
    if let Some(version) = version_after(user_agent, "Node.js/") {
        return Some(("node", version));
    }
    if let Some(version) = version_after(user_agent, "node/") {
        return Some(("node", version));
    }
    None
}

/// Picks the profile for an agent string, falling back to the profile that
/// assumes nothing about the runtime when the agent is unrecognized.
pub fn profile_for_agent<'a>(profiles: &'a ProfileSet, user_agent: Option<&str>) -> &'a CompileProfile {
    match user_agent.and_then(detect_runtime) {
        Some((runtime, version)) => profiles.lookup(runtime, version),
        None => profiles.fallback(),
    }
}

fn version_after(user_agent: &str, token: &str) -> Option<RuntimeVersion> {
    let start = user_agent.find(token)? + token.len();
    let digits: String = user_agent[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    // Browser agents often carry four segments; the matrix compares three.
    let segments: Vec<&str> = digits.split('.').filter(|s| !s.is_empty()).take(3).collect();
    RuntimeVersion::parse(&segments.join(".")).ok()
}
