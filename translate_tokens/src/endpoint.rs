//! Issuance endpoint selection
//!
//! The endpoint a token is requested from is derived from the configured
//! region. Subscriptions bound to a region must use that region's issuance
//! endpoint; subscriptions without a region use the global one.

use crate::RegionRef;

/// The issuance endpoint used when no region is configured
pub const GLOBAL_ENDPOINT: &str = "https://api.cognitive.microsoft.com/sts/v1.0/issueToken";

/// Derives the token issuance URL for a region
///
/// An empty or whitespace-only region selects [`GLOBAL_ENDPOINT`]; any other
/// region is trimmed and substituted into the region-scoped template.
pub fn issuance_endpoint(region: &RegionRef) -> String {
    let region = region.as_str().trim();
    if region.is_empty() {
        GLOBAL_ENDPOINT.to_owned()
    } else {
        format!(
            "https://{}.api.cognitive.microsoft.com/sts/v1.0/issueToken",
            region
        )
    }
}
