/// Public link for a content id.
///
/// Ids that are already URLs pass through, `ipfs://` prefixes are stripped
/// and an empty id yields an empty string.
pub fn gateway_url(base: &str, id: &str) -> String {
    if id.is_empty() {
        return String::new();
    }
    if id.starts_with("http") {
        return id.to_string();
    }
    let id = id.strip_prefix("ipfs://").unwrap_or(id);
    format!("{base}{id}")
}
