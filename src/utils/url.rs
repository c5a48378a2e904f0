//! URL utilities for consistent endpoint construction
//!
//! Normalizes base URLs so endpoint paths can be appended without
//! producing double slashes.

/// Normalize a base URL by removing trailing slashes.
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Construct a complete endpoint URL from a base URL and an endpoint path.
///
/// # Examples
///
/// ```
/// use charla::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("http://localhost:8000", "chat/stream"),
///     "http://localhost:8000/chat/stream"
/// );
/// assert_eq!(
///     construct_api_url("http://localhost:8000/", "/preguntar"),
///     "http://localhost:8000/preguntar"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalized_base, endpoint)
}
