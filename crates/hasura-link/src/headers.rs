//! Outgoing request header construction.

use std::collections::HashMap;

/// The Hasura admin secret header name.
pub const ADMIN_SECRET_HEADER: &str = "x-hasura-admin-secret";

/// Build the header map sent with every request.
///
/// `Content-Type: application/json` is always present. At most one
/// authentication header is emitted: the admin secret wins over the bearer
/// token, and with neither credential the request is anonymous. Caller
/// supplied `extra` headers are merged last and override same-named keys.
///
/// # Example
///
/// ```ignore
/// let headers = build_headers(None, Some("token"), &HashMap::new());
/// assert_eq!(headers.get("Authorization"), Some(&"Bearer token".to_string()));
/// ```
pub fn build_headers(
    admin_secret: Option<&str>,
    token: Option<&str>,
    extra: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());

    if let Some(secret) = admin_secret {
        headers.insert(ADMIN_SECRET_HEADER.to_string(), secret.to_string());
    } else if let Some(token) = token {
        headers.insert("Authorization".to_string(), format!("Bearer {token}"));
    }

    for (name, value) in extra {
        headers.insert(name.clone(), value.clone());
    }

    headers
}
