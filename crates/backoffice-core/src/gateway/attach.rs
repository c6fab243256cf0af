use reqwest::header::{self, HeaderValue};
use tracing::warn;

use crate::api::ApiRequest;

/// Copy `request`, adding `Authorization: Bearer <token>` when a token is given.
///
/// The input is left untouched so it can be replayed later with a different
/// token. Without a token the copy is identical to the input.
pub fn attach_bearer(request: &ApiRequest, token: Option<&str>) -> ApiRequest {
    let mut outgoing = request.clone();
    let Some(token) = token else {
        return outgoing;
    };

    match HeaderValue::from_str(&format!("Bearer {}", token)) {
        Ok(mut value) => {
            value.set_sensitive(true);
            outgoing.headers.insert(header::AUTHORIZATION, value);
        }
        Err(_) => {
            warn!(url = %request.url, "Stored access token is not a valid header value, sending without it");
        }
    }
    outgoing
}
