use crate::api::{ApiRequest, ApiResponse, HttpError, HttpErrorKind};

/// What the gateway does with a transport outcome.
#[derive(Debug)]
pub enum Disposition {
    /// Success or an error this layer has no opinion on.
    Done(Result<ApiResponse, HttpError>),
    /// No server reachable; surfaced unchanged.
    Unreachable(HttpError),
    /// The refresh endpoint itself rejected us; refreshing again would loop.
    RefreshRejected(HttpError),
    /// Access token expired; a refresh can recover.
    Expired(HttpError),
}

pub fn classify(
    request: &ApiRequest,
    result: Result<ApiResponse, HttpError>,
    refresh_path: &str,
) -> Disposition {
    let err = match result {
        Ok(response) => return Disposition::Done(Ok(response)),
        Err(err) => err,
    };

    match err.kind() {
        HttpErrorKind::Unauthorized if is_refresh_endpoint(request, refresh_path) => {
            Disposition::RefreshRejected(err)
        }
        HttpErrorKind::Unauthorized => Disposition::Expired(err),
        HttpErrorKind::Unreachable => Disposition::Unreachable(err),
        HttpErrorKind::Other => Disposition::Done(Err(err)),
    }
}

/// Match on the path suffix so an API mounted under a prefix still matches.
fn is_refresh_endpoint(request: &ApiRequest, refresh_path: &str) -> bool {
    let path = request.url.path().trim_end_matches('/');
    let refresh = refresh_path.trim_end_matches('/');
    !refresh.is_empty() && path.ends_with(refresh)
}
