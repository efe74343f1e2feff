//! # Kubernetes Errors
//!
//! Classification of `kube::Error` into reconciler error kinds.

use crate::controller::reconciler::ReconcilerError;

/// HTTP status of an API error response
pub fn status_code(err: &kube::Error) -> Option<u16> {
    match err {
        kube::Error::Api(api_err) => Some(api_err.code),
        _ => None,
    }
}

pub fn is_not_found(err: &kube::Error) -> bool {
    status_code(err) == Some(404)
}

/// Optimistic-concurrency failure (resourceVersion mismatch)
pub fn is_conflict(err: &kube::Error) -> bool {
    status_code(err) == Some(409)
}

/// Map a store failure of `op` onto a reconciler error
pub fn classify_kube_error(err: kube::Error, op: &'static str) -> ReconcilerError {
    if is_conflict(&err) {
        ReconcilerError::StoreConflict { op, source: err }
    } else if is_not_found(&err) {
        ReconcilerError::NotFound {
            op,
            what: err.to_string(),
        }
    } else {
        ReconcilerError::Store { op, source: err }
    }
}

#[cfg(test)]
pub(crate) fn api_error(code: u16) -> kube::Error {
    let body = serde_json::json!({
        "status": "Failure",
        "message": format!("test error {code}"),
        "reason": "Test",
        "code": code,
    });
    kube::Error::Api(serde_json::from_value(body).expect("valid api error body"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::reconciler::ErrorKind;

    #[test]
    fn test_classify() {
        assert_eq!(classify_kube_error(api_error(409), "op").kind(), ErrorKind::StoreConflict);
        assert_eq!(classify_kube_error(api_error(404), "op").kind(), ErrorKind::NotFound);
        assert_eq!(classify_kube_error(api_error(500), "op").kind(), ErrorKind::Store);
        assert!(is_not_found(&api_error(404)));
        assert!(!is_conflict(&api_error(404)));
        assert_eq!(status_code(&api_error(403)), Some(403));
    }
}
