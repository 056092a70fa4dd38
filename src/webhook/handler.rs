//! AdmissionReview handling
//!
//! Unwraps the review, runs the mutator on the embedded object and wraps the
//! outcome back into a review. A mutation error denies the request; the API
//! server then applies the webhook's failure policy.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use tracing::{debug, error, info, warn};

use super::WebhookState;
use crate::mutator::Mutator;

/// Handle `POST /pods`
pub async fn mutate_pods(
    State(state): State<Arc<WebhookState>>,
    body: Bytes,
) -> Json<AdmissionReview<DynamicObject>> {
    review(state.pods.as_ref(), &body).await
}

/// Handle `POST /serviceaccounts`
pub async fn mutate_service_accounts(
    State(state): State<Arc<WebhookState>>,
    body: Bytes,
) -> Json<AdmissionReview<DynamicObject>> {
    review(state.service_accounts.as_ref(), &body).await
}

/// Decode a raw AdmissionReview body, run `mutator` and wrap the response
///
/// A body that is not an AdmissionReview with a request is answered with
/// an invalid-request response rather than an HTTP error.
pub async fn review(mutator: &dyn Mutator, body: &[u8]) -> Json<AdmissionReview<DynamicObject>> {
    let review: AdmissionReview<DynamicObject> = match serde_json::from_slice(body) {
        Ok(review) => review,
        Err(e) => {
            error!(error = %e, "Failed to decode admission review");
            let response = AdmissionResponse::invalid(format!("invalid admission review: {e}"));
            return Json(response.into_review());
        }
    };

    let req: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(admit(mutator, &req).await.into_review())
}

/// Run `mutator` on the request's object and build the admission response
pub async fn admit(
    mutator: &dyn Mutator,
    request: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    let uid = request.uid.clone();

    let Some(obj) = &request.object else {
        debug!(uid = %uid, "No object in request, allowing unchanged");
        return AdmissionResponse::from(request);
    };

    let raw = match serde_json::to_vec(obj) {
        Ok(raw) => raw,
        Err(e) => {
            error!(uid = %uid, error = %e, "Failed to re-serialize admission object");
            return AdmissionResponse::from(request).deny(format!("decode error: {e}"));
        }
    };

    match mutator.mutate(&raw, request.namespace.as_deref()).await {
        Ok(None) => {
            debug!(uid = %uid, name = %request.name, "No mutation required");
            AdmissionResponse::from(request)
        }
        Ok(Some(patch)) => {
            info!(
                uid = %uid,
                name = %request.name,
                patch_ops = patch.0.len(),
                "Applying patch"
            );
            match AdmissionResponse::from(request).with_patch(patch) {
                Ok(response) => response,
                Err(e) => {
                    error!(uid = %uid, error = %e, "Failed to serialize patch");
                    AdmissionResponse::from(request).deny(format!("patch computation error: {e}"))
                }
            }
        }
        Err(e) => {
            warn!(uid = %uid, name = %request.name, error = %e, "Mutation failed, denying");
            AdmissionResponse::from(request).deny(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, Result};
    use async_trait::async_trait;
    use json_patch::Patch;
    use serde_json::json;

    /// Mutator returning a fixed outcome
    struct Fixed(fn() -> Result<Option<Patch>>);

    #[async_trait]
    impl Mutator for Fixed {
        async fn mutate(&self, _raw: &[u8], _ns: Option<&str>) -> Result<Option<Patch>> {
            (self.0)()
        }
    }

    fn request(object: serde_json::Value) -> AdmissionRequest<DynamicObject> {
        let review: AdmissionReview<DynamicObject> = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "name": "web",
                "namespace": "apps",
                "operation": "CREATE",
                "userInfo": {"username": "admin"},
                "object": object
            }
        }))
        .unwrap();
        review.try_into().unwrap()
    }

    fn pod() -> serde_json::Value {
        json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "web"}, "spec": {"containers": []}})
    }

    #[tokio::test]
    async fn no_change_is_allowed_without_patch() {
        let response = admit(&Fixed(|| Ok(None)), &request(pod())).await;
        assert!(response.allowed);
        assert!(response.patch.is_none());
    }

    #[tokio::test]
    async fn patch_is_attached() {
        let mutator = Fixed(|| {
            Ok(Some(json_patch::diff(&json!({}), &json!({"a": 1}))))
        });
        let response = admit(&mutator, &request(pod())).await;
        assert!(response.allowed);
        assert!(response.patch.is_some());
    }

    #[tokio::test]
    async fn mutation_error_denies_with_message() {
        let mutator = Fixed(|| Err(Error::retrieval("externalsecrets apps/db not found")));
        let response = admit(&mutator, &request(pod())).await;
        assert!(!response.allowed);
        assert!(response.result.message.contains("apps/db not found"));
    }

    #[tokio::test]
    async fn non_json_body_is_an_invalid_request() {
        let Json(reply) = review(&Fixed(|| Ok(None)), b"not json").await;
        let response = reply.response.unwrap();
        assert!(!response.allowed);
        assert_eq!(response.result.reason, "InvalidRequest");
        assert!(response.result.message.contains("invalid admission review"));
    }

    #[tokio::test]
    async fn review_without_request_is_an_invalid_request() {
        let body = serde_json::to_vec(&json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview"
        }))
        .unwrap();

        let Json(reply) = review(&Fixed(|| Ok(None)), &body).await;
        let response = reply.response.unwrap();
        assert!(!response.allowed);
        assert_eq!(response.result.reason, "InvalidRequest");
    }

    #[tokio::test]
    async fn review_echoes_request_uid() {
        let response = admit(&Fixed(|| Ok(None)), &request(pod())).await;
        assert_eq!(response.uid, "705ab4f5-6393-11e8-b7cc-42010a800002");
    }
}
