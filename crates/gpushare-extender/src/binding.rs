// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use async_trait::async_trait;
use gpushare_core::{Allocation, PodKey, DEVICE_INDEX_ANNOTATION};
use k8s_openapi::api::core::v1::{Binding, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use miette::Diagnostic;
use reqwest::Client;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Annotation carrying the allocation id onto the bound pod
pub const ALLOCATION_ID_ANNOTATION: &str = "gpushare.io/allocation-id";

/// Binding error type
#[derive(Error, Debug, Diagnostic)]
pub enum BindingError {
    /// API server unreachable
    #[error("Binding request for pod {pod} failed: {message}")]
    #[diagnostic(
        code(gpushare::binding::request_failed),
        help("Check that --apiserver points at a reachable Kubernetes API server")
    )]
    RequestFailed { pod: String, message: String },

    /// API server refused the binding
    #[error("API server rejected binding of pod {pod} with status {status}: {body}")]
    #[diagnostic(
        code(gpushare::binding::rejected),
        help("The pod may have been deleted, or the extender lacks permission to bind pods")
    )]
    Rejected {
        pod: String,
        status: u16,
        body: String,
    },
}

/// Commits a pod-to-node binding outside the extender
#[async_trait]
pub trait PodBinder: Send + Sync {
    /// Bind the pod of `allocation` to its node
    async fn bind(&self, allocation: &Allocation, pod_uid: &str) -> Result<(), BindingError>;

    /// Bind a pod that holds no GPU share
    async fn bind_plain(
        &self,
        pod: &PodKey,
        node: &str,
        pod_uid: &str,
    ) -> Result<(), BindingError>;

    /// Name of the binder
    fn name(&self) -> &str;
}

/// Records allocations only; the pod is bound by someone else
pub struct NoopBinder;

#[async_trait]
impl PodBinder for NoopBinder {
    async fn bind(&self, allocation: &Allocation, _pod_uid: &str) -> Result<(), BindingError> {
        debug!("Not posting a binding for pod {}", allocation.pod);
        Ok(())
    }

    async fn bind_plain(
        &self,
        pod: &PodKey,
        _node: &str,
        _pod_uid: &str,
    ) -> Result<(), BindingError> {
        debug!("Not posting a binding for pod {}", pod);
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}

/// Posts a v1 Binding to the Kubernetes API server
pub struct ApiServerBinder {
    base_url: String,
    client: Client,
}

impl ApiServerBinder {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    fn binding(
        pod: &PodKey,
        node: &str,
        pod_uid: &str,
        annotations: Option<BTreeMap<String, String>>,
    ) -> Binding {
        Binding {
            metadata: ObjectMeta {
                name: Some(pod.name.clone()),
                namespace: Some(pod.namespace.clone()),
                uid: Some(pod_uid.to_string()).filter(|uid| !uid.is_empty()),
                annotations,
                ..Default::default()
            },
            target: ObjectReference {
                api_version: Some("v1".to_string()),
                kind: Some("Node".to_string()),
                name: Some(node.to_string()),
                ..Default::default()
            },
        }
    }

    /// POST /api/v1/namespaces/{namespace}/pods/{name}/binding
    async fn post(&self, pod: &PodKey, binding: &Binding) -> Result<(), BindingError> {
        let url = format!(
            "{}/api/v1/namespaces/{}/pods/{}/binding",
            self.base_url, pod.namespace, pod.name
        );
        debug!("POST {}", url);

        let resp = self
            .client
            .post(&url)
            .json(binding)
            .send()
            .await
            .map_err(|e| BindingError::RequestFailed {
                pod: pod.to_string(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::CONFLICT {
            // Already bound, e.g. a retried bind call
            warn!("Pod {} already bound on the API server", pod);
            return Ok(());
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BindingError::Rejected {
                pod: pod.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl PodBinder for ApiServerBinder {
    async fn bind(&self, allocation: &Allocation, pod_uid: &str) -> Result<(), BindingError> {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            DEVICE_INDEX_ANNOTATION.to_string(),
            allocation.device.to_string(),
        );
        annotations.insert(
            ALLOCATION_ID_ANNOTATION.to_string(),
            allocation.id.to_string(),
        );

        let binding = Self::binding(&allocation.pod, &allocation.node, pod_uid, Some(annotations));
        self.post(&allocation.pod, &binding).await?;

        info!(
            "Posted binding of pod {} to node {}",
            allocation.pod, allocation.node
        );
        Ok(())
    }

    async fn bind_plain(
        &self,
        pod: &PodKey,
        node: &str,
        pod_uid: &str,
    ) -> Result<(), BindingError> {
        self.post(pod, &Self::binding(pod, node, pod_uid, None)).await?;

        info!("Posted binding of pod {} to node {}", pod, node);
        Ok(())
    }

    fn name(&self) -> &str {
        "apiserver"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use gpushare_core::AllocationRequest;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    type Seen = Arc<Mutex<Vec<(String, String, serde_json::Value)>>>;

    async fn fake_apiserver(status: StatusCode) -> (String, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));

        async fn handle(
            State((status, seen)): State<(StatusCode, Seen)>,
            Path((namespace, name)): Path<(String, String)>,
            Json(body): Json<serde_json::Value>,
        ) -> StatusCode {
            seen.lock().unwrap().push((namespace, name, body));
            status
        }

        let app = Router::new()
            .route(
                "/api/v1/namespaces/{namespace}/pods/{name}/binding",
                post(handle),
            )
            .with_state((status, seen.clone()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}/", addr), seen)
    }

    fn allocation() -> Allocation {
        let request = AllocationRequest::new(PodKey::new("ml", "trainer"), 1024, 10);
        Allocation::grant(&request, "gpu-node-1", 1)
    }

    #[tokio::test]
    async fn test_api_server_binding_posted() {
        let (url, seen) = fake_apiserver(StatusCode::CREATED).await;
        let binder = ApiServerBinder::new(&url);
        let allocation = allocation();

        binder.bind(&allocation, "uid-1").await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (namespace, name, body) = &seen[0];
        assert_eq!(namespace, "ml");
        assert_eq!(name, "trainer");
        assert_eq!(body["kind"], "Binding");
        assert_eq!(body["target"]["kind"], "Node");
        assert_eq!(body["target"]["name"], "gpu-node-1");
        assert_eq!(body["metadata"]["uid"], "uid-1");
        assert_eq!(body["metadata"]["annotations"][DEVICE_INDEX_ANNOTATION], "1");
    }

    #[tokio::test]
    async fn test_api_server_plain_binding_has_no_annotations() {
        let (url, seen) = fake_apiserver(StatusCode::CREATED).await;
        let binder = ApiServerBinder::new(&url);

        binder
            .bind_plain(&PodKey::new("default", "nginx"), "node-a", "")
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        let (namespace, name, body) = &seen[0];
        assert_eq!(namespace, "default");
        assert_eq!(name, "nginx");
        assert_eq!(body["target"]["name"], "node-a");
        assert!(body["metadata"].get("annotations").is_none());
        assert!(body["metadata"].get("uid").is_none());
    }

    #[tokio::test]
    async fn test_api_server_conflict_counts_as_bound() {
        let (url, _) = fake_apiserver(StatusCode::CONFLICT).await;
        let binder = ApiServerBinder::new(&url);

        assert!(binder.bind(&allocation(), "").await.is_ok());
    }

    #[tokio::test]
    async fn test_api_server_rejection() {
        let (url, _) = fake_apiserver(StatusCode::FORBIDDEN).await;
        let binder = ApiServerBinder::new(&url);

        let err = binder.bind(&allocation(), "uid-1").await.unwrap_err();
        assert!(matches!(err, BindingError::Rejected { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_unreachable_api_server() {
        let binder = ApiServerBinder::new("http://127.0.0.1:1");

        let err = binder.bind(&allocation(), "uid-1").await.unwrap_err();
        assert!(matches!(err, BindingError::RequestFailed { .. }));
    }

    #[tokio::test]
    async fn test_noop_binder() {
        assert!(NoopBinder.bind(&allocation(), "uid-1").await.is_ok());
        assert_eq!(NoopBinder.name(), "noop");
    }
}
