use crate::error::ApiError;
use crate::protocol::{
    ExtenderArgs, ExtenderBindingArgs, ExtenderBindingResult, ExtenderFilterResult,
    HostPriority, HostPriorityList, NODE_CACHE_REQUIRED,
};
use crate::response::ApiResponse;
use crate::{AppState, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gpushare_core::{is_gpu_share_pod, request_from_pod, Pod, PodKey};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

fn pod_and_candidates(args: &ExtenderArgs) -> Result<(&Pod, Vec<String>)> {
    let candidates = args
        .candidates()
        .ok_or_else(|| ApiError::BadRequest(NODE_CACHE_REQUIRED.to_string()))?;
    let pod = args
        .pod
        .as_ref()
        .ok_or_else(|| ApiError::BadRequest("extender args carry no pod".to_string()))?;
    Ok((pod, candidates))
}

/// POST /gpushare-scheduler/filter
pub async fn filter(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let result = serde_json::from_slice::<ExtenderArgs>(&body)
        .map_err(ApiError::from)
        .and_then(|args| run_filter(&state, args));

    match result {
        Ok(result) => ApiResponse::ok(result).into_response(),
        Err(e) => {
            warn!("Filter failed: {}", e);
            ApiResponse::with_status(e.status(), ExtenderFilterResult::failure(e.to_string()))
                .into_response()
        }
    }
}

fn run_filter(state: &AppState, args: ExtenderArgs) -> Result<ExtenderFilterResult> {
    let (pod, candidates) = pod_and_candidates(&args)?;

    if !is_gpu_share_pod(pod) {
        let key = PodKey::new(
            pod.metadata.namespace.clone().unwrap_or_default(),
            pod.metadata.name.clone().unwrap_or_default(),
        );
        debug!("Pod {} requests no GPU share, passing all nodes", key);
        state.scheduler.pass_through(&key);
        return Ok(ExtenderFilterResult::feasible(
            args,
            candidates,
            BTreeMap::new(),
            BTreeMap::new(),
        ));
    }

    let request = request_from_pod(pod)?;
    let outcome = state.scheduler.filter(&request, &candidates)?;
    let (failed, unresolvable) = outcome.failed_messages();

    info!(
        "Pod {} fits {} of {} nodes",
        request.pod,
        outcome.nodes.len(),
        candidates.len()
    );

    Ok(ExtenderFilterResult::feasible(
        args,
        outcome.nodes,
        failed,
        unresolvable,
    ))
}

/// POST /gpushare-scheduler/priorities
pub async fn prioritize(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<HostPriorityList>> {
    let args: ExtenderArgs = serde_json::from_slice(&body)?;
    let (pod, candidates) = pod_and_candidates(&args)?;

    if !is_gpu_share_pod(pod) {
        return Ok(Json(
            candidates
                .into_iter()
                .map(|host| HostPriority { host, score: 0 })
                .collect(),
        ));
    }

    let request = request_from_pod(pod)?;
    let scores = state.scheduler.prioritize(&request, &candidates)?;

    debug!("Scores for pod {}: {:?}", request.pod, scores);

    Ok(Json(scores.into_iter().map(HostPriority::from).collect()))
}

/// POST /gpushare-scheduler/bind
pub async fn bind(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let args = match serde_json::from_slice::<ExtenderBindingArgs>(&body) {
        Ok(args) => args,
        Err(e) => return bind_failure(e.into()),
    };

    match run_bind(&state, &args).await {
        Ok(_) => ApiResponse::ok(ExtenderBindingResult::default()).into_response(),
        Err(e) => bind_failure(e),
    }
}

fn bind_failure(e: ApiError) -> Response {
    warn!("Bind failed: {}", e);
    ApiResponse::with_status(
        e.status(),
        ExtenderBindingResult {
            error: e.to_string(),
        },
    )
    .into_response()
}

async fn run_bind(state: &AppState, args: &ExtenderBindingArgs) -> Result<()> {
    if args.pod_name.is_empty() || args.node.is_empty() {
        return Err(ApiError::BadRequest(
            "binding args need podName and node".to_string(),
        ));
    }

    let pod = PodKey::new(args.pod_namespace.as_str(), args.pod_name.as_str());
    info!("Binding pod {} to node {}", pod, args.node);

    if state.scheduler.is_pass_through(&pod) {
        state
            .binder
            .bind_plain(&pod, &args.node, &args.pod_uid)
            .await?;
        state.scheduler.pass_through_bound(&pod);
        return Ok(());
    }

    let allocation = state.scheduler.bind(&pod, &args.node)?;

    if let Err(e) = state.binder.bind(&allocation, &args.pod_uid).await {
        error!(
            "{} binder failed for pod {}, releasing allocation {}: {}",
            state.binder.name(),
            pod,
            allocation.id,
            e
        );
        state.scheduler.abort_bind(&pod, &allocation.id);
        return Err(e.into());
    }

    Ok(())
}
