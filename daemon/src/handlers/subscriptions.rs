use std::sync::Arc;

use runq_core::JobId;
use runq_engine::LogSubscription;
use tracing::debug;

use crate::protocol::*;
use crate::state::{ClientId, ClientSender, DaemonState};

pub async fn handle_subscribe(
    request: &Request,
    state: Arc<DaemonState>,
    client_id: ClientId,
) -> String {
    let params: SubscribeParams = match parse_params(request) {
        Ok(p) => p,
        Err(response) => return response,
    };

    let subscription = match state.engine.subscribe(params.job_id, params.since) {
        Ok(s) => s,
        Err(e) => return engine_failure(request.id, &e),
    };

    let Some(sender) = state.client_sender(client_id).await else {
        return failure(request.id, INTERNAL_ERROR, "Client not registered");
    };

    let handle = tokio::spawn(forward_output(
        subscription,
        sender,
        Arc::clone(&state),
        params.job_id,
        client_id,
    ));
    state
        .store_subscription(client_id, params.job_id, handle)
        .await;

    success(
        request.id,
        SubscribeResult {
            job_id: params.job_id,
            since: params.since,
        },
    )
}

pub async fn handle_unsubscribe(
    request: &Request,
    state: &DaemonState,
    client_id: ClientId,
) -> String {
    let params: JobIdParams = match parse_params(request) {
        Ok(p) => p,
        Err(response) => return response,
    };

    let removed = state.remove_subscription(client_id, params.job_id).await;
    success(
        request.id,
        UnsubscribeResult {
            job_id: params.job_id,
            removed,
        },
    )
}

/// Push every event of one job to a client, then a closing event.
async fn forward_output(
    mut subscription: LogSubscription,
    sender: ClientSender,
    state: Arc<DaemonState>,
    job_id: JobId,
    client_id: ClientId,
) {
    while let Some(event) = subscription.next().await {
        let line = to_line(&Event::new(EVENT_JOB_OUTPUT, JobOutputParams { job_id, event }));
        if sender.send(line).is_err() {
            debug!("Client {client_id} gone, dropping subscription to {job_id}");
            return;
        }
    }

    let status = state.engine.status(job_id).ok().map(|r| r.status);
    let line = to_line(&Event::new(
        EVENT_JOB_SUBSCRIPTION_END,
        JobSubscriptionEndParams { job_id, status },
    ));
    let _ = sender.send(line);
    debug!("Subscription of client {client_id} to {job_id} complete");
}
