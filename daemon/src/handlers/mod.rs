pub mod auth;
pub mod jobs;
pub mod subscriptions;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::protocol::*;
use crate::state::{ClientId, DaemonState};

/// Dispatch a request to the appropriate handler
pub async fn dispatch(
    request: &Request,
    state: Arc<DaemonState>,
    client_id: ClientId,
) -> String {
    let start = Instant::now();
    let method = request.method.as_str();
    let id = request.id;

    debug!("[dispatch] → id={} method={} client={}", id, method, client_id);

    let response = match method {
        METHOD_AUTH => auth::handle(request, &state).await,
        METHOD_SUBMIT => jobs::handle_submit(request, &state).await,
        METHOD_STATUS => jobs::handle_status(request, &state).await,
        METHOD_OUTPUT => jobs::handle_output(request, &state).await,
        METHOD_CANCEL => jobs::handle_cancel(request, &state).await,
        METHOD_LIST => jobs::handle_list(request, &state).await,
        METHOD_STATS => jobs::handle_stats(request, &state).await,
        METHOD_SUBSCRIBE => subscriptions::handle_subscribe(request, state.clone(), client_id).await,
        METHOD_UNSUBSCRIBE => subscriptions::handle_unsubscribe(request, &state, client_id).await,
        _ => {
            warn!("[dispatch] Unknown method: {}", method);
            failure(
                request.id,
                INVALID_PARAMS,
                format!("Unknown method: {}", request.method),
            )
        }
    };

    let elapsed = start.elapsed();
    let is_error = is_error_response(&response);

    if is_error {
        info!("[dispatch] ← id={} method={} error elapsed={:?}", id, method, elapsed);
    } else {
        debug!("[dispatch] ← id={} method={} ok elapsed={:?}", id, method, elapsed);
    }

    response
}
