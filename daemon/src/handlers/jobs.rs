use crate::protocol::*;
use crate::state::DaemonState;

pub async fn handle_submit(request: &Request, state: &DaemonState) -> String {
    let params: SubmitParams = match parse_params(request) {
        Ok(p) => p,
        Err(response) => return response,
    };

    match state
        .engine
        .submit(&params.command, params.args, params.options)
    {
        Ok(record) => success(
            request.id,
            SubmitResult {
                job_id: record.id,
                status: record.status,
                queue_position: record.queue_position,
            },
        ),
        Err(e) => engine_failure(request.id, &e),
    }
}

pub async fn handle_status(request: &Request, state: &DaemonState) -> String {
    let params: JobIdParams = match parse_params(request) {
        Ok(p) => p,
        Err(response) => return response,
    };

    match state.engine.status(params.job_id) {
        Ok(record) => success(request.id, record),
        Err(e) => engine_failure(request.id, &e),
    }
}

pub async fn handle_output(request: &Request, state: &DaemonState) -> String {
    let params: OutputParams = match parse_params(request) {
        Ok(p) => p,
        Err(response) => return response,
    };

    match state.engine.output(params.job_id, params.since) {
        Ok(page) => success(request.id, page),
        Err(e) => engine_failure(request.id, &e),
    }
}

pub async fn handle_cancel(request: &Request, state: &DaemonState) -> String {
    let params: JobIdParams = match parse_params(request) {
        Ok(p) => p,
        Err(response) => return response,
    };

    match state.engine.cancel(params.job_id) {
        Ok(outcome) => success(request.id, CancelResult { outcome }),
        Err(e) => engine_failure(request.id, &e),
    }
}

pub async fn handle_list(request: &Request, state: &DaemonState) -> String {
    let params: ListParams = match parse_params(request) {
        Ok(p) => p,
        Err(response) => return response,
    };

    success(request.id, state.engine.list(params.limit, params.status))
}

pub async fn handle_stats(request: &Request, state: &DaemonState) -> String {
    success(request.id, state.engine.stats())
}
