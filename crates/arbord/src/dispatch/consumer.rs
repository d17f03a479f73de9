//! The single consumer loop.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Receiver;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::context::ServiceContext;
use crate::process::{StopReason, StopToken};
use crate::registry::{Handler, HandlerError, HandlerOutcome, HandlerRegistry, Reply};

use super::decode::{self, Params};
use super::queue::{DispatchResult, Envelope, PendingRequest};
use super::{DISPATCH_TARGET, DispatchError, InboundRequest};

pub(super) fn run(
    receiver: &Receiver<Envelope>,
    registry: &HandlerRegistry,
    mut context: ServiceContext,
    stop: &StopToken,
) -> ServiceContext {
    info!(
        target: DISPATCH_TARGET,
        routes = registry.len(),
        "dispatch consumer started"
    );
    let mut reason = StopReason::QueueClosed;
    while let Ok(envelope) = receiver.recv() {
        let PendingRequest {
            request,
            completion,
            ticket: _ticket,
        } = match envelope {
            Envelope::Request(pending) => pending,
            Envelope::Close => break,
        };
        let path = request.path.clone();
        let started = Instant::now();
        let result = process(registry, &mut context, request);
        let terminate = matches!(result, Err(DispatchError::Terminated { .. }));
        debug!(
            target: DISPATCH_TARGET,
            path = %path,
            ok = result.is_ok(),
            elapsed_ms = started.elapsed().as_millis(),
            "request processed"
        );
        if completion.send(result).is_err() {
            debug!(
                target: DISPATCH_TARGET,
                path = %path,
                "caller stopped waiting; result dropped"
            );
        }
        if terminate {
            reason = StopReason::Terminated;
            break;
        }
    }
    let discarded = receiver.try_iter().count();
    if discarded > 0 {
        warn!(
            target: DISPATCH_TARGET,
            discarded,
            "queued requests discarded at shutdown"
        );
    }
    info!(
        target: DISPATCH_TARGET,
        reason = %reason,
        "dispatch consumer stopped"
    );
    stop.trigger(reason);
    context
}

fn process(
    registry: &HandlerRegistry,
    context: &mut ServiceContext,
    request: InboundRequest,
) -> DispatchResult {
    let InboundRequest {
        path,
        headers,
        body,
    } = request;
    let handler = registry.lookup(&path).map_err(|error| {
        warn!(target: DISPATCH_TARGET, path = %path, "route not found");
        DispatchError::from(error)
    })?;
    let params = decode::decode(handler.kind(), &headers, &body).map_err(|message| {
        warn!(
            target: DISPATCH_TARGET,
            path = %path,
            kind = %handler.kind(),
            error = %message,
            "request body rejected"
        );
        DispatchError::decode(path.as_str(), message)
    })?;

    let invocation = panic::catch_unwind(AssertUnwindSafe(|| match (handler, params) {
        (Handler::Unary(call), Params::Json(args)) => call(context, &headers, args),
        (Handler::Streaming { poll, .. }, Params::Json(args)) => poll(context, &headers, args),
        (Handler::UploadUnary(call), Params::Upload(upload)) => call(context, &headers, upload),
        (Handler::Interactive(call), _) => call(context),
        (_, params) => Err(HandlerError::invalid_arguments(format!(
            "parameters {params:?} do not match handler kind"
        ))),
    }));

    let outcome = match invocation {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(failure)) => {
            error!(
                target: DISPATCH_TARGET,
                path = %path,
                error = %failure,
                "handler failed"
            );
            return Err(DispatchError::handler_failed(path, failure.to_string()));
        }
        Err(_) => {
            error!(target: DISPATCH_TARGET, path = %path, "handler panicked");
            return Err(DispatchError::handler_panicked(path));
        }
    };

    let streaming = matches!(handler, Handler::Streaming { .. });
    match outcome {
        HandlerOutcome::Terminate => {
            info!(target: DISPATCH_TARGET, path = %path, "handler requested termination");
            Err(DispatchError::terminated(path))
        }
        HandlerOutcome::Continue(Reply::Json(Value::Null)) if streaming => {
            Ok(Reply::Json(Value::Bool(false)))
        }
        HandlerOutcome::Continue(Reply::Json(Value::Null)) => bad_result(path),
        HandlerOutcome::Continue(Reply::Download { .. }) if streaming => bad_result(path),
        HandlerOutcome::Continue(reply) => Ok(reply),
    }
}

fn bad_result(path: String) -> DispatchResult {
    error!(target: DISPATCH_TARGET, path = %path, "handler returned no usable result");
    Err(DispatchError::bad_handler_result(path))
}
