// src/client/batch.rs
//! Batch submission rules
//!
//! With `partial_ok` every item gets an acknowledgement, in request order.
//! Without it processing stops at the first failed item and the
//! acknowledgements end there too. Items accepted before that point stay
//! accepted remotely.
//!
//! [`reconcile`] holds a server-side batch response to those rules;
//! [`run_batch`] applies them locally when the remote has no batch RPC.

use crate::model::{Acknowledgement, BatchRequest, BatchResponse};
use crate::utils::errors::{AgentError, Result};
use std::future::Future;
use tracing::{debug, warn};

/// Check a remote batch response against its request and recount it
///
/// Acknowledgements past the first failure of a non-`partial_ok` batch are
/// dropped. A response that acknowledges more items than were sent, or
/// fewer than the rules require, is a transport error.
pub fn reconcile<T, A: Acknowledgement>(
    request: &BatchRequest<T>,
    response: BatchResponse<A>,
) -> Result<BatchResponse<A>> {
    let expected = request.items.len();
    let mut acks = response.acks;

    if acks.len() > expected {
        return Err(AgentError::Transport(format!(
            "batch {} returned {} acknowledgements for {} items",
            request.batch_id,
            acks.len(),
            expected
        )));
    }

    let first_failure = acks.iter().position(|ack| !ack.is_accepted());
    let complete = match first_failure {
        Some(index) if !request.partial_ok => {
            acks.truncate(index + 1);
            true
        }
        _ => acks.len() == expected,
    };
    if !complete {
        return Err(AgentError::Transport(format!(
            "batch {} acknowledged only {} of {} items",
            request.batch_id,
            acks.len(),
            expected
        )));
    }

    let halted = !request.partial_ok && first_failure.is_some() && acks.len() < expected;
    let mut reconciled = BatchResponse::from_acks(request.batch_id.clone(), acks, halted);
    if (reconciled.success, reconciled.failed) != (response.success, response.failed) {
        warn!(
            "Batch {} counts {}/{} do not match its acknowledgements ({}/{})",
            request.batch_id, response.success, response.failed, reconciled.success, reconciled.failed
        );
    }
    if !response.msg.is_empty() {
        reconciled.msg = response.msg;
    }

    Ok(reconciled)
}

/// Drive `submit` over every item of `request`
///
/// A remote rejection becomes an in-band failed acknowledgement built by
/// `rejected`; a transport failure aborts the whole batch with an error.
pub async fn run_batch<T, A, F, Fut, R>(
    request: &BatchRequest<T>,
    mut submit: F,
    rejected: R,
) -> Result<BatchResponse<A>>
where
    T: Clone,
    A: Acknowledgement,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<A>>,
    R: Fn(&T, String) -> A,
{
    let mut acks = Vec::with_capacity(request.items.len());
    let mut halted = false;

    for (index, item) in request.items.iter().enumerate() {
        let ack = match submit(item.clone()).await {
            Ok(ack) => ack,
            Err(AgentError::Rejected { reason }) => rejected(item, reason),
            Err(e) => return Err(e),
        };

        let accepted = ack.is_accepted();
        acks.push(ack);

        if !accepted && !request.partial_ok {
            debug!(
                "Batch {} halted at item {} of {}",
                request.batch_id,
                index + 1,
                request.items.len()
            );
            halted = index + 1 < request.items.len();
            break;
        }
    }

    Ok(BatchResponse::from_acks(request.batch_id.clone(), acks, halted))
}
