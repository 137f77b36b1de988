//! Built-in handler for the `poll` command.

use super::{PollError, PollFilter};
use crate::protocol::{CommandKind, EppResult, MessageQueue, PollOp, Response, ResultCode};
use crate::session::{CommandEvent, CommandHandler, Fault, Session};

/// Serves `poll op="req"` and `poll op="ack"` from the shared queue.
///
/// The recipient is the logged-in client id, whose own queue is merged with
/// the default queue. Only notifications for object services negotiated at
/// login are visible.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollHandler;

impl PollHandler {
    fn filter(session: &Session) -> PollFilter {
        match session.negotiated() {
            Some(negotiated) => PollFilter::namespaces(negotiated.object_uris.iter().cloned()),
            None => PollFilter::all(),
        }
    }
}

impl CommandHandler for PollHandler {
    fn execute(&self, event: &CommandEvent<'_>, session: &Session) -> Result<Response, Fault> {
        let CommandKind::Poll(op) = &event.command().kind else {
            return Err(Fault::new(ResultCode::CommandFailed).with_reason("not a poll command"));
        };
        let recipient = session.client_id();
        let filter = Self::filter(session);
        let queue = event.poll_queue();
        let trans_id = event.trans_id().clone();

        match op {
            PollOp::Request => match queue.deliverable(recipient, &filter) {
                Ok(polled) => {
                    let message = polled.message;
                    let notification = message.notification;
                    let mut response =
                        Response::new(EppResult::new(ResultCode::SuccessAckToDequeue), trans_id)
                            .with_msg_queue(MessageQueue {
                                count: polled.count as u64,
                                id: Some(message.id),
                                queue_date: Some(message.queued_at),
                                message: Some(notification.message),
                                lang: notification.lang,
                            });
                    response.res_data = notification.res_data;
                    response.extensions = notification.extensions;
                    Ok(response)
                },
                Err(_) => Ok(Response::from_code(ResultCode::SuccessNoMessages, trans_id)),
            },
            PollOp::Acknowledge(id) => match queue.acknowledge(recipient, id, &filter) {
                Ok(remaining) => Ok(Response::from_code(ResultCode::Success, trans_id)
                    .with_msg_queue(MessageQueue::count_only(remaining as u64, Some(id.clone())))),
                Err(e @ (PollError::NotFound(_) | PollError::QueueEmpty)) => {
                    Err(Fault::new(ResultCode::ObjectDoesNotExist).with_reason(e.to_string()))
                },
            },
        }
    }
}
