use std::collections::HashMap;
use std::sync::Mutex;

use smb_dialog_core::error::SMBError;
use smb_dialog_core::nt_status::NTStatus;
use smb_dialog_core::SMBResult;
use tokio::sync::oneshot;

use crate::protocol::SMBMessage;

/// What became of an inbound response when handed to the table.
#[derive(Debug)]
pub(crate) enum Delivery {
    /// Delivered to the registered waiter.
    Completed,
    /// Interim STATUS_PENDING: the waiter stays armed for the real
    /// completion.
    Interim,
    /// No waiter registered for this message id.
    Unclaimed(SMBMessage),
    /// The waiter gave up (timed out) before the response arrived.
    Stale,
}

/// Correlation table pairing in-flight request message ids with the task
/// awaiting each response. A response wakes its waiter directly; nothing
/// polls.
#[derive(Default)]
pub(crate) struct ExchangeTable {
    waiters: Mutex<HashMap<u64, oneshot::Sender<SMBMessage>>>,
}

impl ExchangeTable {
    pub fn register(&self, message_id: u64) -> SMBResult<oneshot::Receiver<SMBMessage>> {
        let mut waiters = self.lock()?;
        if waiters.contains_key(&message_id) {
            return Err(SMBError::protocol_violation(format!(
                "message id {message_id} is already in flight"
            )));
        }
        let (sender, receiver) = oneshot::channel();
        waiters.insert(message_id, sender);
        Ok(receiver)
    }

    pub fn complete(&self, message: SMBMessage) -> SMBResult<Delivery> {
        let mut waiters = self.lock()?;
        let message_id = message.header.message_id;
        if !waiters.contains_key(&message_id) {
            return Ok(Delivery::Unclaimed(message));
        }
        // an interim pending response promises a later completion under the
        // same id, so the waiter must survive it
        if message.header.status == NTStatus::Pending {
            return Ok(Delivery::Interim);
        }
        let sender = waiters.remove(&message_id).ok_or_else(|| {
            SMBError::server_error("exchange waiter vanished under the lock")
        })?;
        match sender.send(message) {
            Ok(()) => Ok(Delivery::Completed),
            Err(_) => Ok(Delivery::Stale),
        }
    }

    /// Forgets a waiter whose caller stopped waiting. A response that
    /// arrives later is reported unclaimed and dropped.
    pub fn abandon(&self, message_id: u64) {
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.remove(&message_id);
        }
    }

    /// Drops every waiter; their receivers resolve to closed-channel errors.
    pub fn fail_all(&self) {
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.clear();
        }
    }

    pub fn in_flight(&self) -> usize {
        self.waiters.lock().map(|waiters| waiters.len()).unwrap_or(0)
    }

    fn lock(&self) -> SMBResult<std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<SMBMessage>>>> {
        self.waiters
            .lock()
            .map_err(|_| SMBError::server_error("exchange table lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::body::{SMBBody, SMBEchoResponse, SMBErrorResponse};
    use crate::protocol::header::{SMBCommandCode, SMBFlags, SMBHeader};

    fn response(message_id: u64, status: NTStatus) -> SMBMessage {
        let mut header = SMBHeader::request(SMBCommandCode::Echo, message_id, 0, 0);
        header.flags |= SMBFlags::SERVER_TO_REDIR;
        header.status = status;
        let body = if status == NTStatus::Success {
            SMBBody::EchoResponse(SMBEchoResponse)
        } else {
            SMBBody::Error(SMBErrorResponse)
        };
        SMBMessage::new(header, body)
    }

    #[tokio::test]
    async fn response_reaches_its_waiter() {
        let table = ExchangeTable::default();
        let receiver = table.register(3).unwrap();
        assert!(matches!(
            table.complete(response(3, NTStatus::Success)).unwrap(),
            Delivery::Completed
        ));
        assert_eq!(receiver.await.unwrap().header.message_id, 3);
        assert_eq!(table.in_flight(), 0);
    }

    #[tokio::test]
    async fn interim_pending_keeps_the_waiter_armed() {
        let table = ExchangeTable::default();
        let receiver = table.register(7).unwrap();
        assert!(matches!(
            table.complete(response(7, NTStatus::Pending)).unwrap(),
            Delivery::Interim
        ));
        assert_eq!(table.in_flight(), 1);
        assert!(matches!(
            table.complete(response(7, NTStatus::Success)).unwrap(),
            Delivery::Completed
        ));
        assert_eq!(receiver.await.unwrap().header.status, NTStatus::Success);
    }

    #[test]
    fn unknown_ids_are_unclaimed_and_duplicates_rejected() {
        let table = ExchangeTable::default();
        assert!(matches!(
            table.complete(response(9, NTStatus::Success)).unwrap(),
            Delivery::Unclaimed(_)
        ));
        let _receiver = table.register(4).unwrap();
        assert!(table.register(4).is_err());
    }

    #[test]
    fn abandoned_waiters_leave_late_responses_unclaimed() {
        let table = ExchangeTable::default();
        let receiver = table.register(5).unwrap();
        drop(receiver);
        table.abandon(5);
        assert!(matches!(
            table.complete(response(5, NTStatus::Success)).unwrap(),
            Delivery::Unclaimed(_)
        ));
    }
}
