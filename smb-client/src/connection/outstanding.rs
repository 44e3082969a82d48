use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

use smb_client_core::error::SMBError;
use smb_client_core::SMBResult;

use crate::protocol::header::SMBCommandCode;
use crate::protocol::message::SMBMessage;

/// One in-flight request: its wire identity plus the promise its caller is
/// waiting on. Owned by [`OutstandingRequests`] from registration until the
/// terminal response (or connection failure) delivers it.
#[derive(Debug)]
pub struct Request {
    message_id: u64,
    correlation_id: Uuid,
    command: SMBCommandCode,
    timestamp: Instant,
    async_id: Option<u64>,
    responder: oneshot::Sender<SMBResult<SMBMessage>>,
}

impl Request {
    pub fn new(message_id: u64, command: SMBCommandCode) -> (Self, ResponseFuture) {
        let (responder, receiver) = oneshot::channel();
        let request = Self {
            message_id,
            correlation_id: Uuid::new_v4(),
            command,
            timestamp: Instant::now(),
            async_id: None,
            responder,
        };
        let future = ResponseFuture {
            message_id,
            receiver,
        };
        (request, future)
    }

    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn command(&self) -> SMBCommandCode {
        self.command
    }

    pub fn async_id(&self) -> Option<u64> {
        self.async_id
    }

    pub fn elapsed(&self) -> Duration {
        self.timestamp.elapsed()
    }

    /// Fulfils the caller's promise. A caller that already gave up on its
    /// timeout has dropped the receiving half; that is not an error.
    pub fn deliver(self, result: SMBResult<SMBMessage>) {
        let _ = self.responder.send(result);
    }
}

/// The receiving half of a request's promise.
#[derive(Debug)]
pub struct ResponseFuture {
    message_id: u64,
    receiver: oneshot::Receiver<SMBResult<SMBMessage>>,
}

impl ResponseFuture {
    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    /// Waits for the terminal response, at most `timeout`. An elapsed
    /// timeout abandons the wait but leaves the request registered; no
    /// CANCEL is put on the wire.
    pub async fn await_response(self, timeout: Duration) -> SMBResult<SMBMessage> {
        match tokio::time::timeout(timeout, self.receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SMBError::transport_error(
                "connection dropped the request before a response arrived",
            )),
            Err(_) => Err(SMBError::timed_out(format!(
                "no response for message {} within {:?}",
                self.message_id, timeout
            ))),
        }
    }
}

/// Correlation table from message id to in-flight request, with a side index
/// from async id for requests the server answered with STATUS_PENDING.
#[derive(Debug)]
pub struct OutstandingRequests {
    inner: Mutex<OutstandingState>,
}

#[derive(Debug, Default)]
struct OutstandingState {
    requests: HashMap<u64, Request>,
    async_index: HashMap<u64, u64>,
}

impl OutstandingRequests {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(OutstandingState::default()),
        }
    }

    pub fn register_outstanding(&self, request: Request) {
        let mut state = self.inner.lock();
        state.requests.insert(request.message_id, request);
    }

    pub fn is_outstanding(&self, message_id: u64) -> bool {
        self.inner.lock().requests.contains_key(&message_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().requests.is_empty()
    }

    /// Records the async id of an interim STATUS_PENDING response; the
    /// request stays outstanding until the final response shows up.
    pub fn set_async_id(&self, message_id: u64, async_id: u64) {
        let mut state = self.inner.lock();
        if let Some(request) = state.requests.get_mut(&message_id) {
            request.async_id = Some(async_id);
            state.async_index.insert(async_id, message_id);
        }
    }

    pub fn async_id_of(&self, message_id: u64) -> Option<u64> {
        self.inner
            .lock()
            .requests
            .get(&message_id)
            .and_then(Request::async_id)
    }

    pub fn message_id_for_async(&self, async_id: u64) -> Option<u64> {
        self.inner.lock().async_index.get(&async_id).copied()
    }

    /// Removes and returns the request a terminal response belongs to.
    pub fn received_response_for(&self, message_id: u64) -> Option<Request> {
        let mut state = self.inner.lock();
        let request = state.requests.remove(&message_id)?;
        if let Some(async_id) = request.async_id {
            state.async_index.remove(&async_id);
        }
        Some(request)
    }

    /// Connection-fatal error: every pending promise fails with `error`.
    pub fn handle_error(&self, error: &SMBError) {
        let mut state = self.inner.lock();
        state.async_index.clear();
        for (_, request) in state.requests.drain() {
            request.deliver(Err(error.clone()));
        }
    }
}

impl Default for OutstandingRequests {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::body::{SMBBody, SMBEchoResponse};
    use crate::protocol::header::SMBHeader;

    use super::*;

    fn echo_response(message_id: u64) -> SMBMessage {
        let mut header = SMBHeader::new_request(SMBCommandCode::Echo);
        header.message_id = message_id;
        SMBMessage::new(header, SMBBody::EchoResponse(SMBEchoResponse::new()))
    }

    #[tokio::test]
    async fn request_stays_outstanding_until_delivered() {
        let outstanding = OutstandingRequests::new();
        let (request, future) = Request::new(5, SMBCommandCode::Echo);
        outstanding.register_outstanding(request);
        assert!(outstanding.is_outstanding(5));

        let request = outstanding.received_response_for(5).unwrap();
        assert!(!outstanding.is_outstanding(5));
        request.deliver(Ok(echo_response(5)));

        let response = future.await_response(Duration::from_secs(1)).await.unwrap();
        assert_eq!(response.header.message_id, 5);
    }

    #[tokio::test]
    async fn async_id_keeps_the_request_outstanding() {
        let outstanding = OutstandingRequests::new();
        let (request, _future) = Request::new(7, SMBCommandCode::Echo);
        outstanding.register_outstanding(request);

        outstanding.set_async_id(7, 0xABCD);
        assert!(outstanding.is_outstanding(7));
        assert_eq!(outstanding.async_id_of(7), Some(0xABCD));
        assert_eq!(outstanding.message_id_for_async(0xABCD), Some(7));

        let request = outstanding.received_response_for(7).unwrap();
        assert_eq!(request.async_id(), Some(0xABCD));
        assert_eq!(outstanding.message_id_for_async(0xABCD), None);
    }

    #[tokio::test]
    async fn handle_error_fails_every_pending_future() {
        let outstanding = OutstandingRequests::new();
        let (first, first_future) = Request::new(1, SMBCommandCode::Echo);
        let (second, second_future) = Request::new(2, SMBCommandCode::LogOff);
        outstanding.register_outstanding(first);
        outstanding.register_outstanding(second);

        outstanding.handle_error(&SMBError::transport_error("connection torn down"));
        assert!(outstanding.is_empty());

        for future in [first_future, second_future] {
            assert!(matches!(
                future.await_response(Duration::from_secs(1)).await,
                Err(SMBError::TransportError(_))
            ));
        }
    }

    #[tokio::test]
    async fn timed_out_wait_surfaces_as_timeout() {
        let outstanding = OutstandingRequests::new();
        let (request, future) = Request::new(9, SMBCommandCode::Echo);
        outstanding.register_outstanding(request);

        let result = future.await_response(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(SMBError::TimedOut(_))));
        // The request itself is still registered.
        assert!(outstanding.is_outstanding(9));
    }
}
