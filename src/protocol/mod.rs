//! In-process request/reply protocol between session workers and the
//! orchestrator.
//!
//! Every request travels as an [`Envelope`] over one mpsc channel and
//! carries a oneshot for the reply. A reply of `None` is a real outcome,
//! not a failure: fire-and-forget operations (statistics increments,
//! resets) produce nothing, and callers must tolerate that.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::host::TabId;
use crate::pool::Algorithm;
use crate::stats::{StatCounter, StatsSnapshot};

/// Operations a session worker may ask of the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerRequest {
    /// First message after a page settles: "am I one of yours, and what
    /// should I do here?".
    Handshake,
    /// The worker is done with its tab; free the slot.
    Disconnect,
    /// Search term for the origin this session was dispatched to.
    GetSearchTerm,
    /// Bump one public counter.
    IncrementStat(StatCounter),
    GetStatistics,
    ResetStatistics,
}

/// Replies paired with [`WorkerRequest`] variants.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerResponse {
    Handshake(HandshakeReply),
    SearchTerm(String),
    Statistics(StatsSnapshot),
    Ack,
}

/// What a worker learns from its handshake.
///
/// `should_execute` is true exactly once per session: the first handshake
/// after the slot was acquired. Later handshakes for the same session (the
/// page the behavior navigated to) get `disconnect_after_redirect` instead,
/// and a tab with no registered session gets all-false so stray workers
/// stand down without touching state.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeReply {
    pub should_execute: bool,
    /// Behavior the session was dispatched with; `None` for tabs the pool
    /// does not know.
    pub algorithm: Option<Algorithm>,
    pub disconnect_after_redirect: bool,
}

impl HandshakeReply {
    /// First handshake of a fresh session: run the behavior.
    pub fn execute(algorithm: Algorithm) -> Self {
        Self {
            should_execute: true,
            algorithm: Some(algorithm),
            disconnect_after_redirect: false,
        }
    }

    /// The session already ran; the worker's only remaining move is to
    /// disconnect.
    pub fn redirected(algorithm: Algorithm) -> Self {
        Self {
            should_execute: false,
            algorithm: Some(algorithm),
            disconnect_after_redirect: true,
        }
    }

    /// Unknown tab: do nothing, change nothing.
    pub fn stand_down() -> Self {
        Self {
            should_execute: false,
            algorithm: None,
            disconnect_after_redirect: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The orchestrator hung up; the run is over.
    #[error("orchestrator channel closed")]
    Closed,
    /// The reply variant did not match the request.
    #[error("unexpected reply to {0}")]
    UnexpectedReply(&'static str),
}

/// One request in flight, tagged with the worker's tab identity.
pub struct Envelope {
    pub session: TabId,
    pub request: WorkerRequest,
    pub reply: oneshot::Sender<Option<WorkerResponse>>,
}

/// Worker-side handle. Cheap to clone; all clones feed the same
/// orchestrator mailbox.
#[derive(Clone)]
pub struct ProtocolClient {
    session: TabId,
    tx: mpsc::Sender<Envelope>,
}

impl ProtocolClient {
    pub fn new(session: TabId, tx: mpsc::Sender<Envelope>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> TabId {
        self.session
    }

    /// Send one request and wait for whatever reply the orchestrator
    /// chooses to give — possibly none.
    pub async fn request(
        &self,
        request: WorkerRequest,
    ) -> Result<Option<WorkerResponse>, ProtocolError> {
        let (reply, rx) = oneshot::channel();
        let envelope = Envelope {
            session: self.session,
            request,
            reply,
        };
        self.tx
            .send(envelope)
            .await
            .map_err(|_| ProtocolError::Closed)?;
        rx.await.map_err(|_| ProtocolError::Closed)
    }

    /// Handshake. Always answered; what the reply says to do depends on
    /// whether this tab holds a fresh session, a spent one, or none.
    pub async fn handshake(&self) -> Result<HandshakeReply, ProtocolError> {
        match self.request(WorkerRequest::Handshake).await? {
            Some(WorkerResponse::Handshake(reply)) => Ok(reply),
            _ => Err(ProtocolError::UnexpectedReply("handshake")),
        }
    }

    pub async fn disconnect(&self) -> Result<(), ProtocolError> {
        self.request(WorkerRequest::Disconnect).await?;
        Ok(())
    }

    /// Search term for this session's origin. Always produced; sites with
    /// no harvested term get the single-space placeholder.
    pub async fn search_term(&self) -> Result<String, ProtocolError> {
        match self.request(WorkerRequest::GetSearchTerm).await? {
            Some(WorkerResponse::SearchTerm(term)) => Ok(term),
            _ => Err(ProtocolError::UnexpectedReply("search term")),
        }
    }

    pub async fn increment(&self, counter: StatCounter) -> Result<(), ProtocolError> {
        self.request(WorkerRequest::IncrementStat(counter)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with_responder<F>(respond: F) -> ProtocolClient
    where
        F: Fn(&WorkerRequest) -> Option<WorkerResponse> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<Envelope>(8);
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let _ = envelope.reply.send(respond(&envelope.request));
            }
        });
        ProtocolClient::new(TabId(7), tx)
    }

    #[tokio::test]
    async fn test_handshake_roundtrip() {
        let client = client_with_responder(|req| match req {
            WorkerRequest::Handshake => Some(WorkerResponse::Handshake(
                HandshakeReply::execute(Algorithm::Navigate),
            )),
            _ => Some(WorkerResponse::Ack),
        });
        let reply = client.handshake().await.unwrap();
        assert!(reply.should_execute);
        assert_eq!(reply.algorithm, Some(Algorithm::Navigate));
        assert!(!reply.disconnect_after_redirect);
    }

    #[tokio::test]
    async fn test_stand_down_reply_asks_for_nothing() {
        let reply = HandshakeReply::stand_down();
        assert!(!reply.should_execute);
        assert!(!reply.disconnect_after_redirect);
        assert_eq!(reply.algorithm, None);
    }

    #[tokio::test]
    async fn test_fire_and_forget_none_is_not_an_error() {
        let client = client_with_responder(|_| None);
        client.increment(StatCounter::ClickedLinks).await.unwrap();
    }

    #[tokio::test]
    async fn test_search_term_reply() {
        let client = client_with_responder(|req| match req {
            WorkerRequest::GetSearchTerm => {
                Some(WorkerResponse::SearchTerm("rust async".into()))
            }
            _ => Some(WorkerResponse::Ack),
        });
        assert_eq!(client.search_term().await.unwrap(), "rust async");
    }

    #[tokio::test]
    async fn test_closed_mailbox_reports_closed() {
        let (tx, rx) = mpsc::channel::<Envelope>(1);
        drop(rx);
        let client = ProtocolClient::new(TabId(1), tx);
        assert!(matches!(
            client.handshake().await,
            Err(ProtocolError::Closed)
        ));
    }

    #[test]
    fn test_reply_stays_pending_until_answered() {
        let (tx, mut rx) = mpsc::channel::<Envelope>(1);
        let client = ProtocolClient::new(TabId(4), tx);
        let mut call = tokio_test::task::spawn(client.handshake());
        tokio_test::assert_pending!(call.poll());

        let envelope = rx.try_recv().unwrap();
        envelope
            .reply
            .send(Some(WorkerResponse::Handshake(HandshakeReply::stand_down())))
            .unwrap();
        assert!(call.is_woken());
        let reply = tokio_test::assert_ready!(call.poll()).unwrap();
        assert!(!reply.should_execute);
        assert_eq!(reply.algorithm, None);
    }

    #[tokio::test]
    async fn test_mismatched_reply_is_flagged() {
        let client = client_with_responder(|_| Some(WorkerResponse::Ack));
        assert!(matches!(
            client.search_term().await,
            Err(ProtocolError::UnexpectedReply(_))
        ));
    }
}
