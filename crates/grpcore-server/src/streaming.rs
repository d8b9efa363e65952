//! Inbound request sequences.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use grpcore_core::Status;

/// The live sequence of requests handed to client- and bidi-streaming
/// handlers.
///
/// Ends when the client half-closes. An `Err` item means the call has
/// failed and no further requests will arrive.
#[derive(Debug)]
pub struct Streaming<T> {
    rx: mpsc::Receiver<Result<T, Status>>,
}

impl<T> Streaming<T> {
    pub(crate) fn new(rx: mpsc::Receiver<Result<T, Status>>) -> Self {
        Self { rx }
    }

    /// Receive the next request, `Ok(None)` once the client is done sending.
    pub async fn message(&mut self) -> Result<Option<T>, Status> {
        self.rx.recv().await.transpose()
    }
}

impl<T> Stream for Streaming<T> {
    type Item = Result<T, Status>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_streaming_yields_until_sender_drops() {
        let (tx, rx) = mpsc::channel(4);
        let mut requests = Streaming::new(rx);

        tx.send(Ok(1)).await.unwrap();
        tx.send(Ok(2)).await.unwrap();
        drop(tx);

        assert_eq!(requests.message().await, Ok(Some(1)));
        assert_eq!(requests.next().await, Some(Ok(2)));
        assert_eq!(requests.message().await, Ok(None));
    }

    #[tokio::test]
    async fn test_streaming_surfaces_error() {
        let (tx, rx) = mpsc::channel::<Result<u8, Status>>(1);
        let mut requests = Streaming::new(rx);

        tx.send(Err(Status::internal("boom"))).await.unwrap();
        assert_eq!(requests.message().await, Err(Status::internal("boom")));
    }

    #[test]
    fn test_streaming_wakes_on_send() {
        let (tx, rx) = mpsc::channel::<Result<u8, Status>>(1);
        let mut requests = Streaming::new(rx);
        let mut next = tokio_test::task::spawn(requests.next());

        tokio_test::assert_pending!(next.poll());
        tx.try_send(Ok(7)).unwrap();
        assert!(next.is_woken());
        assert_eq!(tokio_test::assert_ready!(next.poll()), Some(Ok(7)));
    }
}
