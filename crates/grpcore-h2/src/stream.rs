//! The two halves of an HTTP/2 logical stream.
//!
//! [`H2Inbound`] turns the response (or request) head, the DATA frames and
//! the trailers into [`StreamEvent`]s. Flow-control capacity is released as
//! chunks are handed to the consumer; while paused, it is withheld and the
//! peer stalls once its window runs out.

use std::future::{Future, poll_fn};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::Stream;
use h2::client::ResponseFuture;
use h2::server::SendResponse;
use h2::{FlowControl, Reason, RecvStream, SendStream};
use parking_lot::Mutex;
use tracing::debug;

use grpcore_transport_traits::{
    BoxFuture, InboundStream, Metadata, OutboundStream, StreamEvent, TransportError,
    TransportResult,
};

use crate::convert::{
    from_h2, header_map, metadata_from_headers, metadata_from_response, response_from_metadata,
};

#[derive(Debug, Default)]
struct Flow {
    control: Option<FlowControl>,
    paused: bool,
    withheld: usize,
}

impl Flow {
    fn consumed(&mut self, len: usize) {
        if self.paused {
            self.withheld += len;
        } else {
            self.release(len);
        }
    }

    fn release(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        if let Some(control) = self.control.as_mut()
            && let Err(e) = control.release_capacity(len)
        {
            debug!(error = %e, "failed to release capacity");
        }
    }
}

enum Phase {
    Head(ResponseFuture),
    Body(RecvStream),
    Trailers(RecvStream),
    Done,
}

/// Receiving half of an HTTP/2 stream.
pub(crate) struct H2Inbound {
    head: Option<Metadata>,
    phase: Phase,
    flow: Arc<Mutex<Flow>>,
}

impl std::fmt::Debug for H2Inbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H2Inbound")
            .field("flow", &self.flow)
            .finish_non_exhaustive()
    }
}

impl H2Inbound {
    /// Client side: the first event is the response head.
    pub(crate) fn response(response: ResponseFuture) -> Self {
        Self {
            head: None,
            phase: Phase::Head(response),
            flow: Arc::default(),
        }
    }

    /// Server side: the request head has already arrived.
    pub(crate) fn request(head: Metadata, mut body: RecvStream) -> Self {
        let flow = Flow {
            control: Some(body.flow_control().clone()),
            ..Flow::default()
        };
        Self {
            head: Some(head),
            phase: Phase::Body(body),
            flow: Arc::new(Mutex::new(flow)),
        }
    }
}

impl Stream for H2Inbound {
    type Item = TransportResult<StreamEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if let Some(head) = this.head.take() {
            return Poll::Ready(Some(Ok(StreamEvent::Headers(head))));
        }

        loop {
            match &mut this.phase {
                Phase::Head(response) => {
                    let result = ready!(Pin::new(response).poll(cx));
                    let response = match result {
                        Ok(response) => response,
                        Err(e) => {
                            this.phase = Phase::Done;
                            return Poll::Ready(Some(Err(from_h2(e))));
                        }
                    };
                    let (parts, mut body) = response.into_parts();
                    this.flow.lock().control = Some(body.flow_control().clone());
                    this.phase = Phase::Body(body);
                    return Poll::Ready(Some(Ok(StreamEvent::Headers(
                        metadata_from_response(&parts),
                    ))));
                }
                Phase::Body(body) => match ready!(body.poll_data(cx)) {
                    Some(Ok(chunk)) => {
                        this.flow.lock().consumed(chunk.len());
                        return Poll::Ready(Some(Ok(StreamEvent::Data(chunk))));
                    }
                    Some(Err(e)) if !finished_early(&e) => {
                        this.phase = Phase::Done;
                        return Poll::Ready(Some(Err(from_h2(e))));
                    }
                    Some(Err(_)) | None => {
                        if let Phase::Body(body) = std::mem::replace(&mut this.phase, Phase::Done) {
                            this.phase = Phase::Trailers(body);
                        }
                    }
                },
                Phase::Trailers(body) => {
                    let trailers = ready!(body.poll_trailers(cx));
                    this.phase = Phase::Done;
                    return Poll::Ready(match trailers {
                        Ok(Some(trailers)) => {
                            Some(Ok(StreamEvent::Headers(metadata_from_headers(&trailers))))
                        }
                        Ok(None) => None,
                        Err(e) if finished_early(&e) => None,
                        Err(e) => Some(Err(from_h2(e))),
                    });
                }
                Phase::Done => return Poll::Ready(None),
            }
        }
    }
}

/// A peer that has sent its complete message may reset with `NO_ERROR`
/// instead of reading the rest of ours; that is an ordinary end.
fn finished_early(err: &h2::Error) -> bool {
    err.is_remote() && err.reason() == Some(Reason::NO_ERROR)
}

impl InboundStream for H2Inbound {
    fn pause(&self) {
        self.flow.lock().paused = true;
    }

    fn resume(&self) {
        let mut flow = self.flow.lock();
        flow.paused = false;
        let withheld = std::mem::take(&mut flow.withheld);
        flow.release(withheld);
    }

    fn is_paused(&self) -> bool {
        self.flow.lock().paused
    }
}

#[derive(Debug)]
enum Sink {
    Respond(SendResponse<Bytes>),
    Body(SendStream<Bytes>),
    HalfClosed(SendStream<Bytes>),
    Ended,
}

/// Sending half of an HTTP/2 stream. Dropped before its end-of-stream, it
/// resets the stream with `CANCEL`; after a data end-of-stream only an
/// explicit [`reset`](OutboundStream::reset) does.
#[derive(Debug)]
pub(crate) struct H2Outbound {
    sink: Sink,
}

impl H2Outbound {
    /// Client side: request headers are already on the wire.
    pub(crate) fn request(body: SendStream<Bytes>) -> Self {
        Self {
            sink: Sink::Body(body),
        }
    }

    /// Server side: the response head is still to be sent.
    pub(crate) fn response(respond: SendResponse<Bytes>) -> Self {
        Self {
            sink: Sink::Respond(respond),
        }
    }

    fn abort(&mut self) {
        match std::mem::replace(&mut self.sink, Sink::Ended) {
            Sink::Respond(mut respond) => respond.send_reset(Reason::CANCEL),
            Sink::Body(mut body) | Sink::HalfClosed(mut body) => body.send_reset(Reason::CANCEL),
            Sink::Ended => {}
        }
    }

    fn body(&mut self) -> TransportResult<&mut SendStream<Bytes>> {
        match &mut self.sink {
            Sink::Body(body) => Ok(body),
            Sink::Respond(_) => Err(TransportError::ProtocolError(
                "response headers not sent".to_string(),
            )),
            Sink::HalfClosed(_) | Sink::Ended => {
                Err(TransportError::SendFailed("stream already ended".to_string()))
            }
        }
    }
}

impl OutboundStream for H2Outbound {
    fn send_headers(
        &mut self,
        headers: Metadata,
        end_stream: bool,
    ) -> BoxFuture<'_, TransportResult<()>> {
        Box::pin(async move {
            let Sink::Respond(respond) = &mut self.sink else {
                return Err(TransportError::ProtocolError(
                    "headers already sent".to_string(),
                ));
            };
            let response = response_from_metadata(&headers)?;
            let body = respond.send_response(response, end_stream).map_err(from_h2)?;
            self.sink = if end_stream {
                Sink::Ended
            } else {
                Sink::Body(body)
            };
            Ok(())
        })
    }

    fn send_data(&mut self, data: Bytes, end_stream: bool) -> BoxFuture<'_, TransportResult<()>> {
        Box::pin(async move {
            send_flow_controlled(self.body()?, data, end_stream).await?;
            if end_stream
                && let Sink::Body(body) = std::mem::replace(&mut self.sink, Sink::Ended)
            {
                self.sink = Sink::HalfClosed(body);
            }
            Ok(())
        })
    }

    fn send_trailers(&mut self, trailers: Metadata) -> BoxFuture<'_, TransportResult<()>> {
        Box::pin(async move {
            let trailers = header_map(&trailers)?;
            self.body()?.send_trailers(trailers).map_err(from_h2)?;
            self.sink = Sink::Ended;
            Ok(())
        })
    }

    fn reset(&mut self) {
        self.abort();
    }

    fn poll_reset(&mut self, cx: &mut Context<'_>) -> Poll<TransportError> {
        let reset = match &mut self.sink {
            Sink::Respond(respond) => ready!(respond.poll_reset(cx)),
            Sink::Body(body) | Sink::HalfClosed(body) => ready!(body.poll_reset(cx)),
            Sink::Ended => return Poll::Pending,
        };
        Poll::Ready(match reset {
            Ok(reason) => TransportError::StreamReset(format!("reset by peer: {reason}")),
            Err(e) => from_h2(e),
        })
    }
}

impl Drop for H2Outbound {
    fn drop(&mut self) {
        if !matches!(self.sink, Sink::HalfClosed(_)) {
            self.abort();
        }
    }
}

/// Send `data`, waiting for the peer to grant window before each chunk.
async fn send_flow_controlled(
    body: &mut SendStream<Bytes>,
    mut data: Bytes,
    end_stream: bool,
) -> TransportResult<()> {
    if data.is_empty() {
        return body.send_data(data, end_stream).map_err(from_h2);
    }

    while !data.is_empty() {
        body.reserve_capacity(data.len());
        let available = body.capacity();
        if available == 0 {
            match poll_fn(|cx| body.poll_capacity(cx)).await {
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(from_h2(e)),
                None => {
                    return Err(TransportError::StreamReset(
                        "stream closed while sending".to_string(),
                    ));
                }
            }
        }
        let chunk = data.split_to(available.min(data.len()));
        body.send_data(chunk, end_stream && data.is_empty())
            .map_err(from_h2)?;
    }
    Ok(())
}
