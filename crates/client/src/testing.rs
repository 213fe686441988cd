//! In-memory backend peer for unit tests

use std::sync::{Arc, Mutex};

use serde_json::Value;
use sshdeck_protocol::{encode_record, Envelope, Tag};
use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

use crate::correlator::Correlator;
use crate::dispatcher::Dispatcher;
use crate::transport::Transport;

/// Correlator wired to an in-memory pipe, plus the backend end of it
pub(crate) fn duplex_correlator() -> (Correlator, BackendPeer) {
    let dispatcher = Arc::new(Dispatcher::new());
    let (client_io, backend_io) = duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(client_io);
    let transport = Transport::spawn(reader, writer, dispatcher.clone());
    let (backend_read, backend_write) = tokio::io::split(backend_io);
    (
        Correlator::new(dispatcher, transport),
        BackendPeer {
            lines: BufReader::new(backend_read).lines(),
            writer: backend_write,
        },
    )
}

pub(crate) struct BackendPeer {
    lines: tokio::io::Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl BackendPeer {
    pub(crate) async fn next_request(&mut self) -> Envelope {
        let line = self.lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    pub(crate) async fn reply(&mut self, msg: &Envelope) {
        let line = encode_record(msg).unwrap();
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    /// Answer every request with `respond`, recording what was received.
    /// Returning `None` leaves the request unanswered.
    pub(crate) fn serve<F>(mut self, respond: F) -> Arc<Mutex<Vec<Envelope>>>
    where
        F: Fn(&Envelope) -> Option<Envelope> + Send + 'static,
    {
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = received.clone();
        tokio::spawn(async move {
            while let Ok(Some(line)) = self.lines.next_line().await {
                let req: Envelope = serde_json::from_str(&line).unwrap();
                log.lock().unwrap().push(req.clone());
                if let Some(resp) = respond(&req) {
                    self.reply(&resp).await;
                }
            }
        });
        received
    }
}

/// Response envelope carrying the request's id
pub(crate) fn reply_to(req: &Envelope, tag: Tag, payload: Value) -> Envelope {
    Envelope {
        tag,
        session_id: None,
        request_id: req.request_id.clone(),
        payload,
    }
}
