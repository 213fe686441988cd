//! Backend process and its stdio transport
//!
//! Spawns the backend as a child process and talks NDJSON over its
//! stdin/stdout. A writer task drains the outbound channel into stdin; a
//! reader task frames stdout and hands every record to the dispatcher, in
//! arrival order. When stdout ends the dispatcher is closed, which fails every
//! pending request.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use sshdeck_protocol::LineFramer;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::{ClientError, Result};

const OUTBOUND_CAPACITY: usize = 256;
const READ_CHUNK: usize = 8 * 1024;

/// Outbound half of the stream. Cheap to clone.
#[derive(Clone)]
pub struct Transport {
    outbound: mpsc::Sender<String>,
}

impl Transport {
    /// Start the reader and writer tasks over an arbitrary byte stream pair.
    pub fn spawn<R, W>(reader: R, writer: W, dispatcher: Arc<Dispatcher>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, outbound_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);

        let writer_dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            writer_loop(writer, outbound_rx).await;
            writer_dispatcher.close("backend stdin closed");
        });

        tokio::spawn(async move {
            reader_loop(reader, dispatcher).await;
        });

        Self { outbound }
    }

    /// Queue one already-encoded record (newline included)
    pub async fn send_line(&self, line: String) -> Result<()> {
        self.outbound
            .send(line)
            .await
            .map_err(|_| ClientError::Transport("outbound channel closed".into()))
    }
}

/// Dedicated writer task: reads from channel, writes to the backend.
async fn writer_loop<W>(mut writer: W, mut rx: mpsc::Receiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            error!(
                component = "transport",
                event = "transport.write_error",
                error = %e,
                "Failed to write to backend"
            );
            break;
        }
        if let Err(e) = writer.flush().await {
            error!(
                component = "transport",
                event = "transport.flush_error",
                error = %e,
                "Failed to flush backend stdin"
            );
            break;
        }
    }
    debug!(
        component = "transport",
        event = "transport.writer_closed",
        "Writer task ended"
    );
}

/// Read chunks, frame them into records and dispatch each one.
async fn reader_loop<R>(mut reader: R, dispatcher: Arc<Dispatcher>)
where
    R: AsyncRead + Unpin,
{
    let mut framer = LineFramer::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    let reason = loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break "backend closed stdout".to_string(),
            Ok(n) => {
                for record in framer.push(&chunk[..n]) {
                    match record {
                        Ok(msg) => {
                            dispatcher.dispatch(&msg);
                        }
                        Err(e) => {
                            warn!(
                                component = "transport",
                                event = "transport.record_dropped",
                                error = %e,
                                "Dropping unparseable record"
                            );
                        }
                    }
                }
            }
            Err(e) => {
                error!(
                    component = "transport",
                    event = "transport.read_error",
                    error = %e,
                    "Error reading backend stdout"
                );
                break format!("read error: {}", e);
            }
        }
    };

    if let Some(e) = framer.finish() {
        warn!(
            component = "transport",
            event = "transport.record_dropped",
            error = %e,
            "Dropping partial record at end of stream"
        );
    }
    dispatcher.close(reason);
}

/// A spawned backend child process
pub struct BackendProcess {
    child: Arc<Mutex<Child>>,
}

impl BackendProcess {
    /// Spawn the backend and wire its stdio to a transport
    pub fn spawn(
        program: &Path,
        args: &[String],
        dispatcher: Arc<Dispatcher>,
    ) -> Result<(Self, Transport)> {
        info!(
            component = "transport",
            event = "transport.spawn",
            program = %program.display(),
            args = ?args,
            "Spawning backend process"
        );

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ClientError::Spawn(format!("{}: {}", program.display(), e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClientError::Spawn("No stdin on child".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::Spawn("No stdout on child".into()))?;

        // Forward stderr to the log
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let reader = BufReader::new(stderr);
                let mut lines = reader.lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(
                        component = "transport",
                        event = "backend.stderr",
                        line = %line,
                        "Backend stderr"
                    );
                }
            });
        }

        let transport = Transport::spawn(stdout, stdin, dispatcher);
        Ok((
            Self {
                child: Arc::new(Mutex::new(child)),
            },
            transport,
        ))
    }

    /// OS process id, if the child is still running
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.id()
    }

    /// Kill the backend and wait for it to exit
    pub async fn shutdown(&self) -> Result<()> {
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            warn!(
                component = "transport",
                event = "transport.kill_failed",
                error = %e,
                "Failed to kill backend"
            );
        }
        Ok(())
    }
}
