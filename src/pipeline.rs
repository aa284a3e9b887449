// src/pipeline.rs
// =============================================================================
// The streaming pipeline.
//
// PushWriter wraps the real downstream writer. Every byte written to it goes
// downstream unchanged, and a copy goes into a bounded pipe whose other end
// is read by a background scan task:
//
//   write(buf) ──► downstream
//        │
//        └──copy──► duplex pipe ──► scan task ──► sink
//                                      │
//                                      └──► recursive children (barrier)
//
// PushReader is the same tee on the read side: bytes read from the wrapped
// reader are handed to the caller and copied into the scan pipe.
//
// Backpressure: a write (or read) that cannot hand its copy to the pipe
// returns Pending, so a slow scanner throttles the caller instead of growing
// a buffer. At most one call's worth of bytes waits on the pipe.
//
// `close()` ends the scanner's input, waits for the whole scan tree and
// returns whatever the scan reported; a PushReader reports it in place of
// end-of-file. If the scan fails early, the task keeps reading and
// discarding the pipe so the caller is never stuck.
// =============================================================================

use std::future::{poll_fn, Future};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{PushError, ScanError};
use crate::resolve::DocumentAddress;
use crate::scan::{Barrier, Mimetype, ScanTask, Scanner};
use crate::sink::Sink;

type ScanHandle = JoinHandle<Result<(), PushError>>;

// Write end of the scan pipe plus the bytes it has not taken yet
struct Tee {
    pipe: Option<DuplexStream>,
    pending: Vec<u8>,
    pos: usize,
}

impl Tee {
    // Spawns `scan` on the read end of a new pipe of `capacity` bytes.
    fn spawn<F, Fut>(capacity: usize, scan: F) -> (Tee, ScanHandle)
    where
        F: FnOnce(DuplexStream) -> Fut,
        Fut: Future<Output = Result<(), PushError>> + Send + 'static,
    {
        let (pipe, reader) = tokio::io::duplex(capacity);
        let tee = Tee {
            pipe: Some(pipe),
            pending: Vec::new(),
            pos: 0,
        };
        (tee, tokio::spawn(scan(reader)))
    }

    fn queue(&mut self, bytes: &[u8]) {
        if self.pipe.is_some() {
            self.pending.extend_from_slice(bytes);
        }
    }

    // Hands pending bytes to the scanner. A broken pipe detaches the tee;
    // delivery to the caller goes on regardless.
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        while let Some(pipe) = self.pipe.as_mut() {
            if self.pos == self.pending.len() {
                self.pending.clear();
                self.pos = 0;
                return Poll::Ready(());
            }
            match Pin::new(pipe).poll_write(cx, &self.pending[self.pos..]) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(n)) if n > 0 => self.pos += n,
                Poll::Ready(Ok(_)) | Poll::Ready(Err(_)) => {
                    debug!("scan input closed early, detaching tee");
                    self.close();
                }
            }
        }
        Poll::Ready(())
    }

    // Ends the scanner's input. Call after draining.
    fn close(&mut self) {
        self.pipe = None;
        self.pending.clear();
        self.pos = 0;
    }
}

fn root_scan(
    scanner: &Scanner,
    document: &DocumentAddress,
    mimetype: Mimetype,
    sink: Arc<dyn Sink>,
) -> Result<(Tee, ScanHandle), ScanError> {
    let (task, barrier) = scanner.root(document, sink)?;
    Ok(Tee::spawn(scanner.pipe_capacity(), move |reader| async move {
        scan_stream(task, barrier, reader, mimetype)
            .await
            .map_err(PushError::from)
    }))
}

/// Tees everything written into a concurrently running scan.
pub struct PushWriter<W> {
    inner: W,
    tee: Tee,
    scan: Option<ScanHandle>,
}

impl<W> PushWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Starts scanning whatever is written to the returned writer as a
    /// `mimetype` document at `document`, sending accepted URIs to `sink`.
    pub fn new(
        inner: W,
        scanner: &Scanner,
        document: &DocumentAddress,
        mimetype: Mimetype,
        sink: Arc<dyn Sink>,
    ) -> Result<Self, ScanError> {
        let (tee, scan) = root_scan(scanner, document, mimetype, sink)?;
        Ok(PushWriter {
            inner,
            tee,
            scan: Some(scan),
        })
    }

    /// Spawns `scan` on the read end of a new tee pipe of `capacity` bytes.
    pub(crate) fn spawn<F, Fut>(inner: W, capacity: usize, scan: F) -> Self
    where
        F: FnOnce(DuplexStream) -> Fut,
        Fut: Future<Output = Result<(), PushError>> + Send + 'static,
    {
        let (tee, scan) = Tee::spawn(capacity, scan);
        PushWriter {
            inner,
            tee,
            scan: Some(scan),
        }
    }

    /// Ends the scanner's input, waits for the scan (recursive children
    /// included) and reports the scan's outcome.
    ///
    /// The downstream writer is flushed but not shut down.
    pub async fn close(&mut self) -> Result<(), PushError> {
        poll_fn(|cx| self.tee.poll_drain(cx)).await;
        self.tee.close();

        let flushed = self.inner.flush().await;
        let scanned = match self.scan.take() {
            Some(handle) => handle.await?,
            None => Ok(()),
        };
        scanned?;
        flushed?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Gives the downstream writer back. Call `close` first: a writer that
    /// was never closed leaves its scan running detached.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W> AsyncWrite for PushWriter<W>
where
    W: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.tee.poll_drain(cx));

        let n = ready!(Pin::new(&mut this.inner).poll_write(cx, buf))?;
        this.tee.queue(&buf[..n]);
        // start handing the copy over; the rest waits for the next call
        let _ = this.tee.poll_drain(cx);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.tee.poll_drain(cx));
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.tee.poll_drain(cx));
        this.tee.close();
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

/// Tees everything read into a concurrently running scan.
///
/// At end of input the reader waits for the scan tree; a failed scan is
/// returned as an `io::Error` wrapping the `PushError` instead of EOF.
pub struct PushReader<R> {
    inner: R,
    tee: Tee,
    eof: bool,
    scan: Option<ScanHandle>,
}

impl<R> PushReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Starts scanning whatever is read through the returned reader as a
    /// `mimetype` document at `document`, sending accepted URIs to `sink`.
    pub fn new(
        inner: R,
        scanner: &Scanner,
        document: &DocumentAddress,
        mimetype: Mimetype,
        sink: Arc<dyn Sink>,
    ) -> Result<Self, ScanError> {
        let (tee, scan) = root_scan(scanner, document, mimetype, sink)?;
        Ok(PushReader {
            inner,
            tee,
            eof: false,
            scan: Some(scan),
        })
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Gives the wrapped reader back; an unfinished scan keeps running
    /// detached.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R> AsyncRead for PushReader<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        ready!(this.tee.poll_drain(cx));

        if !this.eof {
            let before = buf.filled().len();
            ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
            if buf.filled().len() > before {
                this.tee.queue(&buf.filled()[before..]);
                let _ = this.tee.poll_drain(cx);
                return Poll::Ready(Ok(()));
            }
            this.eof = true;
            this.tee.close();
        }

        if let Some(scan) = this.scan.as_mut() {
            let outcome = ready!(Pin::new(scan).poll(cx));
            this.scan = None;
            if let Err(err) = outcome.map_err(PushError::from).and_then(|scanned| scanned) {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, err)));
            }
        }
        Poll::Ready(Ok(()))
    }
}

/// Runs a root scan task over the tee's read end.
///
/// On failure the rest of the input is read and thrown away before the
/// error is returned, so the feeding side never blocks on a full pipe.
/// Returns only after every recursive child has finished.
pub(crate) async fn scan_stream<R>(
    task: ScanTask,
    barrier: Barrier,
    mut reader: R,
    mimetype: Mimetype,
) -> Result<(), ScanError>
where
    R: AsyncRead + Unpin + Send,
{
    let result = task.run(&mut reader, mimetype).await;
    if let Err(err) = &result {
        debug!(document = %task.document(), error = %err, "root scan failed, draining input");
        let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
    }
    drop(task);
    barrier.wait().await;
    result
}
