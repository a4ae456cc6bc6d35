//! Bidirectional byte relay with half-close propagation.
//!
//! Each direction is driven as an independent poll-based state machine
//! within a single future, so back-pressure on one direction never stalls
//! the other. A clean end-of-stream on one side shuts down the write half
//! of the opposite side (half-close); an I/O error finishes only the
//! affected direction while the other runs to natural completion, and the
//! first error is surfaced as the aggregate result.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant;

/// Bytes moved in each direction by a finished relay.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayOutcome {
    /// Bytes copied from the client to the target.
    pub client_to_target: u64,
    /// Bytes copied from the target back to the client.
    pub target_to_client: u64,
}

/// State machine for one-directional copy with flush.
enum CopyState {
    Reading,
    Writing(usize, usize), // (pos, len)
    Flushing(usize),       // bytes flushing
    ShuttingDown,
    Done,
}

/// Result of polling one copy direction.
enum CopyPoll {
    /// Data was flushed — contains byte count.
    Flushed(usize),
    /// Direction finished (EOF + shutdown).
    Finished,
}

/// Poll-driven one-directional copy: read → write → flush.
fn poll_copy_direction<R, W>(
    cx: &mut Context<'_>,
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
    state: &mut CopyState,
) -> Poll<io::Result<CopyPoll>>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    loop {
        match state {
            CopyState::Reading => {
                let mut read_buf = ReadBuf::new(buf);
                match Pin::new(&mut *reader).poll_read(cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => {
                        let n = read_buf.filled().len();
                        if n == 0 {
                            *state = CopyState::ShuttingDown;
                        } else {
                            *state = CopyState::Writing(0, n);
                        }
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            CopyState::Writing(pos, len) => {
                match Pin::new(&mut *writer).poll_write(cx, &buf[*pos..*len]) {
                    Poll::Ready(Ok(n)) => {
                        *pos += n;
                        if *pos >= *len {
                            let total = *len;
                            *state = CopyState::Flushing(total);
                        }
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            CopyState::Flushing(bytes) => {
                let bytes = *bytes;
                match Pin::new(&mut *writer).poll_flush(cx) {
                    Poll::Ready(Ok(())) => {
                        *state = CopyState::Reading;
                        return Poll::Ready(Ok(CopyPoll::Flushed(bytes)));
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            CopyState::ShuttingDown => match Pin::new(&mut *writer).poll_shutdown(cx) {
                Poll::Ready(_) => {
                    *state = CopyState::Done;
                    return Poll::Ready(Ok(CopyPoll::Finished));
                }
                Poll::Pending => return Poll::Pending,
            },
            CopyState::Done => return Poll::Ready(Ok(CopyPoll::Finished)),
        }
    }
}

/// Full-duplex relay between `client` and `target`.
///
/// Runs until both directions have finished (EOF plus shutdown of the
/// opposite write half, or error), or until neither direction has moved
/// data within `idle_timeout`. Returns the per-direction byte counts, or
/// the first I/O error if either direction failed.
pub async fn relay_bidirectional<A, B>(
    client: A,
    target: B,
    idle_timeout: Duration,
    buffer_size: usize,
) -> io::Result<RelayOutcome>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_r, mut client_w) = tokio::io::split(client);
    let (mut target_r, mut target_w) = tokio::io::split(target);

    let mut buf_a = vec![0u8; buffer_size];
    let mut buf_b = vec![0u8; buffer_size];
    let mut state_a = CopyState::Reading;
    let mut state_b = CopyState::Reading;

    let mut outcome = RelayOutcome::default();
    let mut first_error: Option<io::Error> = None;

    let idle_sleep = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle_sleep);

    let mut a_done = false;
    let mut b_done = false;

    loop {
        if a_done && b_done {
            break;
        }

        // Poll both directions concurrently. Each registers its own waker
        // so either can make progress independently. An errored direction
        // is marked done; the other keeps running.
        let both = std::future::poll_fn(|cx| {
            let mut any_ready = false;
            let mut activity = false;

            if !a_done {
                match poll_copy_direction(cx, &mut client_r, &mut target_w, &mut buf_a, &mut state_a)
                {
                    Poll::Ready(Ok(CopyPoll::Flushed(n))) => {
                        outcome.client_to_target += n as u64;
                        activity = true;
                        any_ready = true;
                    }
                    Poll::Ready(Ok(CopyPoll::Finished)) => {
                        a_done = true;
                        any_ready = true;
                    }
                    Poll::Ready(Err(e)) => {
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                        a_done = true;
                        any_ready = true;
                    }
                    Poll::Pending => {}
                }
            }

            if !b_done {
                match poll_copy_direction(cx, &mut target_r, &mut client_w, &mut buf_b, &mut state_b)
                {
                    Poll::Ready(Ok(CopyPoll::Flushed(n))) => {
                        outcome.target_to_client += n as u64;
                        activity = true;
                        any_ready = true;
                    }
                    Poll::Ready(Ok(CopyPoll::Finished)) => {
                        b_done = true;
                        any_ready = true;
                    }
                    Poll::Ready(Err(e)) => {
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                        b_done = true;
                        any_ready = true;
                    }
                    Poll::Pending => {}
                }
            }

            if any_ready {
                Poll::Ready(activity)
            } else {
                Poll::Pending
            }
        });

        tokio::select! {
            activity = both => {
                if activity {
                    idle_sleep.as_mut().reset(Instant::now() + idle_timeout);
                }
            }
            _ = &mut idle_sleep => {
                break;
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(outcome),
    }
}
