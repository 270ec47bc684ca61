//! Component A — Export Buffer.
//!
//! Per-destination byte-oriented FIFO with partial-send resumption. A
//! [`Mediator`](crate::mediator::Mediator) owns exactly one of these.

use std::collections::VecDeque;
use std::io;

/// Minimal abstraction over "something you can write non-blocking bytes
/// to". `socket2::Socket` implements it directly; tests use an in-memory
/// stand-in so transmission logic can be exercised without a real
/// connection.
pub trait ByteSink {
    /// Attempt a non-blocking send of `buf`. Must return
    /// `ErrorKind::WouldBlock` rather than blocking when the socket
    /// cannot currently accept more data.
    fn send_nonblocking(&self, buf: &[u8]) -> io::Result<usize>;
}

impl ByteSink for socket2::Socket {
    fn send_nonblocking(&self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf)
    }
}

/// One fully-encoded record sitting in the queue.
#[derive(Debug, Clone)]
struct BufferedRecord {
    bytes: Vec<u8>,
}

/// Ordered byte queue holding fully encoded records awaiting delivery to
/// a single mediator.
///
/// Invariant: `partialfront` resets to zero whenever the socket is
/// (re)connected — the whole record at the head of the queue is
/// retransmitted, and downstream dedup at the mediator is relied upon.
#[derive(Debug, Default)]
pub struct ExportBuffer {
    queue: VecDeque<BufferedRecord>,
    partialfront: usize,
    buffered_bytes: usize,
    /// Count of records dropped because the buffer hit its configured
    /// ceiling. Exposed to observability per the design's overflow
    /// counter requirement.
    pub overflow_drops: u64,
    /// Ceiling on total buffered bytes before oldest records are
    /// dropped. `None` means unbounded (matches the source's behaviour,
    /// not recommended for production use — see DESIGN.md).
    pub max_bytes: Option<usize>,
}

impl ExportBuffer {
    pub fn new(max_bytes: Option<usize>) -> Self {
        ExportBuffer {
            queue: VecDeque::new(),
            partialfront: 0,
            buffered_bytes: 0,
            overflow_drops: 0,
            max_bytes,
        }
    }

    /// Appends `record`, recording `already_sent` as the count of bytes
    /// already transmitted on a prior partial send attempt (zero for a
    /// record that has never touched the wire).
    pub fn append(&mut self, record: Vec<u8>, already_sent: usize) {
        let len = record.len();
        self.queue.push_back(BufferedRecord { bytes: record });
        self.buffered_bytes += len;

        // The newly appended record is only "partially sent" if it is
        // also the head of the queue (i.e. the queue was empty before
        // this push). already_sent arriving on an append to a
        // non-empty queue would indicate a caller bug; we still track
        // it against the new tail's position by folding it into
        // partialfront only when this record becomes the head.
        if self.queue.len() == 1 {
            self.partialfront = already_sent.min(len);
        }

        self.enforce_ceiling();
    }

    fn enforce_ceiling(&mut self) {
        let Some(max) = self.max_bytes else {
            return;
        };
        while self.buffered_bytes > max && self.queue.len() > 1 {
            if let Some(dropped) = self.queue.pop_front() {
                self.buffered_bytes -= dropped.bytes.len();
                self.overflow_drops += 1;
                self.partialfront = 0;
            }
        }
    }

    /// Resets partial-send progress, e.g. after a fresh connect. The
    /// whole record at the head will be retransmitted.
    pub fn reset_partial(&mut self) {
        self.partialfront = 0;
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Writes up to `max_batch` bytes from the head of the queue,
    /// advancing `partialfront` on partial writes and freeing fully
    /// drained records. Returns the number of bytes actually written.
    ///
    /// On `WouldBlock`, returns `Ok(0)` — not an error, per the
    /// non-blocking send contract used throughout the exporter.
    pub fn transmit<S: ByteSink>(&mut self, sink: &S, max_batch: usize) -> io::Result<usize> {
        let mut total_written = 0usize;

        while total_written < max_batch {
            let Some(front) = self.queue.front() else {
                break;
            };

            let remaining_in_record = &front.bytes[self.partialfront..];
            if remaining_in_record.is_empty() {
                self.queue.pop_front();
                continue;
            }

            let budget = max_batch - total_written;
            let to_send = if remaining_in_record.len() > budget {
                &remaining_in_record[..budget]
            } else {
                remaining_in_record
            };

            match sink.send_nonblocking(to_send) {
                Ok(0) => break,
                Ok(n) => {
                    let short_write = n < to_send.len();
                    total_written += n;
                    self.partialfront += n;
                    self.buffered_bytes -= n;

                    if self.partialfront >= front.bytes.len() {
                        self.queue.pop_front();
                        self.partialfront = 0;
                    }

                    // A non-blocking socket accepting less than offered
                    // means its send buffer is full; further sends in
                    // this call would just spin on WouldBlock.
                    if short_write {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }

        Ok(total_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// In-memory sink that can be told to accept everything, accept
    /// partially, or refuse with WouldBlock / an arbitrary error.
    #[derive(Default)]
    struct MockSink {
        received: RefCell<Vec<u8>>,
        max_accept: Option<usize>,
        fail_with: Option<io::ErrorKind>,
    }

    impl ByteSink for MockSink {
        fn send_nonblocking(&self, buf: &[u8]) -> io::Result<usize> {
            if let Some(kind) = self.fail_with {
                return Err(io::Error::from(kind));
            }
            let n = self.max_accept.map(|m| m.min(buf.len())).unwrap_or(buf.len());
            self.received.borrow_mut().extend_from_slice(&buf[..n]);
            Ok(n)
        }
    }

    #[test]
    fn append_and_transmit_full_record() {
        let mut buf = ExportBuffer::new(None);
        buf.append(b"hello".to_vec(), 0);
        let sink = MockSink::default();
        let n = buf.transmit(&sink, 1024).unwrap();
        assert_eq!(n, 5);
        assert!(buf.is_empty());
        assert_eq!(&*sink.received.borrow(), b"hello");
    }

    #[test]
    fn partial_send_resumes_from_partialfront() {
        let mut buf = ExportBuffer::new(None);
        buf.append(b"hello world".to_vec(), 0);
        let sink = MockSink {
            max_accept: Some(5),
            ..Default::default()
        };
        let n = buf.transmit(&sink, 1024).unwrap();
        assert_eq!(n, 5);
        assert_eq!(buf.buffered_bytes(), 6);
        assert_eq!(&*sink.received.borrow(), b"hello");

        // Second transmit, on a sink with room for the rest, continues
        // from "world" (partialfront), not from the start of the record.
        let sink2 = MockSink::default();
        let n2 = buf.transmit(&sink2, 1024).unwrap();
        assert_eq!(n2, 6);
        assert!(buf.is_empty());
        assert_eq!(&*sink2.received.borrow(), b" world");
    }

    #[test]
    fn would_block_stops_without_error() {
        let mut buf = ExportBuffer::new(None);
        buf.append(b"data".to_vec(), 0);
        let sink = MockSink {
            fail_with: Some(io::ErrorKind::WouldBlock),
            ..Default::default()
        };
        let n = buf.transmit(&sink, 1024).unwrap();
        assert_eq!(n, 0);
        assert_eq!(buf.buffered_bytes(), 4);
    }

    #[test]
    fn reset_partial_retransmits_whole_head_record() {
        let mut buf = ExportBuffer::new(None);
        buf.append(b"hello".to_vec(), 0);
        let sink = MockSink {
            max_accept: Some(2),
            ..Default::default()
        };
        buf.transmit(&sink, 1024).unwrap();
        assert_eq!(buf.buffered_bytes(), 3);

        // Simulate reconnect: caller resets partialfront.
        buf.reset_partial();
        let sink2 = MockSink::default();
        let n = buf.transmit(&sink2, 1024).unwrap();
        // Whole record retransmitted, including the bytes already "sent"
        // on the old connection.
        assert_eq!(n, 5);
        assert_eq!(&*sink2.received.borrow(), b"hello");
    }

    #[test]
    fn order_is_preserved_across_records() {
        let mut buf = ExportBuffer::new(None);
        buf.append(b"AAA".to_vec(), 0);
        buf.append(b"BBB".to_vec(), 0);
        let sink = MockSink::default();
        buf.transmit(&sink, 1024).unwrap();
        assert_eq!(&*sink.received.borrow(), b"AAABBB");
    }

    #[test]
    fn ceiling_drops_oldest_on_overflow() {
        let mut buf = ExportBuffer::new(Some(10));
        buf.append(vec![0u8; 6], 0);
        buf.append(vec![1u8; 6], 0);
        assert_eq!(buf.overflow_drops, 1);
        assert_eq!(buf.buffered_bytes(), 6);
    }

    #[test]
    fn hard_error_propagates() {
        let mut buf = ExportBuffer::new(None);
        buf.append(b"x".to_vec(), 0);
        let sink = MockSink {
            fail_with: Some(io::ErrorKind::ConnectionReset),
            ..Default::default()
        };
        assert!(buf.transmit(&sink, 1024).is_err());
    }
}
