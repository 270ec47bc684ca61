//! Component B — Mediator Registry.
//!
//! The set of known export destinations, keyed by mediator ID, together
//! with their lifecycle and connection state. Owned exclusively by the
//! exporter loop.

use std::collections::HashMap;
use std::io;
use std::net::TcpStream;
use std::time::{Duration, Instant};

use socket2::Socket;
use tracing::{info, warn};

use crate::export_buffer::ExportBuffer;

/// Bounded drain attempted before queuing a fresh record behind whatever
/// is already buffered.
pub const BUF_BATCH_SIZE: usize = 10 * 1024 * 1024;

/// Grace period after `flag_all()` during which a re-announce clears
/// `awaitingconfirm`; anything still flagged when the timer expires is
/// halted by `purge_unconfirmed()`.
pub const UNCONFIRMED_PURGE_DELAY: Duration = Duration::from_secs(10);

/// Default ceiling on bytes buffered for a mediator with no known
/// address yet (an "unannounced" destination). The original source
/// buffers such entries without bound; this caps it.
pub const DEFAULT_UNANNOUNCED_BUFFER_CEILING: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediatorAddress {
    pub ip: String,
    pub port: String,
}

/// One export destination.
pub struct Mediator {
    pub mediatorid: u32,
    pub address: Option<MediatorAddress>,
    pub socket: Option<Socket>,
    pub buffer: ExportBuffer,
    pub awaitingconfirm: bool,
    pub halted: bool,
}

impl Mediator {
    fn new(mediatorid: u32, address: Option<MediatorAddress>, max_buffer_bytes: usize) -> Self {
        Mediator {
            mediatorid,
            address,
            socket: None,
            buffer: ExportBuffer::new(Some(max_buffer_bytes)),
            awaitingconfirm: false,
            halted: false,
        }
    }

    fn close_socket(&mut self) {
        self.socket = None;
    }

    /// Entry-local forward policy:
    /// - No socket → append to buffer.
    /// - Socket present, buffer non-empty → bounded drain; if bytes
    ///   remain, append the new record.
    /// - Socket present, buffer empty → direct non-blocking send; on
    ///   partial send, append with `already_sent`; on `WouldBlock`,
    ///   append with zero; on any other error, append, close, and
    ///   report failure so the caller tears the connection down.
    fn forward(&mut self, record: Vec<u8>) -> Result<(), ()> {
        let Some(socket) = self.socket.as_ref() else {
            self.buffer.append(record, 0);
            return Ok(());
        };

        if !self.buffer.is_empty() {
            if let Err(e) = self.buffer.transmit(socket, BUF_BATCH_SIZE) {
                warn!(mediatorid = self.mediatorid, error = %e, "mediator send failed during buffer drain");
                self.close_socket();
                self.buffer.append(record, 0);
                return Err(());
            }
            if !self.buffer.is_empty() {
                self.buffer.append(record, 0);
                return Ok(());
            }
        }

        match socket.send(&record) {
            Ok(n) if n == record.len() => Ok(()),
            Ok(n) => {
                self.buffer.append(record, n);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.buffer.append(record, 0);
                Ok(())
            }
            Err(e) => {
                warn!(mediatorid = self.mediatorid, error = %e, "mediator send failed");
                self.buffer.append(record, 0);
                self.close_socket();
                Err(())
            }
        }
    }

    fn connect(&mut self) -> bool {
        let Some(addr) = &self.address else {
            return false;
        };
        if self.socket.is_some() {
            return true;
        }

        let target = format!("{}:{}", addr.ip, addr.port);
        match TcpStream::connect(&target) {
            Ok(stream) => {
                stream.set_nonblocking(true).ok();
                let socket = Socket::from(stream);
                self.socket = Some(socket);
                self.buffer.reset_partial();
                true
            }
            Err(e) => {
                warn!(mediatorid = self.mediatorid, target = %target, error = %e, "failed to connect to mediator");
                false
            }
        }
    }
}

/// The exporter's registry of export destinations.
#[derive(Default)]
pub struct MediatorRegistry {
    mediators: HashMap<u32, Mediator>,
    unannounced_buffer_ceiling: usize,
    flagged_at: Option<Instant>,
}

impl MediatorRegistry {
    pub fn new() -> Self {
        MediatorRegistry {
            mediators: HashMap::new(),
            unannounced_buffer_ceiling: DEFAULT_UNANNOUNCED_BUFFER_CEILING,
            flagged_at: None,
        }
    }

    pub fn with_unannounced_ceiling(mut self, bytes: usize) -> Self {
        self.unannounced_buffer_ceiling = bytes;
        self
    }

    /// `MEDIATOR` announce: fills in address on a previously-unannounced
    /// entry, reconnects on an address change, or creates a brand new
    /// entry. Clears `awaitingconfirm`/`halted` in all cases.
    pub fn announce(&mut self, mediatorid: u32, address: MediatorAddress) {
        match self.mediators.get_mut(&mediatorid) {
            Some(existing) => {
                if existing.address.is_none() {
                    existing.address = Some(address);
                } else if existing.address.as_ref() != Some(&address) {
                    info!(mediatorid, "mediator address changed, reconnecting");
                    existing.address = Some(address);
                    existing.close_socket();
                }
                existing.awaitingconfirm = false;
                existing.halted = false;
            }
            None => {
                let max = DEFAULT_UNANNOUNCED_BUFFER_CEILING;
                self.mediators
                    .insert(mediatorid, Mediator::new(mediatorid, Some(address), max));
            }
        }
    }

    /// `DROP_SINGLE_MEDIATOR`: close the socket and mark halted, but
    /// retain the entry until a purge.
    pub fn drop_mediator(&mut self, mediatorid: u32) {
        if let Some(m) = self.mediators.get_mut(&mediatorid) {
            info!(mediatorid, "dropping export destination");
            m.close_socket();
            m.halted = true;
        }
    }

    /// Closes and removes every known mediator. Used by the
    /// `DropAllMediators` control message.
    pub fn drop_all(&mut self) {
        info!("dropping connections to all known mediators");
        self.mediators.clear();
        self.flagged_at = None;
    }

    /// Marks every entry `awaitingconfirm`, ahead of the provisioner
    /// re-sending its full mediator list.
    pub fn flag_all(&mut self) {
        for m in self.mediators.values_mut() {
            m.awaitingconfirm = true;
        }
        self.flagged_at = Some(Instant::now());
    }

    pub fn is_flagged(&self) -> bool {
        self.flagged_at.is_some()
    }

    /// Returns true once the 10s re-sync window has elapsed since
    /// `flag_all()` — callers use this to decide whether to run
    /// `purge_unconfirmed()`.
    pub fn flag_timeout_elapsed(&self) -> bool {
        self.flagged_at
            .map(|t| t.elapsed() >= UNCONFIRMED_PURGE_DELAY)
            .unwrap_or(false)
    }

    /// Closes and halts any entry still `awaitingconfirm`. Clears the
    /// flag timer.
    pub fn purge_unconfirmed(&mut self) {
        for m in self.mediators.values_mut() {
            if m.awaitingconfirm {
                info!(mediatorid = m.mediatorid, "purging unconfirmed mediator");
                m.close_socket();
                m.halted = true;
            }
        }
        self.flagged_at = None;
    }

    /// Attempts to connect every entry with no socket and a known
    /// address; flushes any buffered bytes immediately on success.
    /// Returns `(successes, failures)`.
    pub fn connect_all(&mut self) -> (usize, usize) {
        let mut successes = 0;
        let mut failures = 0;
        for m in self.mediators.values_mut() {
            if m.halted || m.address.is_none() {
                continue;
            }
            if m.socket.is_some() {
                successes += 1;
                continue;
            }
            if m.connect() {
                if m.buffer.buffered_bytes() > 0 {
                    if let Some(sock) = m.socket.as_ref() {
                        if m.buffer.transmit(sock, BUF_BATCH_SIZE).is_err() {
                            m.close_socket();
                            failures += 1;
                            continue;
                        }
                    }
                }
                successes += 1;
            } else {
                failures += 1;
            }
        }
        (successes, failures)
    }

    /// Looks up `destid`; if unknown, implicitly creates an
    /// "unannounced" entry (no address, buffer begins filling) and
    /// dispatches to it. Returns `Err(())` if the forward attempt
    /// observed a hard socket error (caller should already know the
    /// socket was closed).
    pub fn forward(&mut self, destid: u32, record: Vec<u8>) -> Result<(), ()> {
        let ceiling = self.unannounced_buffer_ceiling;
        let entry = self
            .mediators
            .entry(destid)
            .or_insert_with(|| Mediator::new(destid, None, ceiling));
        entry.forward(record)
    }

    pub fn get(&self, mediatorid: u32) -> Option<&Mediator> {
        self.mediators.get(&mediatorid)
    }

    pub fn len(&self) -> usize {
        self.mediators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mediators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    fn addr(ip: &str, port: u16) -> MediatorAddress {
        MediatorAddress {
            ip: ip.to_string(),
            port: port.to_string(),
        }
    }

    #[test]
    fn announce_creates_new_entry() {
        let mut reg = MediatorRegistry::new();
        reg.announce(1, addr("127.0.0.1", 9000));
        assert_eq!(reg.len(), 1);
        let m = reg.get(1).unwrap();
        assert!(!m.awaitingconfirm);
        assert!(!m.halted);
    }

    #[test]
    fn announce_fills_in_unannounced_entry() {
        let mut reg = MediatorRegistry::new();
        reg.forward(42, b"job-before-announce".to_vec()).unwrap();
        assert!(reg.get(42).unwrap().address.is_none());
        assert_eq!(reg.get(42).unwrap().buffer.buffered_bytes(), 19);

        reg.announce(42, addr("127.0.0.1", 6000));
        assert_eq!(reg.get(42).unwrap().address, Some(addr("127.0.0.1", 6000)));
        // Buffered bytes are preserved across the announce.
        assert_eq!(reg.get(42).unwrap().buffer.buffered_bytes(), 19);
    }

    #[test]
    fn announce_reconnects_on_address_change() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut reg = MediatorRegistry::new();
        reg.announce(1, addr("127.0.0.1", port));
        reg.connect_all();
        assert!(reg.get(1).unwrap().socket.is_some());

        reg.announce(1, addr("127.0.0.1", port + 1));
        assert!(reg.get(1).unwrap().socket.is_none());
    }

    #[test]
    fn drop_mediator_halts_but_retains_entry() {
        let mut reg = MediatorRegistry::new();
        reg.announce(1, addr("127.0.0.1", 9000));
        reg.drop_mediator(1);
        assert_eq!(reg.len(), 1);
        assert!(reg.get(1).unwrap().halted);
    }

    #[test]
    fn flag_all_and_purge_unconfirmed() {
        let mut reg = MediatorRegistry::new();
        reg.announce(1, addr("127.0.0.1", 9000));
        reg.announce(2, addr("127.0.0.1", 9001));
        reg.flag_all();
        // Mediator 1 re-announces (confirms), mediator 2 does not.
        reg.announce(1, addr("127.0.0.1", 9000));
        reg.purge_unconfirmed();
        assert!(!reg.get(1).unwrap().halted);
        assert!(reg.get(2).unwrap().halted);
    }

    #[test]
    fn forward_direct_send_on_empty_buffer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut reg = MediatorRegistry::new();
        reg.announce(1, addr("127.0.0.1", port));
        reg.connect_all();

        let (mut srv, _) = listener.accept().unwrap();
        reg.forward(1, b"hello".to_vec()).unwrap();

        let mut got = [0u8; 5];
        srv.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"hello");
        assert_eq!(reg.get(1).unwrap().buffer.buffered_bytes(), 0);
    }

    #[test]
    fn forward_buffers_when_no_socket() {
        let mut reg = MediatorRegistry::new();
        reg.announce(1, addr("127.0.0.1", 65534));
        // No connect attempted yet, so there's no socket.
        reg.forward(1, b"data".to_vec()).unwrap();
        assert_eq!(reg.get(1).unwrap().buffer.buffered_bytes(), 4);
    }

    #[test]
    fn order_preserved_to_same_mediator() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut reg = MediatorRegistry::new();
        reg.announce(1, addr("127.0.0.1", port));
        reg.connect_all();
        let (mut srv, _) = listener.accept().unwrap();

        reg.forward(1, b"R1".to_vec()).unwrap();
        reg.forward(1, b"R2".to_vec()).unwrap();

        let mut got = [0u8; 4];
        srv.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"R1R2");
    }

    #[test]
    fn unannounced_buffer_drops_oldest_past_ceiling() {
        let mut reg = MediatorRegistry::new().with_unannounced_ceiling(10);
        reg.forward(99, vec![0u8; 6]).unwrap();
        reg.forward(99, vec![1u8; 6]).unwrap();
        let m = reg.get(99).unwrap();
        assert_eq!(m.buffer.overflow_drops, 1);
    }

    #[test]
    fn socket_error_closes_connection_but_keeps_entry() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut reg = MediatorRegistry::new();
        reg.announce(1, addr("127.0.0.1", port));
        reg.connect_all();
        let (srv, _) = listener.accept().unwrap();
        drop(srv);

        // Give the OS a moment to deliver the RST/FIN; sends may take a
        // couple of attempts to observe the reset on some platforms, but
        // the buffering behaviour on the first failure is what matters.
        let _ = reg.forward(1, vec![0u8; 1]);
        let _ = reg.forward(1, vec![0u8; 1]);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn s3_unannounced_mediator_buffers_then_delivers_on_announce() {
        let mut reg = MediatorRegistry::new();

        // Jobs arrive for a destid the provisioner hasn't announced yet.
        reg.forward(7, b"first".to_vec()).unwrap();
        reg.forward(7, b"second".to_vec()).unwrap();
        assert_eq!(reg.len(), 1);
        assert!(reg.get(7).unwrap().address.is_none());
        assert_eq!(reg.get(7).unwrap().buffer.buffered_bytes(), 11);

        // The provisioner now announces a real address; the entry is
        // filled in, not recreated, and the buffered bytes survive.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        reg.announce(7, addr("127.0.0.1", port));
        let (successes, failures) = reg.connect_all();
        assert_eq!(successes, 1);
        assert_eq!(failures, 0);

        let (mut srv, _) = listener.accept().unwrap();

        // The next exporter tick drains the backlog onto the new socket.
        reg.forward(7, b"third".to_vec()).unwrap();

        let mut got = [0u8; 16];
        srv.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"firstsecondthird");
        assert_eq!(reg.get(7).unwrap().buffer.buffered_bytes(), 0);
    }
}
