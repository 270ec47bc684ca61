//! Component F — IMAP Session Tracker.
//!
//! Per-TCP-flow reassembler. Consumes interleaved client/server bytes in
//! capture order, tracks the IMAP command/reply protocol state machine,
//! redacts SASL PLAIN credentials before they ever reach an emitted CC
//! record, and produces synthetic [`Job`]s for the exporter queue.
//!
//! Parsing is resumable: a line that hasn't fully arrived yet just
//! leaves the cursor where it was: there is no stack-captured
//! continuation, only explicit offsets (see [`ContentBuffer`]).

use std::collections::{HashMap, VecDeque};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};

use crate::intercept::Liid;
use crate::job::{AccessTech, Direction, IpAssign, Job};

const GROWTH_INCREMENT: usize = 4096;

/// Direction a chunk of bytes travelled on the wire, as reported by the
/// capture worker feeding this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpDirection {
    ClientToServer,
    ServerToClient,
}

impl TcpDirection {
    fn to_cc_direction(self) -> Direction {
        match self {
            TcpDirection::ClientToServer => Direction::FromSubject,
            TcpDirection::ServerToClient => Direction::ToSubject,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImapState {
    Init,
    ServerReady,
    PreAuth,
    AuthStarted,
    Authenticating,
    Authenticated,
    Idling,
    Logout,
    SessionOver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    Plain,
    OtherUnsupported,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoint {
    pub ip: String,
    pub port: String,
}

/// Five-tuple-equivalent endpoints for this session, updated by an `ID`
/// command.
#[derive(Debug, Clone, Default)]
pub struct SessionEndpoints {
    pub client: Endpoint,
    pub server: Endpoint,
}

/// Append-only byte log with an explicit, resumable scan cursor. Grows
/// in 4 KiB increments; parsers never retain raw pointers across a
/// growth.
#[derive(Debug, Default)]
struct ContentBuffer {
    data: Vec<u8>,
    scan_cursor: usize,
}

impl ContentBuffer {
    fn push(&mut self, bytes: &[u8]) {
        let needed = self.data.len() + bytes.len();
        if needed > self.data.capacity() {
            let short = needed - self.data.capacity();
            let increments = short.div_ceil(GROWTH_INCREMENT).max(1);
            self.data.reserve(increments * GROWTH_INCREMENT);
        }
        self.data.extend_from_slice(bytes);
    }

    /// Returns `(line_start, line_end_exclusive_of_crlf, line_end_after_crlf)`
    /// for the next complete `\r\n`-terminated line at or after the scan
    /// cursor, advancing the cursor past it. Returns `None` ("need more
    /// data") without moving the cursor if no terminator has arrived yet.
    fn next_line(&mut self) -> Option<(usize, usize, usize)> {
        let rest = &self.data[self.scan_cursor..];
        let pos = rest.windows(2).position(|w| w == b"\r\n")?;
        let start = self.scan_cursor;
        let end = start + pos;
        let after = end + 2;
        self.scan_cursor = after;
        Some((start, end, after))
    }
}

struct PendingCommand {
    cmd_bytes: Vec<u8>,
    reply_bytes: Vec<u8>,
}

enum LineKind<'a> {
    Untagged(&'a [u8]),
    Continuation(&'a [u8]),
    Tagged(&'a str, &'a [u8]),
}

fn classify_line(line: &[u8]) -> LineKind<'_> {
    if line.first() == Some(&b'*') {
        return LineKind::Untagged(strip_leading_space(&line[1.min(line.len())..]));
    }
    if line.first() == Some(&b'+') {
        return LineKind::Continuation(strip_leading_space(&line[1.min(line.len())..]));
    }
    match line.iter().position(|&b| b == b' ') {
        Some(sp) => {
            let tag = std::str::from_utf8(&line[..sp]).unwrap_or("");
            LineKind::Tagged(tag, &line[sp + 1..])
        }
        None => LineKind::Tagged(std::str::from_utf8(line).unwrap_or(""), &[]),
    }
}

fn strip_leading_space(rest: &[u8]) -> &[u8] {
    if rest.first() == Some(&b' ') {
        &rest[1..]
    } else {
        rest
    }
}

fn starts_with_word(rest: &[u8], word: &str) -> bool {
    rest.len() >= word.len() && rest[..word.len()].eq_ignore_ascii_case(word.as_bytes())
}

fn first_word(rest: &[u8]) -> (&[u8], &[u8]) {
    match rest.iter().position(|&b| b == b' ') {
        Some(sp) => (&rest[..sp], &rest[sp + 1..]),
        None => (rest, &[]),
    }
}

/// Per-TCP-flow IMAP reassembly state, one instance per intercepted
/// session.
pub struct ImapSession {
    liid: Liid,
    cin: u32,
    destid: u32,
    buf: ContentBuffer,
    state: ImapState,
    mailbox: Option<String>,
    auth_kind: Option<AuthKind>,
    pending: HashMap<String, PendingCommand>,
    pending_order: VecDeque<String>,
    idle_segment_start: Option<usize>,
    pub endpoints: SessionEndpoints,
    pub client_octets: u64,
    pub server_octets: u64,
}

impl ImapSession {
    pub fn new(liid: Liid, cin: u32, destid: u32) -> Self {
        ImapSession {
            liid,
            cin,
            destid,
            buf: ContentBuffer::default(),
            state: ImapState::Init,
            mailbox: None,
            auth_kind: None,
            pending: HashMap::new(),
            pending_order: VecDeque::new(),
            idle_segment_start: None,
            endpoints: SessionEndpoints::default(),
            client_octets: 0,
            server_octets: 0,
        }
    }

    pub fn state(&self) -> &ImapState {
        &self.state
    }

    pub fn mailbox(&self) -> Option<&str> {
        self.mailbox.as_deref()
    }

    /// Feeds one contiguous chunk of bytes, all travelling in the same
    /// `direction`, into the session. Returns any jobs produced by lines
    /// that completed as a result.
    pub fn feed(&mut self, bytes: &[u8], direction: TcpDirection, timestamp: DateTime<Utc>) -> Vec<Job> {
        match direction {
            TcpDirection::ClientToServer => self.client_octets += bytes.len() as u64,
            TcpDirection::ServerToClient => self.server_octets += bytes.len() as u64,
        }
        self.buf.push(bytes);

        let mut jobs = Vec::new();
        if self.state == ImapState::SessionOver {
            // Terminal: still consume bytes for accounting, emit nothing.
            self.buf.scan_cursor = self.buf.data.len();
            return jobs;
        }

        while let Some((start, end, after)) = self.buf.next_line() {
            self.process_line(start, end, after, direction, timestamp, &mut jobs);
            if self.state == ImapState::SessionOver {
                break;
            }
        }
        jobs
    }

    fn process_line(
        &mut self,
        start: usize,
        end: usize,
        after: usize,
        direction: TcpDirection,
        timestamp: DateTime<Utc>,
        jobs: &mut Vec<Job>,
    ) {
        if self.state == ImapState::Idling {
            self.process_idle_line(start, end, after, direction, jobs);
            return;
        }

        let line = self.buf.data[start..end].to_vec();
        let full_line = self.buf.data[start..after].to_vec();

        match classify_line(&line) {
            LineKind::Untagged(rest) => {
                if starts_with_word(rest, "OK") && self.state == ImapState::Init {
                    // "* OK ..." banner: collapses SERVER_READY straight
                    // into PRE_AUTH since the banner is a single line.
                    self.state = ImapState::PreAuth;
                    return;
                }
                if starts_with_word(rest, "BYE") && self.state != ImapState::Logout {
                    self.finish_session(jobs);
                    return;
                }
                if let Some(tag) = self.pending_order.front().cloned() {
                    if let Some(p) = self.pending.get_mut(&tag) {
                        p.reply_bytes.extend_from_slice(&full_line);
                    }
                }
            }
            LineKind::Continuation(_) => {
                if self.state == ImapState::AuthStarted {
                    self.state = ImapState::Authenticating;
                }
            }
            LineKind::Tagged(tag, rest) => {
                let (word, arg) = first_word(rest);
                if word.eq_ignore_ascii_case(b"OK") || word.eq_ignore_ascii_case(b"NO") || word.eq_ignore_ascii_case(b"BAD") {
                    self.complete_command(tag, &full_line, jobs, timestamp);
                    return;
                }
                self.handle_client_command(tag, word, arg, &full_line, direction, timestamp, jobs);
            }
        }
    }

    fn handle_client_command(
        &mut self,
        tag: &str,
        word: &[u8],
        arg: &[u8],
        full_line: &[u8],
        direction: TcpDirection,
        timestamp: DateTime<Utc>,
        jobs: &mut Vec<Job>,
    ) {
        if word.eq_ignore_ascii_case(b"AUTHENTICATE") {
            self.handle_authenticate(tag, arg, full_line, jobs, timestamp);
            return;
        }

        if self.state == ImapState::Authenticating {
            // Bare continuation token line (multi-line SASL exchange).
            self.handle_sasl_token(full_line, jobs, timestamp);
            return;
        }

        if word.eq_ignore_ascii_case(b"IDLE") {
            self.state = ImapState::Idling;
            self.idle_segment_start = None;
            self.pending.insert(
                tag.to_string(),
                PendingCommand {
                    cmd_bytes: full_line.to_vec(),
                    reply_bytes: Vec::new(),
                },
            );
            self.pending_order.push_back(tag.to_string());
            return;
        }

        if word.eq_ignore_ascii_case(b"LOGOUT") {
            self.state = ImapState::Logout;
        }

        if word.eq_ignore_ascii_case(b"ID") {
            self.apply_id_rewrite(arg);
        }

        let _ = direction;
        self.pending.insert(
            tag.to_string(),
            PendingCommand {
                cmd_bytes: full_line.to_vec(),
                reply_bytes: Vec::new(),
            },
        );
        self.pending_order.push_back(tag.to_string());
    }

    fn handle_authenticate(
        &mut self,
        tag: &str,
        arg: &[u8],
        full_line: &[u8],
        jobs: &mut Vec<Job>,
        timestamp: DateTime<Utc>,
    ) {
        let (mechanism, inline_token) = first_word(arg);
        let is_plain = mechanism.eq_ignore_ascii_case(b"PLAIN");
        self.auth_kind = Some(if is_plain { AuthKind::Plain } else { AuthKind::OtherUnsupported });

        if inline_token.is_empty() {
            self.state = ImapState::AuthStarted;
            self.pending.insert(
                tag.to_string(),
                PendingCommand {
                    cmd_bytes: full_line.to_vec(),
                    reply_bytes: Vec::new(),
                },
            );
            self.pending_order.push_back(tag.to_string());
            return;
        }

        let cmd_bytes = if is_plain {
            self.redact_plain_line(full_line, inline_token)
        } else {
            full_line.to_vec()
        };

        self.pending.insert(
            tag.to_string(),
            PendingCommand {
                cmd_bytes,
                reply_bytes: Vec::new(),
            },
        );
        self.pending_order.push_back(tag.to_string());

        self.transition_to_authenticated(jobs, timestamp);
    }

    fn handle_sasl_token(&mut self, full_line: &[u8], jobs: &mut Vec<Job>, timestamp: DateTime<Utc>) {
        let token = full_line
            .strip_suffix(b"\r\n")
            .unwrap_or(full_line);

        if self.auth_kind == Some(AuthKind::Plain) {
            let redacted = self.redact_plain_line(full_line, token);
            if let Some(tag) = self.pending_order.back().cloned() {
                if let Some(p) = self.pending.get_mut(&tag) {
                    p.cmd_bytes = redacted;
                }
            }
        }

        self.transition_to_authenticated(jobs, timestamp);
    }

    /// Decodes the PLAIN SASL token (`authzid \0 authcid \0 password`),
    /// captures `authcid` as the mailbox, and returns `full_line` with
    /// the token replaced by a re-encoded `mailbox \0 XXX \0 XXX` form —
    /// same structural shape, no live credentials.
    fn redact_plain_line(&mut self, full_line: &[u8], token: &[u8]) -> Vec<u8> {
        let decoded = match BASE64.decode(token) {
            Ok(d) => d,
            Err(_) => return full_line.to_vec(),
        };
        let parts: Vec<&[u8]> = decoded.splitn(3, |&b| b == 0).collect();
        let authcid = if parts.len() == 3 {
            String::from_utf8_lossy(parts[1]).to_string()
        } else {
            String::new()
        };
        if !authcid.is_empty() {
            self.mailbox = Some(authcid.clone());
        }

        let redacted_plain = format!("{authcid}\0XXX\0XXX");
        let redacted_token = BASE64.encode(redacted_plain.as_bytes());

        let token_start = full_line
            .windows(token.len().max(1))
            .position(|w| w == token)
            .unwrap_or(0);
        let mut out = Vec::with_capacity(full_line.len());
        out.extend_from_slice(&full_line[..token_start]);
        out.extend_from_slice(redacted_token.as_bytes());
        out.extend_from_slice(&full_line[token_start + token.len()..]);
        out
    }

    fn transition_to_authenticated(&mut self, jobs: &mut Vec<Job>, timestamp: DateTime<Utc>) {
        self.state = ImapState::Authenticated;
        jobs.push(self.auth_iri(timestamp));
    }

    fn auth_iri(&self, timestamp: DateTime<Utc>) -> Job {
        Job::Ipiri {
            destid: self.destid,
            liid: self.liid.clone(),
            cin: self.cin,
            special: 0,
            access_tech: AccessTech::Other,
            ip_assign: IpAssign::Unknown,
            family: 0,
            prefixbits: 0,
            addr: Vec::new(),
            timestamp,
            username: self.mailbox.clone().unwrap_or_default(),
        }
    }

    fn apply_id_rewrite(&mut self, arg: &[u8]) {
        let text = String::from_utf8_lossy(arg);
        let tokens: Vec<&str> = text
            .split(|c: char| c == '"' || c == '(' || c == ')')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        let mut i = 0;
        while i + 1 < tokens.len() {
            let key = tokens[i].to_ascii_lowercase();
            let value = tokens[i + 1].to_string();
            match key.as_str() {
                "x-originating-ip" => self.endpoints.client.ip = value,
                "x-originating-port" => self.endpoints.client.port = value,
                "x-connected-ip" => self.endpoints.server.ip = value,
                "x-connected-port" => self.endpoints.server.port = value,
                _ => {}
            }
            i += 2;
        }
    }

    fn complete_command(&mut self, tag: &str, tail_line: &[u8], jobs: &mut Vec<Job>, timestamp: DateTime<Utc>) {
        let Some(pending) = self.pending.remove(tag) else {
            return;
        };
        self.pending_order.retain(|t| t != tag);

        if !pending.cmd_bytes.is_empty() {
            jobs.push(self.cc_job(pending.cmd_bytes, Direction::FromSubject, timestamp));
        }
        let mut reply = pending.reply_bytes;
        reply.extend_from_slice(tail_line);
        if !reply.is_empty() {
            jobs.push(self.cc_job(reply, Direction::ToSubject, timestamp));
        }

        if self.state == ImapState::Logout {
            self.finish_session(jobs);
        }
    }

    fn process_idle_line(
        &mut self,
        start: usize,
        end: usize,
        after: usize,
        direction: TcpDirection,
        jobs: &mut Vec<Job>,
    ) {
        let line = &self.buf.data[start..end];

        match direction {
            TcpDirection::ServerToClient => {
                if line.first() == Some(&b'+') && self.idle_segment_start.is_none() {
                    self.idle_segment_start = Some(start);
                }
            }
            TcpDirection::ClientToServer => {
                if line == b"DONE" {
                    let done_start = start;
                    let done_end = after;
                    let segment_start = self.idle_segment_start.unwrap_or(done_start);

                    let server_to_client = self.buf.data[segment_start..done_start].to_vec();
                    let client_to_server = self.buf.data[done_start..done_end].to_vec();

                    if !server_to_client.is_empty() {
                        jobs.push(self.cc_job(server_to_client, Direction::ToSubject, Utc::now()));
                    }
                    jobs.push(self.cc_job(client_to_server, Direction::FromSubject, Utc::now()));

                    self.idle_segment_start = None;
                    self.state = ImapState::Authenticated;
                }
            }
        }
    }

    fn cc_job(&self, ip_content: Vec<u8>, direction: Direction, timestamp: DateTime<Utc>) -> Job {
        Job::Ipcc {
            destid: self.destid,
            liid: self.liid.clone(),
            cin: self.cin,
            direction,
            timestamp,
            ip_content,
        }
    }

    fn finish_session(&mut self, jobs: &mut Vec<Job>) {
        self.state = ImapState::SessionOver;
        jobs.push(self.auth_iri(Utc::now()));
    }
}
