//! Component G — SIP/VoIP parser, sibling of the IMAP tracker.
//!
//! Deliberately minimal: recognises REGISTER / INVITE / BYE request
//! lines and emits call-begin/call-end IRIs. A full re-derivation of
//! `sipparsing.c`'s dialog and SDP handling is out of scope here — this
//! exists to demonstrate the tagged-variant-per-tracker pattern noted
//! in the design notes, not to replace a real SIP stack.

use chrono::{DateTime, Utc};

use crate::intercept::Liid;
use crate::job::{AccessTech, Job};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SipCallState {
    Idle,
    Registered,
    InviteSent,
    InCall,
    Ended,
}

pub struct SipSession {
    liid: Liid,
    cin: u32,
    destid: u32,
    state: SipCallState,
}

impl SipSession {
    pub fn new(liid: Liid, cin: u32, destid: u32) -> Self {
        SipSession {
            liid,
            cin,
            destid,
            state: SipCallState::Idle,
        }
    }

    pub fn state(&self) -> &SipCallState {
        &self.state
    }

    /// Same capability signature as [`crate::imap::ImapSession::feed`]:
    /// one contiguous chunk, one direction, one timestamp in, a batch of
    /// jobs out.
    pub fn feed(&mut self, bytes: &[u8], timestamp: DateTime<Utc>) -> Vec<Job> {
        let mut jobs = Vec::new();
        let text = String::from_utf8_lossy(bytes);
        let first_line = text.lines().next().unwrap_or("");

        if first_line.starts_with("REGISTER ") {
            self.state = SipCallState::Registered;
            jobs.push(self.iri(timestamp, "register"));
        } else if first_line.starts_with("INVITE ") {
            self.state = SipCallState::InviteSent;
            jobs.push(self.iri(timestamp, "invite"));
        } else if first_line.starts_with("BYE ") {
            self.state = SipCallState::Ended;
            jobs.push(self.iri(timestamp, "bye"));
        } else if first_line.starts_with("SIP/2.0 200") && self.state == SipCallState::InviteSent {
            self.state = SipCallState::InCall;
        }

        jobs
    }

    fn iri(&self, timestamp: DateTime<Utc>, username: &str) -> Job {
        Job::Ipiri {
            destid: self.destid,
            liid: self.liid.clone(),
            cin: self.cin,
            special: 0,
            access_tech: AccessTech::Other,
            ip_assign: crate::job::IpAssign::Unknown,
            family: 0,
            prefixbits: 0,
            addr: Vec::new(),
            timestamp,
            username: username.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invite_then_200_ok_reaches_in_call() {
        let mut s = SipSession::new(Liid::from("X"), 1, 1);
        let jobs = s.feed(b"INVITE sip:bob@example.com SIP/2.0\r\n", Utc::now());
        assert_eq!(jobs.len(), 1);
        assert_eq!(s.state(), &SipCallState::InviteSent);
        s.feed(b"SIP/2.0 200 OK\r\n", Utc::now());
        assert_eq!(s.state(), &SipCallState::InCall);
    }

    #[test]
    fn bye_ends_call() {
        let mut s = SipSession::new(Liid::from("X"), 1, 1);
        s.feed(b"INVITE sip:bob@example.com SIP/2.0\r\n", Utc::now());
        s.feed(b"BYE sip:bob@example.com SIP/2.0\r\n", Utc::now());
        assert_eq!(s.state(), &SipCallState::Ended);
    }
}
