pub mod encoder;
pub mod error;
pub mod export_buffer;
pub mod exporter;
pub mod imap;
pub mod intercept;
pub mod job;
pub mod mediator;
pub mod provisioner;
pub mod sip;
pub mod wire;

pub use encoder::{BerEncoder, PsPduTemplate, StubEncoder};
pub use error::{ConfigError, EncodeError, ExportBufferError, ImapParseError, InterceptTableError};
pub use export_buffer::{ByteSink, ExportBuffer};
pub use exporter::{ExporterLoop, ExporterMetrics};
pub use imap::{ImapSession, ImapState, TcpDirection};
pub use intercept::{CinSeqno, Intercept, InterceptDetails, InterceptTable, Liid};
pub use job::{AccessTech, ControlMessage, Direction, ExportMessage, IpAssign, Job};
pub use mediator::{Mediator, MediatorAddress, MediatorRegistry};
pub use provisioner::{DirectProvisionerClient, ProvisionerClient};
pub use sip::{SipCallState, SipSession};
pub use wire::{decode_wire_message, EncodedRecord};
