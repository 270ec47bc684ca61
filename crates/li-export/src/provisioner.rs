//! Trait seam for the provisioner control plane.
//!
//! The TLS channel to the provisioner is out of scope for this crate;
//! this module only fixes the boundary an external collaborator plugs into:
//! translate whatever the provisioner sent into an [`ExportMessage`] and
//! post it to the exporter queue.

use crossbeam_channel::Sender;

use crate::job::ExportMessage;

/// Implemented by whatever owns the real TLS connection to the
/// provisioner. `post` is expected to be called once per message
/// received on that channel; delivery onto the exporter queue is
/// infallible from this trait's point of view (a full queue simply
/// means the caller should back off, which is a concern of the
/// transport, not this seam).
pub trait ProvisionerClient {
    fn post(&self, queue: &Sender<ExportMessage>, message: ExportMessage);
}

/// Default implementation: a direct, synchronous hand-off onto the
/// queue. Sufficient for any caller that already holds a parsed
/// [`ExportMessage`] — real deployments plug in a type that also owns
/// the TLS socket and wire parsing upstream of this call.
#[derive(Debug, Default)]
pub struct DirectProvisionerClient;

impl ProvisionerClient for DirectProvisionerClient {
    fn post(&self, queue: &Sender<ExportMessage>, message: ExportMessage) {
        // An unbounded queue never blocks; a bounded deployment would
        // need to decide whether to drop or await here.
        let _ = queue.send(message);
    }
}
