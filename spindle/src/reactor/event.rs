/// A readiness event reported by the poller.
///
/// Events for the same descriptor are coalesced, so a single `Event` may
/// report both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Event {
    /// Id of the handle the descriptor was registered under.
    pub(crate) token: usize,

    /// Readable, or hung up / errored.
    pub(crate) readable: bool,

    /// Writable, or hung up / errored.
    pub(crate) writable: bool,
}
