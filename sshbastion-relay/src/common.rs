use bytes::Bytes;
use russh::{ChannelId, Pty, Sig};
use tokio::sync::oneshot;

/// Closed variant of the channel-request kinds the coordinator cares
/// about. Replaces string comparisons against the raw request type with a
/// table-driven dispatch, per the dynamic-dispatch design note.
///
/// `Exec` and `Subsystem` carry a `reply` channel: the protocol handler
/// already answered `pty-req`/`shell` itself (want_reply is always true
/// for those, independent of whatever the back-end does), but exec and
/// subsystem replies must reflect what the back-end actually returns, so
/// the handler blocks on this oneshot until the relay resolves it.
#[derive(Debug)]
pub enum ChannelEvent {
    AgentForward {
        channel: ChannelId,
    },
    PtyRequest {
        channel: ChannelId,
        term: String,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        modes: Vec<(Pty, u32)>,
    },
    Shell {
        channel: ChannelId,
    },
    Env {
        channel: ChannelId,
        name: String,
        value: String,
    },
    WindowChange {
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
    },
    Exec {
        channel: ChannelId,
        command: String,
        reply: oneshot::Sender<bool>,
    },
    Subsystem {
        channel: ChannelId,
        name: String,
        reply: oneshot::Sender<bool>,
    },
    Signal {
        channel: ChannelId,
        signal: Sig,
    },
    Data {
        channel: ChannelId,
        data: Bytes,
    },
    Eof {
        channel: ChannelId,
    },
    Close {
        channel: ChannelId,
    },
}

impl ChannelEvent {
    pub fn channel(&self) -> ChannelId {
        match self {
            ChannelEvent::AgentForward { channel }
            | ChannelEvent::PtyRequest { channel, .. }
            | ChannelEvent::Shell { channel }
            | ChannelEvent::Env { channel, .. }
            | ChannelEvent::WindowChange { channel, .. }
            | ChannelEvent::Exec { channel, .. }
            | ChannelEvent::Subsystem { channel, .. }
            | ChannelEvent::Signal { channel, .. }
            | ChannelEvent::Data { channel, .. }
            | ChannelEvent::Eof { channel }
            | ChannelEvent::Close { channel } => *channel,
        }
    }
}
