//! Message Types for Thread Communication
//!
//! Requests flow from client threads -> the manager worker.
//! Synchronous requests carry a reply sender drawn from the reply pool.

use std::fmt;
use std::time::Duration;

use crossbeam_channel::Sender;
use masteraudio_dsp::StreamDescriptor;
use serde::{Deserialize, Serialize};

use crate::stream::StreamStats;

/// Opaque handle to an open stream
///
/// A generational index: a handle to a closed stream is never confused with
/// a stream opened later in the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub(crate) thunderdome::Index);

impl StreamId {
    /// Pack into an integer, for transport across FFI or IPC boundaries
    pub fn to_bits(self) -> u64 {
        self.0.to_bits()
    }

    pub fn from_bits(bits: u64) -> Option<Self> {
        thunderdome::Index::from_bits(bits).map(Self)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{:x}", self.to_bits())
    }
}

/// Transport commands forwarded to a stream's renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportCommand {
    Play,
    Pause,
    /// Discard everything buffered and stop the sink
    Stop,
    Resume,
}

/// Typed results written back by the worker
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Opened(Option<StreamId>),
    Accepted(usize),
    Delay(f64),
    Drained(bool),
    Stats(Option<StreamStats>),
}

/// Requests sent from client threads to the worker
#[derive(Debug)]
pub(crate) enum Message {
    Open {
        descriptor: StreamDescriptor,
        reply: Sender<Reply>,
    },
    AddData {
        id: StreamId,
        data: Vec<u8>,
        reply: Sender<Reply>,
    },
    GetDelay {
        id: StreamId,
        reply: Sender<Reply>,
    },
    Drain {
        id: StreamId,
        timeout: Duration,
        reply: Sender<Reply>,
    },
    Stats {
        id: StreamId,
        reply: Sender<Reply>,
    },
    Control {
        id: StreamId,
        command: TransportCommand,
    },
    SetVolume {
        id: StreamId,
        millibels: i32,
    },
    Flush {
        id: StreamId,
    },
    Close {
        id: StreamId,
    },
    Shutdown,
}

impl Message {
    /// Answer a request that will never be processed with its failure value
    pub(crate) fn reject(self) {
        let (reply, value) = match self {
            Message::Open { reply, .. } => (reply, Reply::Opened(None)),
            Message::AddData { reply, .. } => (reply, Reply::Accepted(0)),
            Message::GetDelay { reply, .. } => (reply, Reply::Delay(0.0)),
            Message::Drain { reply, .. } => (reply, Reply::Drained(false)),
            Message::Stats { reply, .. } => (reply, Reply::Stats(None)),
            _ => return,
        };
        let _ = reply.try_send(value);
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Message::Open { .. } => "open",
            Message::AddData { .. } => "add_data",
            Message::GetDelay { .. } => "get_delay",
            Message::Drain { .. } => "drain",
            Message::Stats { .. } => "stats",
            Message::Control { .. } => "control",
            Message::SetVolume { .. } => "set_volume",
            Message::Flush { .. } => "flush",
            Message::Close { .. } => "close",
            Message::Shutdown => "shutdown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thunderdome::Arena;

    #[test]
    fn test_stream_id_bits_roundtrip() {
        let mut arena = Arena::new();
        let id = StreamId(arena.insert(()));
        assert_eq!(StreamId::from_bits(id.to_bits()), Some(id));
        assert!(id.to_string().starts_with("stream#"));
    }

    #[test]
    fn test_stale_id_is_rejected_by_arena() {
        let mut arena = Arena::new();
        let old = StreamId(arena.insert(1));
        arena.remove(old.0);
        let new = StreamId(arena.insert(2));
        assert_ne!(old, new);
        assert!(arena.get(old.0).is_none());
        assert_eq!(arena.get(new.0), Some(&2));
    }

    #[test]
    fn test_reject_sends_sentinel() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        Message::Drain {
            id: StreamId(Arena::<()>::new().insert(())),
            timeout: Duration::ZERO,
            reply: tx,
        }
        .reject();
        assert!(matches!(rx.try_recv(), Ok(Reply::Drained(false))));
    }
}
