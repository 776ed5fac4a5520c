use crate::unit::Unit;
use bitflags::bitflags;

/// General datatype carried by a [`Stream`] (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum StreamType {
    Analog,
    Digital,
    DigitalBus,
    Eye,
    Spectrogram,
    Waterfall,
    Constellation,
    Trigger,
    ProtocolMessage,
    AnalogScalar,
    Undefined,
}

bitflags! {
    /// Per-stream rendering hints. The compute core only sets/reads these;
    /// it does not interpret them for rendering.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    pub struct StreamFlags: u8 {
        const DO_NOT_INTERPOLATE = 0b0000_0001;
    }
}

/// One named, typed, unit-tagged output (or input reference) of a filter
/// node. A channel may expose more than one stream (e.g. I and Q).
#[derive(Clone, Debug)]
pub struct Stream {
    pub unit: Unit,
    pub name: String,
    pub stream_type: StreamType,
    pub flags: StreamFlags,
}

impl Stream {
    pub fn new(unit: Unit, name: impl Into<String>, stream_type: StreamType) -> Self {
        Self {
            unit,
            name: name.into(),
            stream_type,
            flags: StreamFlags::empty(),
        }
    }

    pub fn with_flags(mut self, flags: StreamFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// A reference to a specific stream produced by an upstream node, as stored
/// in a node's input slot. `None` means the input is unwired.
#[derive(Clone, Debug, Default)]
pub struct StreamDescriptor {
    pub source_node: Option<String>,
    pub stream_index: usize,
}

impl StreamDescriptor {
    pub fn new(source_node: impl Into<String>, stream_index: usize) -> Self {
        Self {
            source_node: Some(source_node.into()),
            stream_index,
        }
    }
}
