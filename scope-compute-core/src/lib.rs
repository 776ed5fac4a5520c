//! Backend-agnostic data model for the scope-compute waveform stack:
//! units, streams, filter parameters and the node error taxonomy.
//!
//! Nothing in this crate touches an accelerator; `scope-compute-vulkan`
//! supplies the GPU-resident waveform storage and `scope-compute-filters`
//! the DSP kernels built on top of it.

pub mod error;
pub mod parameter;
pub mod stream;
pub mod unit;

pub use error::{ErrorState, FatalError, NodeError};
pub use parameter::{EnumMap, Parameter, ParameterFlags, ParameterType, ParameterValue};
pub use stream::{Stream, StreamDescriptor, StreamFlags, StreamType};
pub use unit::Unit;
