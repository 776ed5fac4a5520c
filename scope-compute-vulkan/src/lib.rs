//! Vulkan-backed accelerator core (spec.md §4.1-§4.5): device context,
//! queue assignment, the disk-backed pipeline cache, compute pipeline
//! dispatch, dual-resident buffers, FFT plans and the waveform storage
//! types built on top of them.
//!
//! Mirrors the teacher's `gfx-backend-vulkan` crate: one concrete backend
//! behind a small set of `ash`-call-sequence modules, consumed by
//! `scope-compute-filters` the way `gfx` consumes a backend.

pub mod buffer;
pub mod context;
pub mod fft;
pub mod level_crossing;
pub mod pipeline;
pub mod pipeline_cache;
pub mod queue;
pub mod waveform;

pub use buffer::{choose_residency, DualResidentBuffer, Residency, UsageHint, ACCEL_BUFFER_ALIGNMENT};
pub use context::{BackendError, Context, DeviceCapabilities, DeviceIdentity};
pub use fft::{Direction, FFTPlan, TimeDomainDtype};
pub use level_crossing::LevelCrossingDetector;
pub use pipeline::{ComputePipeline, PipelineLayoutDesc};
pub use pipeline_cache::PipelineCache;
pub use queue::{QueueHandle, QueueLock, QueueManager};
pub use waveform::{DensityFunctionWaveform, DensityKind, EyeParams, EyeType, SparseWaveform, UniformWaveform, WaveformFlags, WaveformMeta};
