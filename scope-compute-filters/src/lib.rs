pub mod clock_recovery;
pub mod constellation;
pub mod coupler_deembed;
pub mod eye;
pub mod fft_filter;
pub mod flow_graph;
pub mod peak_detector;
pub mod spectrogram;
pub mod tie;

pub use clock_recovery::{ClockRecoveryOutput, ClockRecoveryParams, ThreadingMode};
pub use constellation::{ConstellationAccumulator, Modulation};
pub use coupler_deembed::{coupler_deembed, deembed, SParamCurve};
pub use eye::{ClockAlignment, ClockEdgePolarity, EyeAccumulator, EyeMask, EyeParams};
pub use fft_filter::{FftFilterConfig, FftFilterNode, FftFilterOutput, LengthRounding, WindowFunction};
pub use flow_graph::{Filter, FilterRegistry, FlowGraphNode, ResidencyPreference, UpstreamSource};
pub use peak_detector::{Peak, PeakDetector};
pub use spectrogram::SpectrogramOutput;
pub use tie::TieOutput;
