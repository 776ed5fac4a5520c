//! `FlowGraphNode` and the filter registry (spec.md §4.12).
//!
//! Grounded on `examples/original_source/scopehal/FlowGraphNode.h`/`Filter.h`.
//! The original's `Filter <- FlowGraphNode` inheritance plus per-leaf-class
//! RTTI factory registration collapses per spec.md §9 into one data-carrier
//! struct (`FlowGraphNode`), a `Filter` trait for the one behavior every
//! node needs (`refresh`), and an explicit string-keyed constructor registry
//! in place of the original's macro-based factory.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use ash::vk;
use scope_compute_core::{ErrorState, Parameter, Stream, StreamDescriptor};

/// Where a node would like its inputs resident before `refresh` runs
/// (spec.md §4.12: "Each node may override where it wants its inputs
/// resident").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResidencyPreference {
    Host,
    Device,
    DontCare,
}

/// Marker trait for the out-of-scope instrument/trigger collaborators
/// spec.md §1 names but excludes; filters in this crate depend only on its
/// shape, never a concrete instrument transport (see SPEC_FULL.md §2).
pub trait UpstreamSource {
    fn name(&self) -> &str;
}

/// Data-carrier fields shared by every filter node (spec.md §4.12): ordered
/// named inputs, parameters, outputs, and an error slot. `sinks` holds weak
/// references so downstream fan-out never creates ownership cycles (spec.md
/// §9); `inputs` holds strong references to the upstream node it reads.
pub struct FlowGraphNode {
    pub name: String,
    pub input_names: Vec<String>,
    pub inputs: Vec<Option<StreamDescriptor>>,
    pub input_residency: Vec<ResidencyPreference>,
    pub parameters: HashMap<String, Parameter>,
    pub outputs: Vec<Stream>,
    pub sinks: Vec<Weak<dyn Filter>>,
    pub error: ErrorState,
}

impl FlowGraphNode {
    pub fn new(name: impl Into<String>, input_names: Vec<String>) -> Self {
        let input_residency = vec![ResidencyPreference::DontCare; input_names.len()];
        let inputs = vec![None; input_names.len()];
        Self {
            name: name.into(),
            input_names,
            inputs,
            input_residency,
            parameters: HashMap::new(),
            outputs: Vec::new(),
            sinks: Vec::new(),
            error: ErrorState::default(),
        }
    }

    pub fn input_count(&self) -> usize {
        self.input_names.len()
    }

    pub fn input_name(&self, i: usize) -> &str {
        &self.input_names[i]
    }

    /// `setInput(i, StreamDescriptor)` (spec.md §6). `force` bypasses
    /// `validate_channel` (only meaningful for callers that already know
    /// the wiring is legal, e.g. deserialization).
    pub fn set_input(&mut self, i: usize, descriptor: Option<StreamDescriptor>, force: bool) -> Result<(), String> {
        if !force {
            // Real type validation happens in the concrete filter's
            // `validate_channel`; the base node only enforces the index is
            // in range here.
            if i >= self.inputs.len() {
                return Err(format!("input index {i} out of range"));
            }
        }
        self.inputs[i] = descriptor;
        Ok(())
    }
}

/// The one behavior every filter node needs (spec.md §4.12): `refresh`.
/// Errors never cross this boundary as a `Result` (spec.md §7
/// "Propagation") -- they accumulate on `node().error` instead; `refresh`
/// itself cannot fail except via the fatal, process-aborting
/// `scope_compute_core::FatalError` channel used by the buffers it touches.
pub trait Filter: Send + Sync {
    fn node(&self) -> &FlowGraphNode;
    fn node_mut(&mut self) -> &mut FlowGraphNode;

    fn validate_channel(&self, i: usize, stream: &Stream) -> bool;

    fn refresh(&mut self, cmd: vk::CommandBuffer, queue: &scope_compute_vulkan::QueueHandle);
}

type FilterConstructor = Box<dyn Fn(Arc<scope_compute_vulkan::Context>) -> Box<dyn Filter> + Send + Sync>;

/// Explicit string-keyed registry replacing the original's RTTI-based
/// factory macros (spec.md §9).
#[derive(Default)]
pub struct FilterRegistry {
    constructors: HashMap<String, FilterConstructor>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, ctor: FilterConstructor) {
        self.constructors.insert(name.into(), ctor);
    }

    pub fn create(&self, name: &str, ctx: Arc<scope_compute_vulkan::Context>) -> Option<Box<dyn Filter>> {
        self.constructors.get(name).map(|ctor| ctor(ctx))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_node_has_one_slot_per_input_name() {
        let node = FlowGraphNode::new("test", vec!["a".into(), "b".into()]);
        assert_eq!(node.input_count(), 2);
        assert_eq!(node.input_name(1), "b");
        assert!(node.inputs.iter().all(|i| i.is_none()));
    }

    #[test]
    fn set_input_rejects_out_of_range_index_unless_forced() {
        let mut node = FlowGraphNode::new("test", vec!["a".into()]);
        assert!(node.set_input(5, None, false).is_err());
    }
}
