//! `ComputePipeline` (spec.md §4.3).
//!
//! Grounded on `examples/gfx-rs-gfx/src/backend/vulkan/src/device.rs`'s
//! `create_compute_pipeline`/`create_descriptor_set_layout`/
//! `create_pipeline_layout` sequence, generalized to the two descriptor
//! strategies spec.md §4.3 calls for: push-descriptors when the device
//! supports them, or a reused `UpdateAfterBind + FreeDescriptorSet`
//! descriptor set otherwise.

use std::sync::Arc;

use ash::vk;

use crate::buffer::DualResidentBuffer;
use crate::context::Context;
use bytemuck::Pod;
use scope_compute_core::FatalError;

/// Describes the fixed shape of one shader's descriptor set and
/// push-constant block (spec.md §4.3: "(shader SPIR-V path, number of
/// storage buffers, push-constant block size, optional number of storage
/// images, optional number of sampled images)").
#[derive(Clone, Debug)]
pub struct PipelineLayoutDesc {
    pub spirv_path: String,
    pub num_storage_buffers: u32,
    pub num_storage_images: u32,
    pub num_sampled_images: u32,
    pub push_constant_bytes: u32,
}

impl PipelineLayoutDesc {
    fn binding_count(&self) -> u32 {
        self.num_storage_buffers + self.num_storage_images + self.num_sampled_images
    }

    fn bindings(&self) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        let mut bindings = Vec::with_capacity(self.binding_count() as usize);
        let mut slot = 0u32;
        for _ in 0..self.num_storage_buffers {
            bindings.push(
                vk::DescriptorSetLayoutBinding::default()
                    .binding(slot)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE),
            );
            slot += 1;
        }
        for _ in 0..self.num_storage_images {
            bindings.push(
                vk::DescriptorSetLayoutBinding::default()
                    .binding(slot)
                    .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE),
            );
            slot += 1;
        }
        for _ in 0..self.num_sampled_images {
            bindings.push(
                vk::DescriptorSetLayoutBinding::default()
                    .binding(slot)
                    .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE),
            );
            slot += 1;
        }
        bindings
    }
}

/// Which descriptor update strategy a pipeline ended up using, chosen once
/// at deferred-init time from the device's capabilities.
enum DescriptorStrategy {
    /// Device supports `VK_KHR_push_descriptor`: no descriptor pool/set is
    /// ever allocated, bindings are pushed per-dispatch.
    Push,
    /// No push-descriptor support: one descriptor set is allocated from an
    /// `UPDATE_AFTER_BIND | FREE_DESCRIPTOR_SET` pool and reused across
    /// dispatches, rewritten each time a bound buffer changes.
    Pooled { pool: vk::DescriptorPool, set: vk::DescriptorSet },
}

struct Resources {
    descriptor_set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    strategy: DescriptorStrategy,
}

/// One compute shader plus its deferred-initialized descriptor/pipeline
/// state (spec.md §4.3: "Constructed lazily: resources are only built on
/// first bind/dispatch").
pub struct ComputePipeline {
    ctx: Arc<Context>,
    desc: PipelineLayoutDesc,
    resources: Option<Resources>,
}

impl ComputePipeline {
    pub fn new(ctx: Arc<Context>, desc: PipelineLayoutDesc) -> Self {
        Self { ctx, desc, resources: None }
    }

    fn ensure_built(&mut self, spirv: &[u32]) -> Result<&Resources, FatalError> {
        if self.resources.is_none() {
            self.resources = Some(self.build(spirv)?);
        }
        Ok(self.resources.as_ref().unwrap())
    }

    fn build(&self, spirv: &[u32]) -> Result<Resources, FatalError> {
        let device = self.ctx.device();
        let push_descriptors = self.ctx.caps().push_descriptors;
        let bindings = self.desc.bindings();

        let mut layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        if push_descriptors {
            layout_info = layout_info.flags(vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR);
        } else {
            layout_info = layout_info.flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL);
        }
        let descriptor_set_layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
            .map_err(|_| FatalError::AllocationFailed {
                bytes: 0,
                context: self.debug_name("create_descriptor_set_layout"),
            })?;

        let push_constant_ranges = if self.desc.push_constant_bytes > 0 {
            vec![vk::PushConstantRange::default()
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .offset(0)
                .size(self.desc.push_constant_bytes)]
        } else {
            Vec::new()
        };
        let set_layouts = [descriptor_set_layout];
        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let pipeline_layout = unsafe { device.create_pipeline_layout(&pipeline_layout_info, None) }.map_err(|_| {
            unsafe { device.destroy_descriptor_set_layout(descriptor_set_layout, None) };
            FatalError::AllocationFailed {
                bytes: 0,
                context: self.debug_name("create_pipeline_layout"),
            }
        })?;

        let shader_info = vk::ShaderModuleCreateInfo::default().code(spirv);
        let shader_module = unsafe { device.create_shader_module(&shader_info, None) }.map_err(|_| {
            unsafe {
                device.destroy_pipeline_layout(pipeline_layout, None);
                device.destroy_descriptor_set_layout(descriptor_set_layout, None);
            }
            FatalError::AllocationFailed {
                bytes: spirv.len() * 4,
                context: self.debug_name("create_shader_module"),
            }
        })?;

        let entry_point = c"main";
        let stage_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader_module)
            .name(entry_point);
        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage_info)
            .layout(pipeline_layout);

        // The teacher's `create_compute_pipeline` always threads the
        // process-wide `VkPipelineCache` handle through here; we do the
        // same so repeat runs skip driver-side SPIR-V recompilation.
        let cache_handle = self.ctx.pipeline_cache().lock().raw_handle(device);
        let pipelines = unsafe { device.create_compute_pipelines(cache_handle, &[pipeline_info], None) }
            .map_err(|(_, e)| {
                unsafe {
                    device.destroy_shader_module(shader_module, None);
                    device.destroy_pipeline_layout(pipeline_layout, None);
                    device.destroy_descriptor_set_layout(descriptor_set_layout, None);
                }
                FatalError::AllocationFailed {
                    bytes: 0,
                    context: format!("{} ({:?})", self.debug_name("create_compute_pipelines"), e),
                }
            })?;
        unsafe { device.destroy_shader_module(shader_module, None) };
        let pipeline = pipelines[0];

        let strategy = if push_descriptors {
            DescriptorStrategy::Push
        } else {
            let pool_sizes = [
                vk::DescriptorPoolSize::default()
                    .ty(vk::DescriptorType::STORAGE_BUFFER)
                    .descriptor_count(self.desc.num_storage_buffers.max(1)),
                vk::DescriptorPoolSize::default()
                    .ty(vk::DescriptorType::STORAGE_IMAGE)
                    .descriptor_count(self.desc.num_storage_images.max(1)),
                vk::DescriptorPoolSize::default()
                    .ty(vk::DescriptorType::SAMPLED_IMAGE)
                    .descriptor_count(self.desc.num_sampled_images.max(1)),
            ];
            let pool_info = vk::DescriptorPoolCreateInfo::default()
                .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND | vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
                .max_sets(1)
                .pool_sizes(&pool_sizes);
            let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }.map_err(|_| {
                FatalError::AllocationFailed {
                    bytes: 0,
                    context: self.debug_name("create_descriptor_pool"),
                }
            })?;
            let layouts = [descriptor_set_layout];
            let alloc_info = vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(pool)
                .set_layouts(&layouts);
            let sets = unsafe { device.allocate_descriptor_sets(&alloc_info) }.map_err(|_| {
                unsafe { device.destroy_descriptor_pool(pool, None) };
                FatalError::AllocationFailed {
                    bytes: 0,
                    context: self.debug_name("allocate_descriptor_sets"),
                }
            })?;
            DescriptorStrategy::Pooled { pool, set: sets[0] }
        };

        Ok(Resources {
            descriptor_set_layout,
            pipeline_layout,
            pipeline,
            strategy,
        })
    }

    fn debug_name(&self, op: &str) -> String {
        format!("ComputePipeline[{}].{op}", self.desc.spirv_path)
    }

    /// Binds a [`DualResidentBuffer`] at `binding`, preparing it for device
    /// access first (spec.md §4.3: "it transparently calls the buffer's
    /// prepare-for-device path ... then writes the descriptor").
    pub fn bind_buffer<T: Pod + Default>(
        &mut self,
        spirv: &[u32],
        binding: u32,
        buffer: &mut DualResidentBuffer<T>,
        cmd: vk::CommandBuffer,
        output_only: bool,
    ) -> Result<(), FatalError> {
        buffer.prepare_for_device_access_recording(cmd, output_only)?;
        let device_buffer = buffer
            .device_buffer()
            .ok_or_else(|| FatalError::NonCopyableDeviceAccess)?;
        let device = Arc::clone(&self.ctx);
        let resources = self.ensure_built(spirv)?;

        let buffer_info = [vk::DescriptorBufferInfo::default().buffer(device_buffer).offset(0).range(vk::WHOLE_SIZE)];
        let write = vk::WriteDescriptorSet::default()
            .dst_binding(binding)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .buffer_info(&buffer_info);

        match &resources.strategy {
            DescriptorStrategy::Push => unsafe {
                device.device().cmd_push_descriptor_set_khr(cmd, vk::PipelineBindPoint::COMPUTE, resources.pipeline_layout, 0, &[write]);
            },
            DescriptorStrategy::Pooled { set, .. } => unsafe {
                let write = write.dst_set(*set);
                device.device().update_descriptor_sets(&[write], &[]);
            },
        }
        Ok(())
    }

    /// `Dispatch(cmd, pushConsts, gx, gy, gz)` (spec.md §4.3): binds
    /// pipeline + descriptors + push constants, then issues a group
    /// dispatch.
    pub fn dispatch(
        &mut self,
        spirv: &[u32],
        cmd: vk::CommandBuffer,
        push_constants: &[u8],
        gx: u32,
        gy: u32,
        gz: u32,
    ) -> Result<(), FatalError> {
        let device = Arc::clone(&self.ctx);
        let resources = self.ensure_built(spirv)?;
        unsafe {
            device.device().cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, resources.pipeline);
            if let DescriptorStrategy::Pooled { set, .. } = &resources.strategy {
                device
                    .device()
                    .cmd_bind_descriptor_sets(cmd, vk::PipelineBindPoint::COMPUTE, resources.pipeline_layout, 0, &[*set], &[]);
            }
            if !push_constants.is_empty() {
                device
                    .device()
                    .cmd_push_constants(cmd, resources.pipeline_layout, vk::ShaderStageFlags::COMPUTE, 0, push_constants);
            }
            device.device().cmd_dispatch(cmd, gx, gy, gz);
        }
        Ok(())
    }

    /// `AddComputeMemoryBarrier(cmd)` (spec.md §4.3): shader-write ->
    /// shader-read barrier between two dispatches in the same recorded
    /// command buffer.
    pub fn add_compute_memory_barrier(&self, cmd: vk::CommandBuffer) {
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::SHADER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ);
        unsafe {
            self.ctx.device().cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        let Some(resources) = self.resources.take() else {
            return;
        };
        let device = self.ctx.device();
        unsafe {
            if let DescriptorStrategy::Pooled { pool, .. } = resources.strategy {
                device.destroy_descriptor_pool(pool, None);
            }
            device.destroy_pipeline(resources.pipeline, None);
            device.destroy_pipeline_layout(resources.pipeline_layout, None);
            device.destroy_descriptor_set_layout(resources.descriptor_set_layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_layout_orders_buffers_then_storage_images_then_sampled_images() {
        let desc = PipelineLayoutDesc {
            spirv_path: "test.comp.spv".into(),
            num_storage_buffers: 2,
            num_storage_images: 1,
            num_sampled_images: 1,
            push_constant_bytes: 16,
        };
        let bindings = desc.bindings();
        assert_eq!(bindings.len(), 4);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::STORAGE_BUFFER);
        assert_eq!(bindings[1].descriptor_type, vk::DescriptorType::STORAGE_BUFFER);
        assert_eq!(bindings[2].descriptor_type, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(bindings[3].descriptor_type, vk::DescriptorType::SAMPLED_IMAGE);
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[3].binding, 3);
    }
}
