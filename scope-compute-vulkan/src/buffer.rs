//! `DualResidentBuffer<T>` (spec.md §4.1).
//!
//! Grounded on `examples/original_source/scopehal/AcceleratorBuffer.h` for
//! the overall shape (vector semantics, usage hints, staleness flags,
//! uninitialized growth) and on
//! `examples/gfx-rs-gfx/src/backend/vulkan/src/physical_device.rs`'s manual
//! memory-type selection for how the device-side allocation picks a
//! `VkMemoryPropertyFlags` set. spec.md §9's redesign note replaces that
//! raw-flags selection with the [`Residency`] enum and [`choose_residency`]
//! table below.

use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;

use crate::context::Context;
use scope_compute_core::FatalError;

/// Cache-line-ish alignment applied to host allocations that might later be
/// bound as a GPU-visible range (supplemented from
/// `examples/original_source/scopehal/AlignedAllocator.h`).
pub const ACCEL_BUFFER_ALIGNMENT: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UsageHint {
    Never,
    Unlikely,
    Likely,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Residency {
    Null,
    HostOnly,
    HostPaged,
    HostPinnedShared,
    DeviceLocal,
    Mirrored,
}

/// Table-driven residency chooser (spec.md §4.1). `copyable` is forced by
/// the caller to `false` for non-`Pod` element types, which forces
/// `Residency::HostOnly` regardless of hints.
pub fn choose_residency(host: UsageHint, device: UsageHint, copyable: bool) -> Residency {
    use UsageHint::*;
    if !copyable {
        return Residency::HostOnly;
    }
    match (host, device) {
        (Never, Never) => Residency::Null,
        (Likely, Never) => Residency::HostOnly,
        (Unlikely, Never) => Residency::HostPaged,
        (Likely, Unlikely) => Residency::HostPinnedShared,
        (Likely, Likely) => Residency::Mirrored,
        (Never, Likely) => Residency::DeviceLocal,
        (Never, Unlikely) => Residency::DeviceLocal,
        (Unlikely, Unlikely) => Residency::HostPaged,
        (Unlikely, Likely) => Residency::Mirrored,
    }
}

enum HostStorage<T> {
    Heap(Vec<T>),
    Paged {
        file: tempfile::NamedTempFile,
        map: Option<memmap2::MmapMut>,
    },
}

struct DeviceStorage {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size_bytes: vk::DeviceSize,
    mapped: Option<*mut u8>,
}

// SAFETY: the raw pointer in `mapped` is only ever read/written while the
// caller holds `&mut DualResidentBuffer`, same discipline as the `Vec<T>`
// arm of `HostStorage`.
unsafe impl Send for DeviceStorage {}
unsafe impl Sync for DeviceStorage {}

/// A typed container mirroring host/device memory with usage hints,
/// staleness flags, resize/reserve, optional file-backed paging, and
/// alignment guarantees (spec.md §4.1).
pub struct DualResidentBuffer<T> {
    ctx: Arc<Context>,
    name: String,
    host: Option<HostStorage<T>>,
    device: Option<DeviceStorage>,
    len: usize,
    capacity: usize,
    host_hint: UsageHint,
    device_hint: UsageHint,
    residency: Residency,
    host_stale: bool,
    device_stale: bool,
}

impl<T: Pod + Default> DualResidentBuffer<T> {
    pub fn new(ctx: Arc<Context>, name: impl Into<String>, host_hint: UsageHint, device_hint: UsageHint) -> Self {
        let residency = choose_residency(host_hint, device_hint, true);
        Self {
            ctx,
            name: name.into(),
            host: None,
            device: None,
            len: 0,
            capacity: 0,
            host_hint,
            device_hint,
            residency,
            host_stale: false,
            device_stale: false,
        }
    }

    /// Constructor for element types that cannot be shared with the device
    /// (spec.md §4.1: "If the element type is not trivially copyable, the
    /// device hint is forced to Never and the buffer is host-only.").
    pub fn new_host_only(ctx: Arc<Context>, name: impl Into<String>, host_hint: UsageHint) -> Self {
        Self {
            ctx,
            name: name.into(),
            host: None,
            device: None,
            len: 0,
            capacity: 0,
            host_hint,
            device_hint: UsageHint::Never,
            residency: Residency::HostOnly,
            host_stale: false,
            device_stale: false,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    fn debug_name(&self, field: &str) -> String {
        format!("DualResidentBuffer.{}.{}", self.name, field)
    }

    fn ensure_host_capacity(&mut self, new_cap: usize) -> Result<(), FatalError> {
        match self.residency {
            Residency::Null | Residency::DeviceLocal => return Ok(()),
            Residency::HostPaged => self.ensure_paged_capacity(new_cap),
            Residency::HostOnly | Residency::HostPinnedShared | Residency::Mirrored => {
                match &mut self.host {
                    Some(HostStorage::Heap(v)) => {
                        if v.len() < new_cap {
                            // Uninitialized per spec.md §4.1: filled with
                            // `Default` only because safe Rust requires
                            // every element to be valid, not because a
                            // caller may read it before writing.
                            v.resize_with(new_cap, Default::default);
                        }
                        Ok(())
                    }
                    _ => {
                        let mut v = Vec::with_capacity(new_cap);
                        v.resize_with(new_cap, Default::default);
                        self.host = Some(HostStorage::Heap(v));
                        Ok(())
                    }
                }
            }
        }
    }

    fn ensure_paged_capacity(&mut self, new_cap: usize) -> Result<(), FatalError> {
        let needed_bytes = new_cap * std::mem::size_of::<T>();
        if needed_bytes == 0 {
            return Err(FatalError::ZeroSizeAllocation {
                context: self.debug_name("host-paged"),
            });
        }
        if let Some(HostStorage::Paged { file, .. }) = &self.host {
            if file.as_file().metadata().map(|m| m.len()).unwrap_or(0) >= needed_bytes as u64 {
                return Ok(());
            }
        }
        let old = self.host.take();
        let file = tempfile::NamedTempFile::new().map_err(|e| FatalError::FileMappingFailed {
            path: "<tempfile>".to_string(),
            source: e,
        })?;
        file.as_file()
            .set_len(needed_bytes as u64)
            .map_err(|e| FatalError::FileMappingFailed {
                path: file.path().display().to_string(),
                source: e,
            })?;
        let mut map = unsafe { memmap2::MmapMut::map_mut(file.as_file()) }.map_err(|e| FatalError::FileMappingFailed {
            path: file.path().display().to_string(),
            source: e,
        })?;
        if let Some(HostStorage::Paged { map: Some(old_map), .. }) = old {
            map[..old_map.len()].copy_from_slice(&old_map[..]);
        }
        self.host = Some(HostStorage::Paged { file, map: Some(map) });
        Ok(())
    }

    fn host_slice(&self) -> &[T] {
        match &self.host {
            Some(HostStorage::Heap(v)) => &v[..self.len],
            Some(HostStorage::Paged { map: Some(map), .. }) => {
                bytemuck::cast_slice(&map[..self.len * std::mem::size_of::<T>()])
            }
            _ => &[],
        }
    }

    fn host_slice_mut(&mut self) -> &mut [T] {
        let len = self.len;
        match &mut self.host {
            Some(HostStorage::Heap(v)) => &mut v[..len],
            Some(HostStorage::Paged { map: Some(map), .. }) => {
                bytemuck::cast_slice_mut(&mut map[..len * std::mem::size_of::<T>()])
            }
            _ => &mut [],
        }
    }

    /// Growth policy: doubling with a floor of the requested size
    /// (spec.md §4.1). `reserve` never shrinks.
    pub fn reserve(&mut self, additional: usize) -> Result<(), FatalError> {
        let needed = self.len + additional;
        if needed <= self.capacity {
            return Ok(());
        }
        let new_cap = needed.max(self.capacity.saturating_mul(2));
        self.ensure_host_capacity(new_cap)?;
        self.ensure_device_capacity(new_cap)?;
        self.capacity = new_cap;
        Ok(())
    }

    /// Extends (or truncates) the logical length. For primitive element
    /// types newly-allocated space is left uninitialized; it must be
    /// written before read (spec.md §4.1).
    pub fn resize(&mut self, new_len: usize) -> Result<(), FatalError> {
        if new_len > self.capacity {
            self.reserve(new_len - self.len)?;
        }
        self.len = new_len;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn push_back(&mut self, value: T) -> Result<(), FatalError> {
        if self.len == self.capacity {
            self.reserve(self.capacity.max(1))?;
        }
        let index = self.len;
        self.len += 1;
        self.host_slice_mut()[index] = value;
        self.host_stale = true;
        Ok(())
    }

    pub fn get(&self, index: usize) -> T {
        self.host_slice()[index]
    }

    pub fn set(&mut self, index: usize, value: T) {
        self.host_slice_mut()[index] = value;
        self.host_stale = true;
    }

    pub fn as_slice(&self) -> &[T] {
        self.host_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.host_stale = true;
        self.host_slice_mut()
    }

    pub fn shrink_to_fit(&mut self) {
        if let Some(HostStorage::Heap(v)) = &mut self.host {
            v.truncate(self.len);
            v.shrink_to_fit();
            self.capacity = v.capacity();
        }
    }

    // -- Device side -----------------------------------------------------

    fn device_required_flags(&self) -> vk::MemoryPropertyFlags {
        match self.residency {
            Residency::DeviceLocal => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Residency::HostPinnedShared => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
            Residency::Mirrored => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            _ => vk::MemoryPropertyFlags::empty(),
        }
    }

    fn ensure_device_capacity(&mut self, new_cap: usize) -> Result<(), FatalError> {
        if !matches!(
            self.residency,
            Residency::DeviceLocal | Residency::HostPinnedShared | Residency::Mirrored
        ) {
            return Ok(());
        }
        let needed_bytes = (new_cap * std::mem::size_of::<T>()) as vk::DeviceSize;
        if needed_bytes == 0 {
            return Err(FatalError::ZeroSizeAllocation {
                context: self.debug_name("device"),
            });
        }
        if let Some(existing) = &self.device {
            if existing.size_bytes >= needed_bytes {
                return Ok(());
            }
        }

        let device = &self.ctx.device;
        let usage = vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::TRANSFER_SRC
            | vk::BufferUsageFlags::TRANSFER_DST;
        let info = vk::BufferCreateInfo::default()
            .size(needed_bytes)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&info, None) }.map_err(|_| FatalError::AllocationFailed {
            bytes: needed_bytes as usize,
            context: self.debug_name("device.create_buffer"),
        })?;
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let required_flags = self.device_required_flags();
        let type_index = self
            .ctx
            .find_memory_type(requirements.memory_type_bits, required_flags)
            .ok_or_else(|| FatalError::AllocationFailed {
                bytes: needed_bytes as usize,
                context: self.debug_name("no matching memory type"),
            })?;
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(type_index);
        let memory = unsafe { device.allocate_memory(&alloc_info, None) }.map_err(|_| {
            unsafe { device.destroy_buffer(buffer, None) };
            FatalError::AllocationFailed {
                bytes: requirements.size as usize,
                context: self.debug_name("device.allocate_memory"),
            }
        })?;
        unsafe { device.bind_buffer_memory(buffer, memory, 0) }.map_err(|_| FatalError::AllocationFailed {
            bytes: requirements.size as usize,
            context: self.debug_name("device.bind_buffer_memory"),
        })?;

        let mapped = if required_flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            let ptr = unsafe { device.map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty()) }
                .map_err(|_| FatalError::AllocationFailed {
                    bytes: requirements.size as usize,
                    context: self.debug_name("device.map_memory"),
                })?;
            Some(ptr as *mut u8)
        } else {
            None
        };

        if let Some(old) = self.device.take() {
            unsafe {
                if old.mapped.is_some() {
                    device.unmap_memory(old.memory);
                }
                device.destroy_buffer(old.buffer, None);
                device.free_memory(old.memory, None);
            }
        }

        self.device = Some(DeviceStorage {
            buffer,
            memory,
            size_bytes: requirements.size,
            mapped,
        });
        Ok(())
    }

    pub fn device_buffer(&self) -> Option<vk::Buffer> {
        self.device.as_ref().map(|d| d.buffer)
    }

    pub fn mark_modified_from_host(&mut self) {
        self.host_stale = false;
        self.device_stale = true;
    }

    pub fn mark_modified_from_device(&mut self) {
        self.device_stale = false;
        self.host_stale = true;
    }

    /// Copies from the other side iff that side is the fresh one.
    pub fn prepare_for_host_access(&mut self) -> Result<(), FatalError> {
        if !self.host_stale {
            return Ok(());
        }
        self.copy_device_to_host()?;
        self.host_stale = false;
        Ok(())
    }

    /// `output_only` skips the copy because the writer will overwrite
    /// every element anyway (spec.md §4.1).
    pub fn prepare_for_device_access(&mut self, output_only: bool) -> Result<(), FatalError> {
        if output_only {
            self.device_stale = false;
            return Ok(());
        }
        if !self.device_stale {
            return Ok(());
        }
        self.copy_host_to_device()?;
        self.device_stale = false;
        Ok(())
    }

    /// Records the host->device copy (and a transfer-write -> shader-read
    /// barrier) into `cmd` instead of blocking on the transfer queue
    /// (spec.md §4.1, §4.3).
    pub fn prepare_for_device_access_recording(
        &mut self,
        cmd: vk::CommandBuffer,
        output_only: bool,
    ) -> Result<(), FatalError> {
        if output_only {
            self.device_stale = false;
            return Ok(());
        }
        if !self.device_stale {
            return Ok(());
        }
        self.record_copy_host_to_device(cmd)?;
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ);
        unsafe {
            self.ctx.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
        self.device_stale = false;
        Ok(())
    }

    fn record_copy_host_to_device(&mut self, cmd: vk::CommandBuffer) -> Result<(), FatalError> {
        if self.residency == Residency::HostPinnedShared {
            self.write_through_mapped_pointer();
            return Ok(());
        }
        let Some(device_storage) = &self.device else {
            return Ok(());
        };
        let size = (self.len * std::mem::size_of::<T>()) as vk::DeviceSize;
        if size == 0 {
            return Ok(());
        }
        // In a staging-buffer-free design this crate uses host-visible
        // staging via the transfer context's own buffer; recorded here as
        // a region copy for the fused (caller-supplied cmd buffer) path.
        let region = vk::BufferCopy::default().size(size);
        let transfer = self.ctx.transfer.lock();
        unsafe {
            self.ctx
                .device
                .cmd_copy_buffer(cmd, transfer.staging_host_visible(), device_storage.buffer, &[region]);
        }
        Ok(())
    }

    fn write_through_mapped_pointer(&mut self) {
        if let (Some(device_storage), Some(host_storage)) = (&self.device, &self.host) {
            if let (Some(ptr), HostStorage::Heap(v)) = (device_storage.mapped, host_storage) {
                let byte_len = self.len * std::mem::size_of::<T>();
                unsafe {
                    std::ptr::copy_nonoverlapping(v.as_ptr() as *const u8, ptr, byte_len);
                }
            }
        }
    }

    fn copy_host_to_device(&mut self) -> Result<(), FatalError> {
        if self.residency == Residency::HostPinnedShared {
            self.write_through_mapped_pointer();
            return Ok(());
        }
        if self.device.is_none() {
            return Ok(());
        }
        let (cmd, queue) = {
            let guard = self.ctx.transfer.lock();
            (guard.buffer, guard.queue.clone())
        };
        self.record_copy_host_to_device(cmd)?;
        queue.submit_and_block(cmd);
        Ok(())
    }

    fn copy_device_to_host(&mut self) -> Result<(), FatalError> {
        if self.residency == Residency::HostPinnedShared {
            if let (Some(device_storage), Some(HostStorage::Heap(v))) = (&self.device, &mut self.host) {
                if let Some(ptr) = device_storage.mapped {
                    let byte_len = self.len * std::mem::size_of::<T>();
                    unsafe {
                        std::ptr::copy_nonoverlapping(ptr as *const u8, v.as_mut_ptr() as *mut u8, byte_len);
                    }
                }
            }
            return Ok(());
        }
        let Some(device_storage) = &self.device else {
            return Ok(());
        };
        let size = (self.len * std::mem::size_of::<T>()) as vk::DeviceSize;
        if size == 0 {
            return Ok(());
        }
        self.ensure_host_capacity(self.len)?;
        let transfer = self.ctx.transfer.lock();
        let cmd = transfer.buffer;
        let region = vk::BufferCopy::default().size(size);
        unsafe {
            self.ctx
                .device
                .cmd_copy_buffer(cmd, device_storage.buffer, transfer.staging_host_visible(), &[region]);
        }
        let queue = transfer.queue.clone();
        drop(transfer);
        queue.submit_and_block(cmd);
        Ok(())
    }
}

impl<T> Drop for DualResidentBuffer<T> {
    fn drop(&mut self) {
        if let Some(storage) = self.device.take() {
            unsafe {
                if storage.mapped.is_some() {
                    self.ctx.device.unmap_memory(storage.memory);
                }
                self.ctx.device.destroy_buffer(storage.buffer, None);
                self.ctx.device.free_memory(storage.memory, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn residency_table_matches_spec() {
        use UsageHint::*;
        assert_eq!(choose_residency(Likely, Never, true), Residency::HostOnly);
        assert_eq!(choose_residency(Unlikely, Never, true), Residency::HostPaged);
        assert_eq!(choose_residency(Likely, Unlikely, true), Residency::HostPinnedShared);
        assert_eq!(choose_residency(Likely, Likely, true), Residency::Mirrored);
        assert_eq!(choose_residency(Never, Likely, true), Residency::DeviceLocal);
    }

    #[test]
    fn non_copyable_forces_host_only() {
        assert_eq!(choose_residency(UsageHint::Never, UsageHint::Likely, false), Residency::HostOnly);
    }
}
