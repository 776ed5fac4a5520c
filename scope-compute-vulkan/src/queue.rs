//! Queue assignment and submission serialization (spec.md §4.2).
//!
//! Grounded on `examples/original_source/scopehal/QueueManager.cpp`:
//! queue families are enumerated once, sorted by ascending popcount of
//! their capability flags so specialized queues are handed out before
//! general-purpose ones, and handles are shared/reused by reference count
//! rather than created per-request.

use std::sync::{Arc, Weak};

use ash::vk;
use parking_lot::{Mutex, MutexGuard};

/// One Vulkan queue plus the bookkeeping needed to serialize submissions
/// and wait on the previous submission's fence before issuing a new one.
pub struct QueueHandle {
    device: ash::Device,
    pub(crate) family: u32,
    pub(crate) index: u32,
    raw: vk::Queue,
    inner: Mutex<QueueHandleInner>,
}

struct QueueHandleInner {
    name: String,
    fence: Option<vk::Fence>,
}

/// Scoped exclusive access to the underlying queue, for clients that need
/// to issue custom submissions while also waiting for prior fences
/// (spec.md §4.2).
pub struct QueueLock<'a> {
    handle: &'a QueueHandle,
    guard: MutexGuard<'a, QueueHandleInner>,
}

impl<'a> QueueLock<'a> {
    pub fn raw(&self) -> vk::Queue {
        self.handle.raw
    }

    /// Waits for (and clears) any fence left by a prior submission made
    /// through this handle.
    pub fn wait_for_prior_submit(&mut self) {
        self.handle.wait_fence_locked(&mut self.guard);
    }
}

impl QueueHandle {
    pub(crate) fn new(device: ash::Device, family: u32, index: u32, name: String) -> Self {
        let raw = unsafe { device.get_device_queue(family, index) };
        Self {
            device,
            family,
            index,
            raw,
            inner: Mutex::new(QueueHandleInner { name, fence: None }),
        }
    }

    pub fn family(&self) -> u32 {
        self.family
    }

    pub fn name(&self) -> String {
        self.inner.lock().name.clone()
    }

    /// Appends another friendly name, semicolon-joined, for debug tooling.
    pub fn add_name(&self, name: &str) {
        let mut inner = self.inner.lock();
        if !inner.name.is_empty() {
            inner.name.push(';');
        }
        inner.name.push_str(name);
    }

    fn wait_fence_locked(&self, inner: &mut QueueHandleInner) {
        if let Some(fence) = inner.fence.take() {
            // 1ms poll loop (spec.md §5 "Cancellation / timeout"): no
            // cancellation primitive exists, so this waits indefinitely.
            loop {
                match unsafe { self.device.wait_for_fences(&[fence], true, 1_000_000) } {
                    Ok(()) => break,
                    Err(vk::Result::TIMEOUT) => continue,
                    Err(e) => {
                        log::error!("wait_for_fences failed: {e:?}");
                        break;
                    }
                }
            }
            unsafe { self.device.destroy_fence(fence, None) };
        }
    }

    fn submit_locked(&self, inner: &mut QueueHandleInner, cmd_buf: vk::CommandBuffer) -> vk::Fence {
        self.wait_fence_locked(inner);
        let fence_info = vk::FenceCreateInfo::default();
        let fence = unsafe {
            self.device
                .create_fence(&fence_info, None)
                .expect("fence creation must not fail in a correctly configured system")
        };
        let cmd_bufs = [cmd_buf];
        let submit_info = vk::SubmitInfo::default().command_buffers(&cmd_bufs);
        unsafe {
            self.device
                .queue_submit(self.raw, &[submit_info], fence)
                .expect("queue_submit failed");
        }
        inner.fence = Some(fence);
        fence
    }

    /// Waits for the handle's prior in-flight fence if any, submits, and
    /// records a new fence.
    pub fn submit(&self, cmd_buf: vk::CommandBuffer) {
        let mut inner = self.inner.lock();
        self.submit_locked(&mut inner, cmd_buf);
    }

    /// As [`QueueHandle::submit`], then waits on the new fence.
    pub fn submit_and_block(&self, cmd_buf: vk::CommandBuffer) {
        let mut inner = self.inner.lock();
        self.submit_locked(&mut inner, cmd_buf);
        self.wait_fence_locked(&mut inner);
    }

    /// Scoped exclusive access to the queue for custom submission
    /// sequences (spec.md §4.2, `QueueLock`).
    pub fn lock(&self) -> QueueLock<'_> {
        QueueLock {
            handle: self,
            guard: self.inner.lock(),
        }
    }
}

struct QueueSlot {
    family: u32,
    index: u32,
    flags: vk::QueueFlags,
    handle: Mutex<Weak<QueueHandle>>,
}

/// Hands out [`QueueHandle`]s by capability-flag request, preferring
/// unused queues and otherwise the least-loaded existing handle
/// (spec.md §4.2).
pub struct QueueManager {
    device: ash::Device,
    slots: Vec<QueueSlot>,
}

fn popcount(flags: vk::QueueFlags) -> u32 {
    flags.as_raw().count_ones()
}

impl QueueManager {
    /// Enumerates queue families from `family_properties` (as returned by
    /// `vkGetPhysicalDeviceQueueFamilyProperties`) and sorts them by
    /// ascending flag-bit count, so specialized queues are preferred over
    /// general-purpose ones when a request is ambiguous.
    pub fn new(device: ash::Device, family_properties: &[vk::QueueFamilyProperties]) -> Self {
        let mut slots = Vec::new();
        for (family, props) in family_properties.iter().enumerate() {
            for index in 0..props.queue_count {
                slots.push(QueueSlot {
                    family: family as u32,
                    index,
                    flags: props.queue_flags,
                    handle: Mutex::new(Weak::new()),
                });
            }
        }
        slots.sort_by_key(|slot| popcount(slot.flags));
        for slot in &slots {
            log::debug!(
                "Sorted queue family={} index={} flags={:?}",
                slot.family,
                slot.index,
                slot.flags
            );
        }
        Self { device, slots }
    }

    /// Returns a queue handle satisfying `flags`, creating a fresh one if
    /// an unused matching queue exists, otherwise reusing the
    /// least-loaded existing handle (by live `Arc` reference count).
    pub fn get_queue_with_flags(&self, flags: vk::QueueFlags, name: &str) -> Arc<QueueHandle> {
        let mut least_loaded: Option<(usize, Arc<QueueHandle>)> = None;

        for (i, slot) in self.slots.iter().enumerate() {
            if !slot.flags.contains(flags) {
                continue;
            }

            let mut weak = slot.handle.lock();
            if let Some(existing) = weak.upgrade() {
                let better = match &least_loaded {
                    None => true,
                    Some((_, best)) => Arc::strong_count(&existing) < Arc::strong_count(best),
                };
                if better {
                    least_loaded = Some((i, existing));
                }
                continue;
            }

            log::debug!(
                "QueueManager creating family={} index={} name={}",
                slot.family,
                slot.index,
                name
            );
            let handle = Arc::new(QueueHandle::new(
                self.device.clone(),
                slot.family,
                slot.index,
                name.to_string(),
            ));
            *weak = Arc::downgrade(&handle);
            return handle;
        }

        let (_, handle) =
            least_loaded.expect("no queue family satisfies the requested capability flags");
        handle.add_name(name);
        handle
    }

    pub fn compute_transfer(&self) -> Arc<QueueHandle> {
        self.get_queue_with_flags(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, "compute+transfer")
    }

    pub fn graphics_transfer(&self) -> Arc<QueueHandle> {
        self.get_queue_with_flags(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, "graphics+transfer")
    }

    pub fn transfer(&self) -> Arc<QueueHandle> {
        self.get_queue_with_flags(vk::QueueFlags::TRANSFER, "transfer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(bits: u32) -> vk::QueueFlags {
        vk::QueueFlags::from_raw(bits)
    }

    #[test]
    fn sorts_by_ascending_popcount() {
        // Graphics|Compute|Transfer (3 bits) should sort after a
        // Compute-only (1 bit) family.
        let general = vk::QueueFamilyProperties {
            queue_flags: flags(0b111),
            queue_count: 1,
            ..Default::default()
        };
        let specialized = vk::QueueFamilyProperties {
            queue_flags: flags(0b010),
            queue_count: 1,
            ..Default::default()
        };
        // We can't construct a real ash::Device without a driver, so this
        // test only exercises the pure sorting/selection logic by hand.
        let mut slots = vec![(0u32, general.queue_flags), (1u32, specialized.queue_flags)];
        slots.sort_by_key(|(_, f)| popcount(*f));
        assert_eq!(slots[0].0, 1);
        assert_eq!(slots[1].0, 0);
    }
}
