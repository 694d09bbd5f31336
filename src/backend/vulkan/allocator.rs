//! GPU memory through gpu-allocator.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;

use crate::backend::{BackendError, BackendResult};

pub type SharedAllocator = Arc<Mutex<Allocator>>;

pub fn create_allocator(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: &ash::Device,
) -> BackendResult<SharedAllocator> {
    let allocator = Allocator::new(&AllocatorCreateDesc {
        instance: instance.clone(),
        device: device.clone(),
        physical_device,
        debug_settings: Default::default(),
        buffer_device_address: false,
        allocation_sizes: gpu_allocator::AllocationSizes::default(),
    })
    .map_err(|e| {
        BackendError::DeviceCreationFailed(format!("Failed to create memory allocator: {}", e))
    })?;

    Ok(Arc::new(Mutex::new(allocator)))
}

fn allocation_error(e: gpu_allocator::AllocationError) -> BackendError {
    match e {
        gpu_allocator::AllocationError::OutOfMemory => BackendError::OutOfMemory,
        other => BackendError::BufferCreationFailed(other.to_string()),
    }
}

/// Create a buffer backed by host-visible memory and bind it.
pub fn create_host_buffer(
    device: &ash::Device,
    allocator: &SharedAllocator,
    name: &str,
    size: u64,
    usage: vk::BufferUsageFlags,
) -> BackendResult<(vk::Buffer, Allocation, u64)> {
    let buffer_info = vk::BufferCreateInfo::default()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.create_buffer(&buffer_info, None) }
        .map_err(|e| super::result_error(e, BackendError::BufferCreationFailed))?;
    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

    let allocation = allocator.lock().allocate(&AllocationCreateDesc {
        name,
        requirements,
        location: MemoryLocation::CpuToGpu,
        linear: true,
        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
    });
    let allocation = match allocation {
        Ok(allocation) => allocation,
        Err(e) => {
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(allocation_error(e));
        }
    };

    if let Err(e) =
        unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
    {
        let _ = allocator.lock().free(allocation);
        unsafe { device.destroy_buffer(buffer, None) };
        return Err(super::result_error(e, BackendError::BufferCreationFailed));
    }

    Ok((buffer, allocation, requirements.alignment))
}

/// Bind device-local memory to `image`.
pub fn allocate_image_memory(
    device: &ash::Device,
    allocator: &SharedAllocator,
    image: vk::Image,
) -> BackendResult<Allocation> {
    let requirements = unsafe { device.get_image_memory_requirements(image) };
    let allocation = allocator
        .lock()
        .allocate(&AllocationCreateDesc {
            name: "image",
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
        .map_err(|e| match e {
            gpu_allocator::AllocationError::OutOfMemory => BackendError::OutOfMemory,
            other => BackendError::TextureCreationFailed(other.to_string()),
        })?;

    if let Err(e) =
        unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) }
    {
        let _ = allocator.lock().free(allocation);
        return Err(super::result_error(e, BackendError::TextureCreationFailed));
    }
    Ok(allocation)
}

pub fn free(allocator: &SharedAllocator, allocation: Allocation) {
    if let Err(e) = allocator.lock().free(allocation) {
        log::warn!("Failed to free GPU allocation: {}", e);
    }
}
