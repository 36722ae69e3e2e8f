//! Headless device creation and buffer readback.

use bytemuck::Pod;

use crate::util::{Error, Result};

/// Create a headless device/queue on the best available adapter.
///
/// Requests the adapter's own limits so large group sizes are usable where
/// the hardware allows them.
pub fn request_device() -> Result<(wgpu::Device, wgpu::Queue)> {
    request_device_with_limits(None)
}

/// Like [`request_device`], but with explicit limits (`None` = adapter limits).
pub fn request_device_with_limits(limits: Option<wgpu::Limits>) -> Result<(wgpu::Device, wgpu::Queue)> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .map_err(|e| Error::gpu(format!("no suitable adapter: {e}")))?;

    let info = adapter.get_info();
    tracing::info!(adapter = %info.name, backend = ?info.backend, "using GPU adapter");

    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("raycompact device"),
        required_limits: limits.unwrap_or_else(|| adapter.limits()),
        ..Default::default()
    }))
    .map_err(|e| Error::gpu(format!("device creation failed: {e}")))?;

    Ok((device, queue))
}

/// Copy the first `count` elements of `buffer` back to the host.
///
/// `buffer` needs `COPY_SRC` usage. Blocks until the copy completes.
pub fn read_buffer<T: Pod>(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    buffer: &wgpu::Buffer,
    count: usize,
) -> Result<Vec<T>> {
    let size = (count * std::mem::size_of::<T>()) as u64;
    if size == 0 {
        return Ok(Vec::new());
    }
    if size > buffer.size() {
        return Err(Error::gpu(format!(
            "readback of {size} bytes exceeds buffer size {}",
            buffer.size()
        )));
    }

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("rc_readback"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("rc_readback_encoder"),
    });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
    queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| Error::gpu(format!("device poll failed: {e}")))?;
    rx.recv()
        .map_err(|_| Error::gpu("readback callback never ran"))?
        .map_err(|e| Error::gpu(format!("buffer map failed: {e}")))?;

    let values = {
        let data = slice.get_mapped_range();
        bytemuck::cast_slice::<u8, T>(&data).to_vec()
    };
    staging.unmap();
    Ok(values)
}
