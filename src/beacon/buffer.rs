use bytemuck::{cast_slice, Pod};
use log::debug;

use crate::beacon::device::ComputeDevice;
use crate::error::{Error, Result};

/// A live device allocation holding `count` elements of `stride` bytes.
pub struct DeviceBuffer<B> {
    raw: B,
    count: usize,
    stride: usize,
}

impl<B> DeviceBuffer<B> {
    pub fn raw(&self) -> &B {
        &self.raw
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn stride(&self) -> usize {
        self.stride
    }
}

/// Makes `slot` mirror `data`.
///
/// Empty data leaves the slot empty. The existing allocation is kept only when both count and
/// stride already match, otherwise it is released and a new one is created.
pub fn sync<D, T>(
    device: &mut D,
    slot: &mut Option<DeviceBuffer<D::Buffer>>,
    data: &[T],
    stride: usize,
    label: &str,
) -> Result<()>
where
    D: ComputeDevice,
    T: Pod,
{
    let bytes: &[u8] = cast_slice(data);
    if stride == 0 || bytes.len() != data.len() * stride {
        return Err(Error::Layout {
            label: label.to_owned(),
            stride,
            bytes: bytes.len(),
        });
    }

    if let Some(existing) = slot.take() {
        if !data.is_empty() && existing.count == data.len() && existing.stride == stride {
            *slot = Some(existing);
        } else {
            debug!("releasing `{}` ({} x {} bytes)", label, existing.count, existing.stride);
            device.release_buffer(existing.raw);
        }
    }

    if data.is_empty() {
        return Ok(());
    }

    if slot.is_none() {
        debug!("allocating `{}` ({} x {} bytes)", label, data.len(), stride);
        let raw = device.create_buffer(label, bytes.len() as u64)?;
        *slot = Some(DeviceBuffer {
            raw,
            count: data.len(),
            stride,
        });
    }

    if let Some(buffer) = slot.as_ref() {
        device.write_buffer(&buffer.raw, bytes);
    }
    Ok(())
}

/// Releases the buffer in `slot`, if any.
pub fn release<D: ComputeDevice>(device: &mut D, slot: &mut Option<DeviceBuffer<D::Buffer>>) {
    if let Some(buffer) = slot.take() {
        device.release_buffer(buffer.raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::host::HostDevice;

    #[test]
    fn empty_data_leaves_slot_absent() {
        let mut device = HostDevice::new();
        let mut slot = None;
        sync::<_, u32>(&mut device, &mut slot, &[], 4, "indices").unwrap();
        assert!(slot.is_none());
        assert_eq!(device.stats().buffers_created, 0);
    }

    #[test]
    fn writes_contents() {
        let mut device = HostDevice::new();
        let mut slot = None;
        sync(&mut device, &mut slot, &[1u32, 2, 3], 4, "indices").unwrap();

        let buffer = slot.as_ref().unwrap();
        assert_eq!(buffer.count(), 3);
        assert_eq!(buffer.stride(), 4);
        assert_eq!(device.buffer_contents(buffer.raw()), cast_slice::<u32, u8>(&[1, 2, 3]));
    }

    #[test]
    fn same_shape_reuses_allocation() {
        let mut device = HostDevice::new();
        let mut slot = None;
        sync(&mut device, &mut slot, &[1u32, 2, 3], 4, "indices").unwrap();
        sync(&mut device, &mut slot, &[4u32, 5, 6], 4, "indices").unwrap();

        assert_eq!(device.stats().buffers_created, 1);
        assert_eq!(device.stats().buffers_released, 0);
        let buffer = slot.as_ref().unwrap();
        assert_eq!(device.buffer_contents(buffer.raw()), cast_slice::<u32, u8>(&[4, 5, 6]));
    }

    #[test]
    fn count_change_reallocates() {
        let mut device = HostDevice::new();
        let mut slot = None;
        sync(&mut device, &mut slot, &[1u32, 2, 3], 4, "indices").unwrap();
        sync(&mut device, &mut slot, &[1u32, 2], 4, "indices").unwrap();

        assert_eq!(device.stats().buffers_created, 2);
        assert_eq!(device.stats().buffers_released, 1);
        assert_eq!(device.live_buffers(), 1);
        assert_eq!(slot.as_ref().unwrap().count(), 2);
    }

    #[test]
    fn emptying_releases() {
        let mut device = HostDevice::new();
        let mut slot = None;
        sync(&mut device, &mut slot, &[1u32], 4, "indices").unwrap();
        sync::<_, u32>(&mut device, &mut slot, &[], 4, "indices").unwrap();

        assert!(slot.is_none());
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn stride_mismatch_is_rejected() {
        let mut device = HostDevice::new();
        let mut slot = None;
        let result = sync(&mut device, &mut slot, &[1u32, 2], 8, "indices");
        assert!(matches!(result, Err(Error::Layout { stride: 8, .. })));
        assert!(slot.is_none());
    }

    #[test]
    fn allocation_failure_surfaces() {
        let mut device = HostDevice::new().with_memory_limit(8);
        let mut slot = None;
        let result = sync(&mut device, &mut slot, &[0u32; 4], 4, "indices");
        assert!(matches!(result, Err(Error::Allocation { size: 16, .. })));
        assert!(slot.is_none());
    }
}
