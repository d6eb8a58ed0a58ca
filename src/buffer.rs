use std::{ffi::c_void, sync::Arc};

use crate::{
    driver::DriverBindings,
    element::{Element, as_bytes},
    error::{BindError, Result},
    handle::{DeviceBuffer, DevicePtr},
};

fn byte_count<T: Element>(count: usize) -> Result<usize> {
    count.checked_mul(T::SIZE).ok_or_else(|| format!("{count} elements of {} overflow a byte count", T::KIND).into())
}

fn device_memory(status: crate::error::Status) -> BindError {
    BindError::DeviceMemory { status }
}

/// Typed fill, compare, copy and read-back of device memory
///
/// Operations are generic over the element width and run synchronously
/// on the calling thread. Zero-element operations return immediately
/// without calling the driver.
pub struct BufferAdapter<D: DriverBindings> {
    driver: Arc<D>,
}

impl<D: DriverBindings> Clone for BufferAdapter<D> {
    fn clone(&self) -> Self {
        Self { driver: self.driver.clone() }
    }
}

impl<D: DriverBindings> BufferAdapter<D> {
    pub fn new(driver: Arc<D>) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    /// Set the first `count` elements of `buffer` to `value`
    ///
    /// ### Safety
    ///
    /// `count` elements starting at `buffer.ptr()` must lie inside a live
    /// allocation. `buffer.len()` is not consulted.
    pub unsafe fn memset<T: Element>(&self, buffer: DeviceBuffer<T>, value: T, count: usize) -> Result<()> {
        let bytes = byte_count::<T>(count)?;
        tracing::trace!(ptr = %buffer.ptr(), count, kind = %T::KIND, "memset");

        if count == 0 {
            return Ok(());
        }

        unsafe { self.driver.mem_fill(buffer.ptr(), &value.pattern(), bytes) }.map_err(device_memory)
    }

    /// Whether `count` elements at `a` and `b` are bitwise identical
    ///
    /// Bitwise comparison makes this an equivalence relation for every
    /// element type, floats with NaN payloads included.
    ///
    /// ### Safety
    ///
    /// Both ranges must lie inside live allocations.
    pub unsafe fn is_equal<T: Element>(&self, a: DevicePtr, b: DevicePtr, count: usize) -> Result<bool> {
        let bytes = byte_count::<T>(count)?;
        tracing::trace!(%a, %b, count, kind = %T::KIND, "is_equal");

        if count == 0 {
            return Ok(true);
        }

        let lhs = unsafe { self.read_bytes(a, bytes)? };
        let rhs = unsafe { self.read_bytes(b, bytes)? };

        Ok(lhs == rhs)
    }

    /// Copy `source` to the device, starting at `dest`
    ///
    /// ### Safety
    ///
    /// `source.len()` elements starting at `dest` must lie inside a live
    /// allocation.
    pub unsafe fn copy<T: Element>(&self, dest: DevicePtr, source: &[T]) -> Result<()> {
        tracing::trace!(%dest, count = source.len(), kind = %T::KIND, "copy");

        if source.is_empty() {
            return Ok(());
        }

        let source = as_bytes(source);
        unsafe { self.driver.memcpy_h2d(dest, source.as_ptr().cast(), source.len()) }.map_err(device_memory)
    }

    /// Read `count` elements starting at `source` into a new host vector
    ///
    /// ### Safety
    ///
    /// `count` elements starting at `source` must lie inside a live
    /// allocation.
    pub unsafe fn read_back<T: Element>(&self, source: DevicePtr, count: usize) -> Result<Vec<T>> {
        let bytes = byte_count::<T>(count)?;
        tracing::trace!(%source, count, kind = %T::KIND, "read_back");

        let mut host = Vec::<T>::with_capacity(count);

        if count > 0 {
            unsafe {
                self.driver.memcpy_d2h(host.as_mut_ptr().cast::<c_void>(), source, bytes).map_err(device_memory)?;
                host.set_len(count);
            }
        }

        Ok(host)
    }

    unsafe fn read_bytes(&self, source: DevicePtr, bytes: usize) -> Result<Vec<u8>> {
        let mut host = vec![0u8; bytes];
        unsafe { self.driver.memcpy_d2h(host.as_mut_ptr().cast(), source, bytes) }.map_err(device_memory)?;
        Ok(host)
    }

    /// New uninitialised device allocation of `count` elements
    pub fn allocate<T: Element>(&self, count: usize) -> Result<DeviceAllocation<D, T>> {
        if count == 0 {
            return Err("attempted to allocate a zero-length device buffer".into());
        }

        let bytes = byte_count::<T>(count)?;
        let ptr = unsafe { self.driver.mem_alloc(bytes) }.map_err(device_memory)?;

        if ptr.raw() % T::SIZE as u64 != 0 {
            if let Err(status) = unsafe { self.driver.mem_free(ptr) } {
                tracing::warn!(%ptr, %status, "failed to free misaligned allocation");
            }
            return Err(format!("device allocation {ptr} is not aligned for {}", T::KIND).into());
        }

        tracing::trace!(%ptr, count, kind = %T::KIND, "allocate");

        Ok(DeviceAllocation { adapter: self.clone(), buffer: DeviceBuffer::new(ptr, count) })
    }

    /// New device allocation of `count` elements, all zero
    pub fn zeroed<T: Element>(&self, count: usize) -> Result<DeviceAllocation<D, T>> {
        let alloc = self.allocate::<T>(count)?;
        alloc.fill(T::default())?;
        Ok(alloc)
    }
}

/// Device memory owned by the binding layer, freed on drop
pub struct DeviceAllocation<D: DriverBindings, T: Element> {
    adapter: BufferAdapter<D>,
    buffer: DeviceBuffer<T>,
}

impl<D: DriverBindings, T: Element> Drop for DeviceAllocation<D, T> {
    fn drop(&mut self) {
        let ptr = self.buffer.ptr();

        if let Err(status) = unsafe { self.adapter.driver.mem_free(ptr) } {
            tracing::warn!(%ptr, %status, "failed to free device allocation");
        }
    }
}

impl<D: DriverBindings, T: Element> DeviceAllocation<D, T> {
    /// Non-owning view, valid for as long as `self` is alive
    pub fn buffer(&self) -> DeviceBuffer<T> {
        self.buffer
    }

    pub fn ptr(&self) -> DevicePtr {
        self.buffer.ptr()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn fill(&self, value: T) -> Result<()> {
        unsafe { self.adapter.memset(self.buffer, value, self.len()) }
    }

    /// Overwrite the whole allocation, `source` must match its length
    pub fn write(&self, source: &[T]) -> Result<()> {
        if source.len() != self.len() {
            return Err(format!("cannot write {} elements into a buffer of {}", source.len(), self.len()).into());
        }

        unsafe { self.adapter.copy(self.ptr(), source) }
    }

    pub fn read(&self) -> Result<Vec<T>> {
        unsafe { self.adapter.read_back(self.ptr(), self.len()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{host::Host, ze};

    fn adapter() -> BufferAdapter<Host> {
        BufferAdapter::new(Arc::new(Host::default()))
    }

    #[test]
    fn zero_count_skips_the_driver() -> Result<()> {
        let adapter = adapter();
        let null = DeviceBuffer::<i32>::new(DevicePtr::NULL, 0);

        unsafe {
            adapter.memset(null, 7, 0)?;
            adapter.copy::<i64>(DevicePtr::NULL, &[])?;
            assert!(adapter.is_equal::<f64>(DevicePtr::NULL, DevicePtr::from_raw(8), 0)?);
            assert!(adapter.read_back::<i8>(DevicePtr::NULL, 0)?.is_empty());
        }

        Ok(())
    }

    #[test]
    fn overflowing_counts_are_rejected() {
        let adapter = adapter();
        let buf = DeviceBuffer::<i64>::new(DevicePtr::from_raw(0x100), usize::MAX);

        let err = unsafe { adapter.memset(buf, 1, usize::MAX) }.unwrap_err();
        assert!(matches!(err, BindError::InvalidRequest(_)));
        assert!(adapter.allocate::<i32>(usize::MAX).is_err());
        assert!(adapter.allocate::<i32>(0).is_err());
    }

    #[test]
    fn driver_failures_are_device_memory_errors() -> Result<()> {
        let adapter = adapter();
        let alloc = adapter.allocate::<i32>(4)?;

        let err = unsafe { adapter.read_back::<i32>(alloc.ptr(), 5) }.unwrap_err();
        assert!(matches!(err, BindError::DeviceMemory { .. }));
        assert_eq!(err.code_or(0), ze::ERROR_INVALID_ARGUMENT);

        Ok(())
    }

    #[test]
    fn allocations_free_on_drop() -> Result<()> {
        let adapter = adapter();

        let alloc = adapter.zeroed::<f32>(32)?;
        assert_eq!(alloc.read()?, vec![0.0; 32]);
        assert_eq!(adapter.driver().live_allocations(), 1);

        drop(alloc);
        assert_eq!(adapter.driver().live_allocations(), 0);

        Ok(())
    }

    #[test]
    fn is_equal_compares_bits() -> Result<()> {
        let adapter = adapter();
        let a = adapter.allocate::<f32>(3)?;
        let b = adapter.allocate::<f32>(3)?;

        a.write(&[f32::NAN, 0.0, 1.0])?;
        b.write(&[f32::NAN, -0.0, 1.0])?;

        unsafe {
            assert!(adapter.is_equal::<f32>(a.ptr(), a.ptr(), 3)?);
            assert!(!adapter.is_equal::<f32>(a.ptr(), b.ptr(), 3)?);
            assert!(adapter.is_equal::<f32>(a.ptr().offset::<f32>(2), b.ptr().offset::<f32>(2), 1)?);
        }

        assert!(a.write(&[1.0]).is_err());

        Ok(())
    }
}
