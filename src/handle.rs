//! Typed wrappers around the raw integers that cross the native boundary

use std::{fmt, marker::PhantomData};

use crate::element::Element;

macro_rules! raw_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub const NULL: Self = Self(0);

            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn raw(self) -> u64 {
                self.0
            }

            pub const fn is_null(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

raw_handle!(
    /// Handle to a device binary loaded into the driver
    ModuleHandle
);

raw_handle!(
    /// Handle to a kernel function resolved from a loaded module
    KernelHandle
);

raw_handle!(
    /// Address of device memory
    DevicePtr
);

impl ModuleHandle {
    /// Byte-encoded form of the handle, as handed to managed callers
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_ne_bytes()
    }

    /// Returns `None` unless `bytes` is exactly 8 bytes long
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; 8] = bytes.try_into().ok()?;
        Some(Self(u64::from_ne_bytes(bytes)))
    }
}

impl DevicePtr {
    /// Pointer `count` elements of type `T` past this one
    pub fn offset<T: Element>(self, count: usize) -> Self {
        self.byte_offset(count * T::SIZE)
    }

    pub fn byte_offset(self, bytes: usize) -> Self {
        Self(self.0 + bytes as u64)
    }
}

/// Group, grid or block dimensions
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    pub const ONE: Self = Self { x: 1, y: 1, z: 1 };

    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub const fn linear(x: u32) -> Self {
        Self { x, y: 1, z: 1 }
    }

    /// Total number of work items, widened so it cannot overflow
    pub fn volume(&self) -> u64 {
        u64::from(self.x) * u64::from(self.y) * u64::from(self.z)
    }

    pub fn has_zero(&self) -> bool {
        self.x == 0 || self.y == 0 || self.z == 0
    }
}

impl From<[u32; 3]> for Dim3 {
    fn from([x, y, z]: [u32; 3]) -> Self {
        Self { x, y, z }
    }
}

impl From<Dim3> for [u32; 3] {
    fn from(dim: Dim3) -> Self {
        [dim.x, dim.y, dim.z]
    }
}

impl fmt::Display for Dim3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// A typed view of device memory: a pointer and an element count
///
/// Carries no ownership, the allocation is owned by whoever created
/// it and must outlive every operation that uses this view.
pub struct DeviceBuffer<T: Element> {
    ptr: DevicePtr,
    len: usize,
    marker: PhantomData<T>,
}

impl<T: Element> Clone for DeviceBuffer<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Element> Copy for DeviceBuffer<T> {}

impl<T: Element> PartialEq for DeviceBuffer<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr && self.len == other.len
    }
}

impl<T: Element> Eq for DeviceBuffer<T> {}

impl<T: Element> fmt::Debug for DeviceBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceBuffer<{}>({}, {})", T::KIND, self.ptr, self.len)
    }
}

impl<T: Element> DeviceBuffer<T> {
    pub const fn new(ptr: DevicePtr, len: usize) -> Self {
        Self { ptr, len, marker: PhantomData }
    }

    pub const fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bytes(&self) -> usize {
        self.len * T::SIZE
    }

    /// Sub-view of `len` elements starting `start` elements in
    pub fn slice(&self, start: usize, len: usize) -> Option<Self> {
        let end = start.checked_add(len)?;
        (end <= self.len).then(|| Self::new(self.ptr.offset::<T>(start), len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_handle_bytes() {
        let handle = ModuleHandle::from_raw(0xdead_beef_0000_1234);
        let bytes = handle.to_bytes();
        assert_eq!(ModuleHandle::from_bytes(&bytes), Some(handle));
        assert_eq!(ModuleHandle::from_bytes(&bytes[..7]), None);
    }

    #[test]
    fn pointer_offsets_by_element_width() {
        let ptr = DevicePtr::from_raw(0x1000);
        assert_eq!(ptr.offset::<i8>(3).raw(), 0x1003);
        assert_eq!(ptr.offset::<i32>(3).raw(), 0x100c);
        assert_eq!(ptr.offset::<i64>(3).raw(), 0x1018);
    }

    #[test]
    fn buffer_slices() {
        let buf = DeviceBuffer::<i32>::new(DevicePtr::from_raw(0x100), 16);
        let sub = buf.slice(4, 8).unwrap();
        assert_eq!(sub.ptr().raw(), 0x110);
        assert_eq!(sub.len(), 8);
        assert_eq!(sub.bytes(), 32);
        assert!(buf.slice(10, 7).is_none());
        assert!(buf.slice(usize::MAX, 2).is_none());
    }

    #[test]
    fn dim3_volume_does_not_overflow() {
        let dim = Dim3::new(u32::MAX, u32::MAX, 2);
        assert_eq!(dim.volume(), u64::from(u32::MAX) * u64::from(u32::MAX) * 2);
        assert!(Dim3::new(4, 0, 1).has_zero());
        assert_eq!(<[u32; 3]>::from(Dim3::linear(7)), [7, 1, 1]);
    }
}
