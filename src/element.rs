use std::fmt;

/// Tag identifying the element type of a device buffer
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ElementKind {
    I8,
    U8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl ElementKind {
    pub const fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 => 2,
            Self::I32 | Self::F32 => 4,
            Self::I64 | Self::F64 => 8,
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::I8 => "i8",
            Self::U8 => "u8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        };

        write!(f, "{name}")
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Plain-old-data element types that can live in device buffers
///
/// Every bit pattern of an implementor is a valid value, so reading
/// device memory back into a host `Vec<T>` is always sound.
pub trait Element: sealed::Sealed + Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    const KIND: ElementKind;
    const SIZE: usize = Self::KIND.size();

    /// Native-endian byte pattern of `self`, used for device fills
    fn pattern(self) -> Vec<u8>;
}

macro_rules! impl_element {
    ($($t:ty => $kind:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $t {}

            impl Element for $t {
                const KIND: ElementKind = ElementKind::$kind;

                fn pattern(self) -> Vec<u8> {
                    self.to_ne_bytes().to_vec()
                }
            }
        )*
    };
}

impl_element!(i8 => I8, u8 => U8, i16 => I16, i32 => I32, i64 => I64, f32 => F32, f64 => F64);

const _SIZES_MATCH: () = {
    assert!(<i8 as Element>::SIZE == std::mem::size_of::<i8>());
    assert!(<i16 as Element>::SIZE == std::mem::size_of::<i16>());
    assert!(<i32 as Element>::SIZE == std::mem::size_of::<i32>());
    assert!(<i64 as Element>::SIZE == std::mem::size_of::<i64>());
    assert!(<f32 as Element>::SIZE == std::mem::size_of::<f32>());
    assert!(<f64 as Element>::SIZE == std::mem::size_of::<f64>());
};

/// Reinterpret a slice of elements as raw bytes
pub fn as_bytes<T: Element>(values: &[T]) -> &[u8] {
    // # Safety
    // Element types are padding-free primitives, so every byte is initialised
    unsafe { std::slice::from_raw_parts(values.as_ptr().cast(), std::mem::size_of_val(values)) }
}
