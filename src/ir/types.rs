//! Value and buffer types of the kernel IR.

use std::fmt;

use strum::{Display, EnumIter, EnumString};

/// Scalar element type stored in a buffer.
///
/// The set is closed apart from [`ElementType::Opaque`], which stands for a
/// dialect type this crate knows nothing about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// 1-bit integer (bit-packed in memory)
    I1,
    /// 8-bit integer
    I8,
    /// 16-bit integer
    I16,
    /// 32-bit integer
    I32,
    /// 64-bit integer
    I64,
    /// IEEE half precision
    F16,
    /// bfloat16
    BF16,
    /// IEEE single precision
    F32,
    /// IEEE double precision
    F64,
    /// Target index type (64 bits)
    Index,
    /// Unknown dialect type, carried by name
    Opaque(String),
}

impl ElementType {
    /// Width of one element in whole bytes.
    ///
    /// Returns `None` for bit-packed and opaque types, which cannot be
    /// addressed per element.
    #[must_use]
    pub fn byte_width(&self) -> Option<u64> {
        match self {
            Self::I1 | Self::Opaque(_) => None,
            Self::I8 => Some(1),
            Self::I16 | Self::F16 | Self::BF16 => Some(2),
            Self::I32 | Self::F32 => Some(4),
            Self::I64 | Self::F64 | Self::Index => Some(8),
        }
    }

    /// Returns true if a buffer of this element type can be replicated into
    /// independently addressable slots.
    #[must_use]
    pub fn is_replicable(&self) -> bool {
        self.byte_width().is_some()
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I1 => f.write_str("i1"),
            Self::I8 => f.write_str("i8"),
            Self::I16 => f.write_str("i16"),
            Self::I32 => f.write_str("i32"),
            Self::I64 => f.write_str("i64"),
            Self::F16 => f.write_str("f16"),
            Self::BF16 => f.write_str("bf16"),
            Self::F32 => f.write_str("f32"),
            Self::F64 => f.write_str("f64"),
            Self::Index => f.write_str("index"),
            Self::Opaque(name) => write!(f, "!{name}"),
        }
    }
}

/// Memory space a buffer lives in.
///
/// Determines whether slot reuse across iterations can race between threads:
/// `private` memory is per-thread and never needs a guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum AddressSpace {
    /// Device-wide global memory
    Global,
    /// Memory shared by one workgroup (LDS)
    Workgroup,
    /// Per-thread registers / scratch
    Private,
}

impl AddressSpace {
    /// Returns true if more than one thread can observe the same storage.
    #[must_use]
    pub fn is_shared(self) -> bool {
        !matches!(self, Self::Private)
    }
}

/// Statically shaped buffer type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferType {
    /// Element type
    pub element: ElementType,
    /// Dimensions, outermost first
    pub shape: Vec<u64>,
    /// Memory space
    pub space: AddressSpace,
}

impl BufferType {
    /// Creates a buffer type in workgroup memory.
    #[must_use]
    pub fn new(element: ElementType, shape: impl Into<Vec<u64>>) -> Self {
        Self {
            element,
            shape: shape.into(),
            space: AddressSpace::Workgroup,
        }
    }

    /// Returns a copy of this type placed in a different address space.
    #[must_use]
    pub fn in_space(mut self, space: AddressSpace) -> Self {
        self.space = space;
        self
    }

    /// Number of elements (product of the dimensions), or `None` if the
    /// product does not fit in a `u64`.
    #[must_use]
    pub fn element_count(&self) -> Option<u64> {
        self.shape.iter().try_fold(1u64, |count, &dim| count.checked_mul(dim))
    }

    /// Storage size in bytes, if the element type has a byte width and the
    /// size fits in a `u64`.
    #[must_use]
    pub fn size_in_bytes(&self) -> Option<u64> {
        self.element.byte_width()?.checked_mul(self.element_count()?)
    }
}

impl fmt::Display for BufferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("buffer<")?;
        for dim in &self.shape {
            write!(f, "{dim}x")?;
        }
        write!(f, "{}, {}>", self.element, self.space)
    }
}

/// Type of an SSA value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// Loop counters and rotation indices
    Index,
    /// Integer scalar of the given bit width
    Int(u32),
    /// Float scalar of the given bit width
    Float(u32),
    /// A buffer handle
    Buffer(BufferType),
}

impl Type {
    /// Returns the buffer type if this is a buffer.
    #[must_use]
    pub fn as_buffer(&self) -> Option<&BufferType> {
        match self {
            Self::Buffer(buffer) => Some(buffer),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index => f.write_str("index"),
            Self::Int(bits) => write!(f, "i{bits}"),
            Self::Float(bits) => write!(f, "f{bits}"),
            Self::Buffer(buffer) => write!(f, "{buffer}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_buffer_size() {
        let ty = BufferType::new(ElementType::F16, vec![16, 32]);
        assert_eq!(ty.element_count(), Some(512));
        assert_eq!(ty.size_in_bytes(), Some(1024));
    }

    #[test]
    fn test_oversized_shapes_have_no_size() {
        let huge = BufferType::new(ElementType::F32, vec![1 << 32, 1 << 32]);
        assert_eq!(huge.element_count(), None);
        assert_eq!(huge.size_in_bytes(), None);

        // the count fits but the byte size does not
        let wide = BufferType::new(ElementType::F64, vec![1 << 62]);
        assert_eq!(wide.element_count(), Some(1 << 62));
        assert_eq!(wide.size_in_bytes(), None);
    }

    #[test]
    fn test_bit_packed_and_opaque_are_not_replicable() {
        assert!(!ElementType::I1.is_replicable());
        assert!(!ElementType::Opaque("vec".into()).is_replicable());
        assert!(ElementType::BF16.is_replicable());
        assert_eq!(BufferType::new(ElementType::I1, vec![8]).size_in_bytes(), None);
    }

    #[test]
    fn test_display() {
        let ty = BufferType::new(ElementType::F32, vec![4, 8]);
        assert_eq!(ty.to_string(), "buffer<4x8xf32, workgroup>");
        let private = ty.in_space(AddressSpace::Private);
        assert_eq!(Type::Buffer(private).to_string(), "buffer<4x8xf32, private>");
        assert_eq!(ElementType::Opaque("foo".into()).to_string(), "!foo");
    }

    #[test]
    fn test_address_space_round_trip_names() {
        for space in AddressSpace::iter() {
            assert_eq!(AddressSpace::from_str(&space.to_string()), Ok(space));
        }
        assert!(AddressSpace::Global.is_shared());
        assert!(!AddressSpace::Private.is_shared());
    }
}
