use bytemuck::Pod;
use derive_more::Display;
use half::f16;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Element types a field entry may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DataType {
    F16,
    F32,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
}

impl DataType {
    /// Returns the byte size of one element of this type.
    pub const fn size(self) -> usize {
        match self {
            DataType::I8 | DataType::U8 => 1,
            DataType::F16 | DataType::I16 | DataType::U16 => 2,
            DataType::F32 | DataType::I32 | DataType::U32 => 4,
            DataType::F64 | DataType::I64 | DataType::U64 => 8,
        }
    }
}

/// A plain element that can be stored in a field entry and moved across threads.
pub trait Scalar: Sized + Pod + Send + Sync {
    const DATA_TYPE: DataType;
}

macro_rules! impl_scalar {
    ($ty:ty, $data_type:expr) => {
        impl Scalar for $ty {
            const DATA_TYPE: DataType = $data_type;
        }
    };
}

impl_scalar!(f16, DataType::F16);
impl_scalar!(f32, DataType::F32);
impl_scalar!(f64, DataType::F64);
impl_scalar!(i8, DataType::I8);
impl_scalar!(i16, DataType::I16);
impl_scalar!(i32, DataType::I32);
impl_scalar!(i64, DataType::I64);
impl_scalar!(u8, DataType::U8);
impl_scalar!(u16, DataType::U16);
impl_scalar!(u32, DataType::U32);
impl_scalar!(u64, DataType::U64);

#[cfg(test)]
mod tests {
    use half::f16;

    use super::{DataType, Scalar};

    #[test]
    fn test_data_type_size() {
        fn check<T: Scalar>() {
            assert_eq!(T::DATA_TYPE.size(), size_of::<T>(), "{}", T::DATA_TYPE);
        }
        check::<f16>();
        check::<f32>();
        check::<f64>();
        check::<i8>();
        check::<i16>();
        check::<i32>();
        check::<i64>();
        check::<u8>();
        check::<u16>();
        check::<u32>();
        check::<u64>();
        assert_eq!(DataType::F16.to_string(), "F16");
    }
}
