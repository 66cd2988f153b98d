use crate::{Access, DeviceModel, RegisterShape, TypedPayload};

/// Compile-time description of one device register.
///
/// Each register is a zero-sized marker type; `Device::read::<R>()` and
/// `Device::write::<R>()` use it to pick the address and payload type.
pub trait Register {
    const ADDRESS: u8;
    const NAME: &'static str;
    const SHAPE: RegisterShape;
    const MODEL: DeviceModel;
    const ACCESS: Access;
    const DESCRIPTION: &'static str;
    type Payload: TypedPayload;
}

/// Declares the register markers of one model and its `descriptors()` table.
macro_rules! register_map {
    (
        model = $model:expr;
        $(
            $name:ident = $address:literal, $payload:ty, $access:ident, $desc:literal;
        )*
    ) => {
        $(
            #[doc = $desc]
            #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
            pub struct $name;

            impl $crate::Register for $name {
                const ADDRESS: u8 = $address;
                const NAME: &'static str = stringify!($name);
                const SHAPE: $crate::RegisterShape = $crate::RegisterShape::$name;
                const MODEL: $crate::DeviceModel = $model;
                const ACCESS: $crate::Access = $crate::Access::$access;
                const DESCRIPTION: &'static str = $desc;
                type Payload = $payload;
            }
        )*

        /// Descriptors of every register of this model, in address order.
        pub fn descriptors() -> Vec<$crate::RegisterDescriptor> {
            vec![$($crate::RegisterDescriptor::of::<$name>()),*]
        }
    };
}

pub(crate) use register_map;
