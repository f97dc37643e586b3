/// Define a protocol number enumeration that keeps values it does not name.
///
/// Header fields such as the ether type or the IP protocol are registries, a frame may carry any
/// value. The enumeration converts both ways with its integer type, values without a variant
/// become `Unknown` and are written back unchanged.
///
/// ```ignore
/// enum_with_unknown! {
///     /// Protocol field of a PPP frame.
///     pub enum PppProtocol(u16) {
///         Ipv4 = 0x0021,
///         Lcp  = 0xc021,
///     }
/// }
/// ```
// After `enum_with_unknown` of smoltcp, Copyright (C) 2016 whitequark@whitequark.org
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident($ty:ty) {
            $( $( #[$variant_attr:meta] )* $variant:ident = $value:expr ),+ $(,)*
        }
    ) => {
        #[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
        $( #[$enum_attr] )*
        pub enum $name {
            $(
                $( #[$variant_attr] )*
                #[allow(missing_docs)]
                $variant,
            )+
            /// A value without a variant, kept as received or given.
            Unknown($ty),
        }

        impl From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant, )+
                    other => $name::Unknown(other),
                }
            }
        }

        impl From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value, )+
                    $name::Unknown(other) => other,
                }
            }
        }
    }
}
