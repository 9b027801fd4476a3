/// Declare a fieldless enum together with a `TryFrom<u64>` implementation that maps discriminants back to variants.
macro_rules! back_to_enum {
    ($(#[$meta:meta])* $vis:vis enum $name:ident {
        $($(#[$vmeta:meta])* $vname:ident $(= $val:expr)?,)*
    }) => {
        $(#[$meta])*
        $vis enum $name {
            $($(#[$vmeta])* $vname $(= $val)?,)*
        }

        impl core::convert::TryFrom<u64> for $name {
            type Error = $crate::InvalidEncoding;

            fn try_from(v: u64) -> Result<Self, Self::Error> {
                match v {
                    $(x if x == $name::$vname as u64 => Ok($name::$vname),)*
                    _ => Err($crate::InvalidEncoding),
                }
            }
        }
    }
}

pub(crate) use back_to_enum;
