/// Serde passthrough for bitflags types: serialized as the raw bits, unknown
/// bits dropped on the way back in.
macro_rules! impl_serde_for_bitflags {(
    $($t:ty: $bits:ty),* $(,)?
) => (
    $(
        impl serde::Serialize for $t {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                self.bits().serialize(serializer)
            }
        }

        impl<'de> serde::Deserialize<'de> for $t {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let bits = <$bits as serde::Deserialize>::deserialize(deserializer)?;
                Ok(<$t>::from_bits_truncate(bits))
            }
        }
    )*
)}

pub(crate) use impl_serde_for_bitflags;
