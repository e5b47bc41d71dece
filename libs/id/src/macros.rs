//! Macros for defining typed ID types.

/// Macro to define a typed ID wrapping an opaque, master-issued string.
///
/// This generates a newtype wrapper with:
/// - `parse()` that rejects empty values and embedded path separators
/// - `Display` and `FromStr` implementations
/// - `Serialize` and `Deserialize` as a bare string
/// - `Ord`, `Hash`, and other standard traits
///
/// Master-issued identifiers carry no structure we may rely on; the only
/// validation is that they are usable as storage-key components.
///
/// # Example
///
/// ```ignore
/// define_id!(OfferId);
/// define_id!(AgentId);
///
/// let offer_id: OfferId = "offer-127".parse()?;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        /// A typed ID for this resource kind.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// Parses an ID from a string.
            ///
            /// The value must be non-empty and must not contain `/`, which
            /// is reserved as the storage-key separator.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                if s.is_empty() {
                    return Err($crate::IdError::Empty);
                }
                if s.contains('/') {
                    return Err($crate::IdError::InvalidFormat {
                        message: format!("'{s}' contains a reserved '/'"),
                    });
                }
                Ok(Self(s.to_string()))
            }

            /// Returns the ID as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the ID, returning the inner string.
            #[must_use]
            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}
