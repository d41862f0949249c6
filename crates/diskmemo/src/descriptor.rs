//! Request descriptors and their persisted record form
//!
//! A descriptor identifies *what* was computed. The cache stores its record
//! next to the payload and consults [`Descriptor::is_compatible`] to decide
//! whether a stored result may be reused for a new request.

use crate::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Serialized form of a descriptor: a YAML mapping of primitive values.
pub type Record = serde_yaml::Mapping;

/// Capability a request descriptor must provide to be used as a cache key.
///
/// Every method has a default built on serde and `PartialEq`, so plain data
/// types only need an empty impl:
///
/// ```
/// use diskmemo::Descriptor;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, PartialEq, Serialize, Deserialize)]
/// struct Render {
///     scene: String,
///     samples: u32,
/// }
///
/// impl Descriptor for Render {}
/// ```
///
/// Override [`Descriptor::is_compatible`] when only some fields decide reuse,
/// and the record conversions when fields are not plain serde data.
pub trait Descriptor: Serialize + DeserializeOwned + PartialEq {
    /// Convert the descriptor into its record form.
    fn to_record(&self) -> Result<Record> {
        match serde_yaml::to_value(self) {
            Ok(serde_yaml::Value::Mapping(map)) => Ok(map),
            Ok(other) => Err(Error::serialization(format!(
                "descriptor must serialize to a mapping, got {}",
                value_kind(&other)
            ))),
            Err(e) => Err(Error::serialization(format!(
                "Failed to encode descriptor: {e}"
            ))),
        }
    }

    /// Rebuild a descriptor from a stored record.
    fn from_record(record: Record) -> Result<Self> {
        serde_yaml::from_value(serde_yaml::Value::Mapping(record))
            .map_err(|e| Error::serialization(format!("Failed to decode descriptor: {e}")))
    }

    /// Decide whether a stored result can serve the requested descriptor.
    fn is_compatible(requested: &Self, stored: &Self) -> bool {
        requested == stored
    }
}

fn value_kind(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "a boolean",
        serde_yaml::Value::Number(_) => "a number",
        serde_yaml::Value::String(_) => "a string",
        serde_yaml::Value::Sequence(_) => "a sequence",
        serde_yaml::Value::Mapping(_) => "a mapping",
        serde_yaml::Value::Tagged(_) => "a tagged value",
    }
}

/// Render a descriptor as the YAML text stored in `config.yaml`.
pub(crate) fn encode_record<D: Descriptor>(descriptor: &D) -> Result<String> {
    let record = descriptor.to_record()?;
    serde_yaml::to_string(&record)
        .map_err(|e| Error::serialization(format!("Failed to write descriptor record: {e}")))
}

/// Parse `config.yaml` text back into a descriptor.
pub(crate) fn decode_record<D: Descriptor>(text: &str) -> Result<D> {
    let record: Record = serde_yaml::from_str(text)
        .map_err(|e| Error::serialization(format!("Failed to parse descriptor record: {e}")))?;
    D::from_record(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Dummy {
        a: i64,
        b: String,
    }

    impl Descriptor for Dummy {}

    /// Only the resolution matters for reuse; the label is informational.
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Tile {
        resolution: u32,
        label: String,
    }

    impl Descriptor for Tile {
        fn is_compatible(requested: &Self, stored: &Self) -> bool {
            requested.resolution == stored.resolution
        }
    }

    #[test]
    fn test_record_round_trips_through_yaml() {
        let d = Dummy {
            a: 1,
            b: "x".to_string(),
        };
        let text = encode_record(&d).unwrap();
        assert!(text.contains("a: 1"));
        let back: Dummy = decode_record(&text).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn test_record_holds_every_field() {
        let d = Dummy {
            a: 7,
            b: "y".to_string(),
        };
        let record = d.to_record().unwrap();
        assert_eq!(record.len(), 2);
        assert_eq!(record["a"].as_i64(), Some(7));
        assert_eq!(record["b"].as_str(), Some("y"));
    }

    #[test]
    fn test_non_finite_floats_survive_the_record() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Bounds {
            lower: f64,
            upper: f64,
        }
        impl Descriptor for Bounds {}

        let d = Bounds {
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
        };
        let text = encode_record(&d).unwrap();
        assert!(text.contains(".inf"));
        let back: Bounds = decode_record(&text).unwrap();
        assert!(Bounds::is_compatible(&d, &back));
    }

    #[test]
    fn test_non_mapping_descriptor_is_rejected() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Scalar(u8);
        impl Descriptor for Scalar {}

        let err = Scalar(3).to_record().unwrap_err();
        assert!(err.to_string().contains("mapping"));
    }

    #[test]
    fn test_record_of_other_type_fails_to_decode() {
        let text = "resolution: 4\nlabel: hi\n";
        assert!(decode_record::<Dummy>(text).is_err());
    }

    #[test]
    fn test_garbage_yaml_fails_to_decode() {
        assert!(decode_record::<Dummy>(": : :\n- [").is_err());
    }

    #[test]
    fn test_default_compatibility_is_equality() {
        let a = Dummy {
            a: 1,
            b: "x".to_string(),
        };
        let b = Dummy {
            a: 1,
            b: "z".to_string(),
        };
        assert!(Dummy::is_compatible(&a, &a));
        assert!(!Dummy::is_compatible(&a, &b));
    }

    #[test]
    fn test_custom_compatibility_ignores_fields() {
        let requested = Tile {
            resolution: 256,
            label: "new".to_string(),
        };
        let stored = Tile {
            resolution: 256,
            label: "old".to_string(),
        };
        assert!(Tile::is_compatible(&requested, &stored));
    }
}
