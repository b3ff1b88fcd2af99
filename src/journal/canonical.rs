// src/journal/canonical.rs

//! Deterministic JSON encoding for the run journal's hash chain.
//!
//! `hash_up_to` depends on every re-serialisation of an entry producing
//! byte-identical output. The trick is to round-trip through
//! [`serde_json::Value`] rather than serialising the typed struct
//! directly: a derived `Serialize` impl writes struct fields in
//! declaration order, but `Value::Object` is backed by a `BTreeMap`
//! (this crate never enables serde_json's `preserve_order` feature), so
//! going through `Value` sorts every object's keys, recursively, for
//! free. Do not turn that feature on — it would silently break every
//! stored checkpoint hash.

use serde::Serialize;

use crate::error::Result;

/// Serialise `value` as compact JSON with recursively sorted object
/// keys and no insignificant whitespace.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let sorted = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&sorted)?)
}

/// `serde(with = "rfc3339_z")` for `DateTime<Utc>` fields that must hash
/// stably: chrono's default serialisation renders the UTC offset as
/// `+00:00`, but the canonical form this crate commits to uses a `Z`
/// suffix instead.
pub mod rfc3339_z {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }

    pub mod option {
        use chrono::{DateTime, SecondsFormat, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            dt: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match dt {
                Some(dt) => s.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let raw: Option<String> = Option::deserialize(d)?;
            match raw {
                Some(raw) => DateTime::parse_from_rfc3339(&raw)
                    .map(|dt| Some(dt.with_timezone(&Utc)))
                    .map_err(serde::de::Error::custom),
                None => Ok(None),
            }
        }
    }
}
