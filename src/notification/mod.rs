//! Notification envelope.
//!
//! A [`SubscribeResponse`] is the unit streamed by a telemetry subscription
//! and the unit propagated between cache instances. The sync layer only ever
//! looks at two things inside it: the response variant and the target name
//! carried in the notification prefix. Everything else is opaque payload.
//!
//! # Example
//!
//! ```
//! use telemetry_cache::notification::{Notification, Path, SubscribeResponse, TypedValue, Update};
//!
//! let response = SubscribeResponse::update(Notification {
//!     timestamp: 1,
//!     prefix: Some(Path::with_target("router1")),
//!     update: vec![Update::new(
//!         "interface[name=ethernet-1/1]/description".parse().unwrap(),
//!         TypedValue::AsciiVal("uplink".into()),
//!     )],
//!     ..Default::default()
//! });
//!
//! assert_eq!(response.target(), Some("router1"));
//! ```

pub mod codec;
mod path;

pub use path::{Path, PathElem, PathError};

use serde::{Deserialize, Serialize};

/// One message of a telemetry subscription stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeResponse {
    pub response: Response,
}

/// The routable part of a [`SubscribeResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    /// A batch of updates for one target
    Update(Notification),
    /// Marks the end of the initial sync of a subscription
    SyncResponse(bool),
    /// Error reported by the target
    Error(String),
}

/// A batch of value updates and deletions sharing one prefix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Nanoseconds since the Unix epoch
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<Path>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub update: Vec<Update>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete: Vec<Path>,
    #[serde(default)]
    pub atomic: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub path: Path,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val: Option<TypedValue>,
    #[serde(default)]
    pub duplicates: u32,
}

/// Scalar value carried by an [`Update`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypedValue {
    StringVal(String),
    IntVal(i64),
    UintVal(u64),
    BoolVal(bool),
    BytesVal(Vec<u8>),
    DoubleVal(#[serde(with = "double_repr")] f64),
    AsciiVal(String),
    JsonVal(Vec<u8>),
    JsonIetfVal(Vec<u8>),
}

/// JSON has no NaN or infinity. Finite doubles stay numbers; the rest are
/// written as the strings `"NaN"`, `"inf"` and `"-inf"`.
mod double_repr {
    use serde::de::{self, Unexpected};
    use serde::{Deserialize, Deserializer, Serializer};

    const NAN: &str = "NaN";
    const INF: &str = "inf";
    const NEG_INF: &str = "-inf";

    pub(super) fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str(NAN)
        } else if value.is_sign_positive() {
            serializer.serialize_str(INF)
        } else {
            serializer.serialize_str(NEG_INF)
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => match text.as_str() {
                NAN => Ok(f64::NAN),
                INF => Ok(f64::INFINITY),
                NEG_INF => Ok(f64::NEG_INFINITY),
                other => Err(de::Error::invalid_value(
                    Unexpected::Str(other),
                    &"a number, \"NaN\", \"inf\" or \"-inf\"",
                )),
            },
        }
    }
}

impl SubscribeResponse {
    #[must_use]
    pub fn update(notification: Notification) -> Self {
        Self { response: Response::Update(notification) }
    }

    #[must_use]
    pub fn sync_response() -> Self {
        Self { response: Response::SyncResponse(true) }
    }

    /// The notification, if this is an update response.
    #[must_use]
    pub fn notification(&self) -> Option<&Notification> {
        match &self.response {
            Response::Update(n) => Some(n),
            _ => None,
        }
    }

    /// Target name from the notification prefix; `None` for non-update
    /// responses and for updates with an empty target.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.notification().and_then(Notification::target)
    }
}

impl Notification {
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.prefix
            .as_ref()
            .map(|p| p.target.as_str())
            .filter(|t| !t.is_empty())
    }

    /// True when there is nothing to apply.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.update.is_empty() && self.delete.is_empty()
    }
}

impl Update {
    #[must_use]
    pub fn new(path: Path, val: TypedValue) -> Self {
        Self { path, val: Some(val), duplicates: 0 }
    }
}
