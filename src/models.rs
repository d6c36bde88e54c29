// Typed records for the JSON payloads returned by the capture API.
//
// Parsing is deliberately forgiving: optional fields default when missing,
// timestamps that do not parse become `None`, and enum values this client
// does not know are preserved as `Unknown(raw)`. Only a missing required
// field (e.g. a capture's slug) fails the parse.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

use crate::error::LumaError;

/// Declares a server-side enumeration with a catch-all `Unknown` variant.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $wire:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
            /// A value this client does not recognise, kept verbatim.
            Unknown(String),
        }

        impl $name {
            /// Wire representation of the value.
            pub fn as_str(&self) -> &str {
                match self {
                    $( Self::$variant => $wire, )+
                    Self::Unknown(raw) => raw,
                }
            }

            /// Parse a wire value, ignoring case. Never fails.
            pub fn parse(raw: &str) -> Self {
                let trimmed = raw.trim();
                $(
                    if trimmed.eq_ignore_ascii_case($wire) {
                        return Self::$variant;
                    }
                )+
                Self::Unknown(raw.to_string())
            }

            pub fn is_unknown(&self) -> bool {
                matches!(self, Self::Unknown(_))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                Ok(match Value::deserialize(deserializer)? {
                    Value::String(raw) => Self::parse(&raw),
                    Value::Null => Self::default(),
                    other => Self::Unknown(other.to_string()),
                })
            }
        }
    };
}

wire_enum! {
    /// Kind of capture. Public API uploads are always reconstructions.
    pub enum CaptureType {
        Reconstruction => "reconstruction",
        Generation => "generation",
        Video => "video",
        Images => "images",
    }
}

impl Default for CaptureType {
    fn default() -> Self {
        CaptureType::Reconstruction
    }
}

wire_enum! {
    /// Who can see a capture.
    pub enum PrivacyLevel {
        /// Fully private.
        Private => "private",
        /// Sharable by link.
        Unlisted => "unlisted",
        /// Shows up in feeds and can be featured.
        Public => "public",
        /// Can be remixed by other users.
        Open => "open",
    }
}

impl Default for PrivacyLevel {
    fn default() -> Self {
        PrivacyLevel::Private
    }
}

wire_enum! {
    /// Upload and processing state of a capture. Not to be confused with
    /// [`RunStatus`].
    pub enum CaptureStatus {
        /// Created, nothing uploaded yet.
        New => "new",
        Uploading => "uploading",
        /// Uploaded and waiting for a worker.
        Pending => "pending",
        Processing => "processing",
        Complete => "complete",
        Failed => "failed",
    }
}

impl Default for CaptureStatus {
    fn default() -> Self {
        CaptureStatus::Unknown(String::new())
    }
}

wire_enum! {
    /// State of one processing attempt.
    pub enum RunStatus {
        /// Queued.
        New => "new",
        /// Picked up by a worker.
        Dispatched => "dispatched",
        Failed => "failed",
        Finished => "finished",
    }
}

impl Default for RunStatus {
    fn default() -> Self {
        RunStatus::Unknown(String::new())
    }
}

/// Camera model the footage was shot with. Sent when creating a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CameraType {
    /// Perspective camera.
    #[default]
    Normal,
    Fisheye,
    /// 360 camera.
    Equirectangular,
}

impl CameraType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraType::Normal => "normal",
            CameraType::Fisheye => "fisheye",
            CameraType::Equirectangular => "equirectangular",
        }
    }
}

impl fmt::Display for CameraType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response of the credits query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditInfo {
    /// Credits still available.
    pub remaining: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub used: i64,
    /// Remaining plus used.
    pub total: i64,
}

impl CreditInfo {
    pub fn from_json(value: Value) -> Result<Self, LumaError> {
        serde_json::from_value(value)
            .map_err(|err| LumaError::MalformedResponse(format!("credit info: {err}")))
    }
}

/// Where a capture was taken. API uploads usually have none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureLocation {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub latitude: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub longitude: f64,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_optional_f64"
    )]
    pub altitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    /// Whether other users can see the location.
    #[serde(
        default = "default_true",
        alias = "is_visible",
        deserialize_with = "lenient_visibility"
    )]
    pub is_visible: bool,
}

impl CaptureLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            name: String::new(),
            is_visible: true,
        }
    }
}

/// One output of a finished run, e.g. a mesh or a video render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "type", default, deserialize_with = "lenient_string")]
    pub kind: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: String,
}

/// A processing attempt of a capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInfo {
    #[serde(default)]
    pub status: RunStatus,
    /// Percentage, 0 to 100.
    #[serde(default, deserialize_with = "lenient_progress")]
    pub progress: u8,
    /// Informational only, e.g. `sfm` or `nerf`.
    #[serde(default, deserialize_with = "lenient_string")]
    pub current_stage: String,
    #[serde(default, deserialize_with = "lenient_artifacts")]
    pub artifacts: Vec<Artifact>,
    /// Slug of the capture this run belongs to.
    #[serde(skip_deserializing, default)]
    pub capture_slug: String,
}

/// Snapshot of a capture as reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureInfo {
    pub slug: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(rename = "type", default)]
    pub capture_type: CaptureType,
    #[serde(default, deserialize_with = "lenient_object")]
    pub location: Option<CaptureLocation>,
    #[serde(default)]
    pub privacy: PrivacyLevel,
    /// Creation time.
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default, alias = "updatedAt", deserialize_with = "lenient_timestamp")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub username: String,
    #[serde(default)]
    pub status: CaptureStatus,
    #[serde(default, deserialize_with = "lenient_object")]
    pub latest_run: Option<RunInfo>,
}

impl CaptureInfo {
    /// Build a capture from a raw JSON object.
    pub fn from_json(value: Value) -> Result<Self, LumaError> {
        if !value.is_object() {
            return Err(LumaError::MalformedResponse(format!(
                "expected a capture object, got {value}"
            )));
        }
        let mut capture: CaptureInfo = serde_json::from_value(value)
            .map_err(|err| LumaError::MalformedResponse(format!("capture: {err}")))?;
        if capture.slug.trim().is_empty() {
            return Err(LumaError::MalformedResponse("capture slug is empty".into()));
        }
        if let Some(run) = capture.latest_run.as_mut() {
            run.capture_slug = capture.slug.clone();
        }
        Ok(capture)
    }

    /// Whether the latest run finished and produced its artifacts.
    pub fn is_finished(&self) -> bool {
        matches!(
            self.latest_run.as_ref().map(|run| &run.status),
            Some(RunStatus::Finished)
        )
    }
}

fn default_true() -> bool {
    true
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(value)) => value,
        None | Some(Value::Null) => String::new(),
        Some(other) => other.to_string(),
    })
}

fn lenient_visibility<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(visible)) => visible,
        _ => true,
    })
}

fn number_from(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_optional_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(Option::<Value>::deserialize(deserializer)?
        .as_ref()
        .and_then(number_from)
        .filter(|value| value.is_finite()))
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(lenient_optional_f64(deserializer)?.unwrap_or(0.0))
}

fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|value| value as i64))
            .unwrap_or(0),
        Some(Value::String(raw)) => raw.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

/// Nested records that are missing, null or not the expected shape become
/// `None` rather than failing the outer record.
fn lenient_object<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(value @ Value::Object(_)) => serde_json::from_value(value).ok(),
        _ => None,
    })
}

fn lenient_progress<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let progress = Option::<Value>::deserialize(deserializer)?
        .and_then(|value| match value {
            Value::Number(number) => number.as_f64(),
            Value::String(raw) => raw.trim().trim_end_matches('%').parse().ok(),
            _ => None,
        })
        .unwrap_or(0.0);
    Ok(progress.round().clamp(0.0, 100.0) as u8)
}

fn lenient_artifacts<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Artifact>, D::Error> {
    let Some(Value::Array(items)) = Option::<Value>::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(raw)) => parse_timestamp(&raw),
        _ => None,
    })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    // Timestamps without an offset are UTC.
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
