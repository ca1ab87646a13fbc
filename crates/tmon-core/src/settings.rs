//! # Device Settings Schema
//!
//! Registry of the settings keys field units understand, and the check
//! applied to every staged patch.
//!
//! ## Validation Rules
//! ```text
//! patch ──► is object? ──no──► ValidationError::NotAnObject
//!              │
//!              ▼ for each key
//!         registered? ──yes──► kind matches? ──no──► WrongSettingKind
//!              │
//!              no
//!              ▼
//!         policy = warehouse ──► keep key, report in unknown_keys
//!         policy = reject    ──► UnknownSettingKeys
//! ```
//!
//! Values are stored exactly as given; bools additionally accept `0`/`1`
//! because older firmware reports relays that way.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// Value kind of a registered settings key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingKind {
    Bool,
    Int,
    Float,
    String,
}

impl SettingKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            SettingKind::Bool => match value {
                Value::Bool(_) => true,
                Value::Number(n) => matches!(n.as_u64(), Some(0) | Some(1)),
                _ => false,
            },
            SettingKind::Int => value.is_i64() || value.is_u64(),
            SettingKind::Float => value.is_number(),
            SettingKind::String => value.is_string(),
        }
    }
}

impl fmt::Display for SettingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SettingKind::Bool => "bool",
            SettingKind::Int => "int",
            SettingKind::Float => "float",
            SettingKind::String => "string",
        };
        f.write_str(name)
    }
}

/// What to do with keys missing from the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownKeyPolicy {
    /// Keep them in `staged` and report them back to the caller.
    #[default]
    Warehouse,
    /// Fail the whole patch.
    Reject,
}

impl FromStr for UnknownKeyPolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "warehouse" => Ok(UnknownKeyPolicy::Warehouse),
            "reject" => Ok(UnknownKeyPolicy::Reject),
            other => Err(ValidationError::invalid_format(
                "unknown_keys",
                format!("expected 'warehouse' or 'reject', got '{}'", other),
            )),
        }
    }
}

/// A patch that passed [`SettingsSchema::validate_patch`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSettings {
    /// The patch as a JSON object, unchanged.
    pub settings: Value,
    /// Keys outside the registry that were warehoused.
    pub unknown_keys: Vec<String>,
}

/// Known settings keys and their kinds.
#[derive(Debug, Clone)]
pub struct SettingsSchema {
    keys: BTreeMap<String, SettingKind>,
}

impl Default for SettingsSchema {
    fn default() -> Self {
        let mut keys = BTreeMap::new();
        for key in ["GPS_LAT", "GPS_LNG", "GPS_ALT_M", "GPS_ACCURACY_M", "TEMP_OFFSET_C"] {
            keys.insert(key.to_string(), SettingKind::Float);
        }
        for relay in 1..=8 {
            keys.insert(format!("ENABLE_RELAY{}", relay), SettingKind::Bool);
        }
        keys.insert("ENABLE_OLED".to_string(), SettingKind::Bool);
        keys.insert("ENABLE_LORA".to_string(), SettingKind::Bool);
        keys.insert("SAMPLE_INTERVAL_S".to_string(), SettingKind::Int);
        keys.insert("FIELD_DATA_SEND_INTERVAL".to_string(), SettingKind::Int);
        keys.insert("UNIT_NAME".to_string(), SettingKind::String);
        keys.insert("NODE_TYPE".to_string(), SettingKind::String);
        keys.insert("WIFI_SSID".to_string(), SettingKind::String);
        SettingsSchema { keys }
    }
}

impl SettingsSchema {
    /// Empty registry; every key is unknown.
    pub fn empty() -> Self {
        SettingsSchema {
            keys: BTreeMap::new(),
        }
    }

    /// Registers (or re-types) a key.
    pub fn with_key(mut self, key: impl Into<String>, kind: SettingKind) -> Self {
        self.keys.insert(key.into(), kind);
        self
    }

    pub fn kind_of(&self, key: &str) -> Option<SettingKind> {
        self.keys.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Checks a settings patch against the registry.
    pub fn validate_patch(
        &self,
        patch: &Value,
        policy: UnknownKeyPolicy,
    ) -> Result<ValidatedSettings, ValidationError> {
        let object: &Map<String, Value> = patch.as_object().ok_or(ValidationError::NotAnObject)?;

        let mut unknown_keys = Vec::new();
        for (key, value) in object {
            match self.kind_of(key) {
                Some(kind) if !kind.accepts(value) => {
                    return Err(ValidationError::WrongSettingKind {
                        key: key.clone(),
                        expected: kind.to_string(),
                    });
                }
                Some(_) => {}
                None => unknown_keys.push(key.clone()),
            }
        }

        if policy == UnknownKeyPolicy::Reject && !unknown_keys.is_empty() {
            return Err(ValidationError::UnknownSettingKeys { keys: unknown_keys });
        }

        Ok(ValidatedSettings {
            settings: patch.clone(),
            unknown_keys,
        })
    }
}
