//! Record validation
//!
//! A candidate is persisted only if it carries the fields the sink needs:
//!
//! | path              | type   |
//! |-------------------|--------|
//! | `item`            | object |
//! | `url`             | string |
//! | `item.reference`  | string |
//! | `item.vehicle`    | object |
//! | `item.price`      | number |
//! | `vehicle.make`    | string |
//! | `vehicle.model`   | string |
//! | `vehicle.year`    | number |
//!
//! Optional vehicle fields are type-checked only when present and non-null.
//! A mismatch there is a warning, never a rejection.

use serde_json::Value;

use crate::types::Record;

/// JSON type a field must have
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// JSON string
    String,
    /// JSON number (integer or float)
    Number,
    /// JSON object
    Object,
}

impl FieldKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Object => value.is_object(),
        }
    }
}

const REQUIRED_TOP: &[(&str, FieldKind)] = &[("item", FieldKind::Object), ("url", FieldKind::String)];

const REQUIRED_ITEM: &[(&str, FieldKind)] = &[
    ("reference", FieldKind::String),
    ("vehicle", FieldKind::Object),
    ("price", FieldKind::Number),
];

const REQUIRED_VEHICLE: &[(&str, FieldKind)] = &[
    ("make", FieldKind::String),
    ("model", FieldKind::String),
    ("year", FieldKind::Number),
];

const OPTIONAL_VEHICLE: &[(&str, FieldKind)] = &[
    ("vin", FieldKind::String),
    ("detailedModel", FieldKind::String),
    ("version", FieldKind::String),
    ("trimLevel", FieldKind::String),
    ("doors", FieldKind::Number),
    ("gearbox", FieldKind::String),
    ("motorization", FieldKind::String),
    ("energy", FieldKind::String),
    ("externalColor", FieldKind::String),
    ("category", FieldKind::String),
    ("family", FieldKind::String),
    ("mileage", FieldKind::Number),
];

/// Why a candidate was rejected
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// Required field absent
    Missing {
        /// Dotted path of the field
        path: String,
    },
    /// Required field present with the wrong type
    WrongType {
        /// Dotted path of the field
        path: String,
        /// Expected type
        expected: FieldKind,
    },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::Missing { path } => write!(f, "missing required field {path}"),
            Rejection::WrongType { path, expected } => {
                write!(f, "field {path} is not a {expected:?}")
            }
        }
    }
}

/// Detailed validation result
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Validation {
    /// First required-field failure, if any
    pub rejection: Option<Rejection>,
    /// Optional fields present with an unexpected type
    pub warnings: Vec<String>,
}

impl Validation {
    /// Whether the candidate may be persisted
    pub fn is_valid(&self) -> bool {
        self.rejection.is_none()
    }
}

fn require(
    container: &Value,
    prefix: &str,
    fields: &[(&str, FieldKind)],
) -> Result<(), Rejection> {
    for (name, kind) in fields {
        let path = if prefix.is_empty() {
            (*name).to_string()
        } else {
            format!("{prefix}.{name}")
        };
        match container.get(name) {
            None => return Err(Rejection::Missing { path }),
            Some(value) if !kind.matches(value) => {
                return Err(Rejection::WrongType {
                    path,
                    expected: *kind,
                });
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Check a candidate and report the reason for any rejection
pub fn check(candidate: &Value) -> Validation {
    let mut validation = Validation::default();

    if !candidate.is_object() {
        validation.rejection = Some(Rejection::WrongType {
            path: "$".to_string(),
            expected: FieldKind::Object,
        });
        return validation;
    }

    let required = require(candidate, "", REQUIRED_TOP)
        .and_then(|_| require(&candidate["item"], "item", REQUIRED_ITEM))
        .and_then(|_| require(&candidate["item"]["vehicle"], "vehicle", REQUIRED_VEHICLE));
    if let Err(rejection) = required {
        validation.rejection = Some(rejection);
        return validation;
    }

    let vehicle = &candidate["item"]["vehicle"];
    for (name, kind) in OPTIONAL_VEHICLE {
        match vehicle.get(name) {
            Some(Value::Null) | None => {}
            Some(value) if !kind.matches(value) => {
                validation
                    .warnings
                    .push(format!("vehicle.{name} is not a {kind:?}"));
            }
            Some(_) => {}
        }
    }

    validation
}

/// Whether a candidate is well-formed enough to persist
pub fn validate(candidate: &Value) -> bool {
    let validation = check(candidate);
    for warning in &validation.warnings {
        tracing::warn!(warning = %warning, "Optional listing field has unexpected type");
    }
    if let Some(rejection) = &validation.rejection {
        tracing::debug!(reason = %rejection, "Rejected listing");
    }
    validation.is_valid()
}

/// Validate a record's payload
pub fn validate_record(record: &Record) -> bool {
    validate(record.payload())
}
