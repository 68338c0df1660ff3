use crate::domain::OperationMode;
use crate::translator::record::RequestRecord;
use thiserror::Error;

/// Route-only parameters the static map endpoint refuses.
pub const ROUTE_PARAMETERS: &[&str] = &[
    "travelMode",
    "avoid",
    "distanceBeforeFirstTurn",
    "dbft",
    "dateTime",
    "dt",
    "wp",
    "maxSolutions",
    "maxSolns",
    "optimize",
    "optmz",
    "timeType",
    "tt",
    "waypoint",
];

/// Full parameter names that must be sent in their short form for static maps.
pub const STATIC_MAP_ALIASES: &[(&str, &str)] = &[
    ("declutterPins", "dcl"),
    ("format", "fmt"),
    ("mapArea", "ma"),
    ("mapSize", "ms"),
    ("pushpin", "pp"),
    ("mapMetadata", "mmd"),
    ("highlightEntity", "he"),
    ("output", "o"),
];

/// Full parameter names that must be sent in their short form for metadata.
pub const METADATA_ALIASES: &[(&str, &str)] = &[
    ("include", "incl"),
    ("orientation", "dir"),
    ("zoomLevel", "zl"),
    ("output", "o"),
];

/// Fields that place the map; at least one is required for static maps.
pub const LOCATOR_FIELDS: &[&str] = &["centerPoint", "ma", "pp", "query"];

/// Locators that cannot be combined with each other (`pp` combines with any).
pub const EXCLUSIVE_LOCATORS: &[&str] = &["centerPoint", "ma", "query"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("record must be a JSON object, got {found}")]
    NotAnObject { found: &'static str },
    #[error("route parameter `{field}` is not supported for static maps")]
    UnsupportedRouteParameter { field: &'static str },
    #[error("use the alias `{alias}` instead of `{field}`")]
    AliasRequired {
        field: &'static str,
        alias: &'static str,
    },
    #[error("one of `centerPoint`, `pp`, `ma` or `query` must be present")]
    MissingLocator,
    #[error("`{first}` cannot be combined with `{second}`")]
    ConflictingLocators {
        first: &'static str,
        second: &'static str,
    },
    #[error("`{field}` must be {expected}")]
    InvalidFieldType {
        field: &'static str,
        expected: &'static str,
    },
    #[error("output format `xml` is not supported, only JSON responses are handled")]
    UnsupportedOutputFormat,
    #[error("`zl` is required when `centerPoint` is present")]
    MissingZoomLevel,
    #[error("`zl` is only accepted together with `centerPoint`")]
    UnexpectedZoomLevel,
}

impl ValidationError {
    /// Name of the rule that produced this error.
    pub fn rule(&self) -> &'static str {
        match self {
            ValidationError::NotAnObject { .. } => "record-object",
            ValidationError::UnsupportedRouteParameter { .. } => "unsupported-route-parameter",
            ValidationError::AliasRequired { .. } => "alias-required",
            ValidationError::MissingLocator => "missing-locator",
            ValidationError::ConflictingLocators { .. } => "conflicting-locators",
            ValidationError::InvalidFieldType { .. } => "invalid-field-type",
            ValidationError::UnsupportedOutputFormat => "unsupported-output-format",
            ValidationError::MissingZoomLevel => "missing-zoom-level",
            ValidationError::UnexpectedZoomLevel => "unexpected-zoom-level",
        }
    }
}

type RuleCheck = fn(&RequestRecord) -> Result<(), ValidationError>;

/// A named predicate over a request record.
#[derive(Clone, Copy)]
pub struct ValidationRule {
    name: &'static str,
    check: RuleCheck,
}

impl ValidationRule {
    pub const fn new(name: &'static str, check: RuleCheck) -> Self {
        Self { name, check }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn check(&self, record: &RequestRecord) -> Result<(), ValidationError> {
        (self.check)(record)
    }
}

impl std::fmt::Debug for ValidationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationRule")
            .field("name", &self.name)
            .finish()
    }
}

pub const STATIC_MAP_RULES: &[ValidationRule] = &[
    ValidationRule::new("unsupported-route-parameter", reject_route_parameters),
    ValidationRule::new("alias-required", require_static_map_aliases),
    ValidationRule::new("missing-locator", require_locator),
    ValidationRule::new("conflicting-locators", reject_conflicting_locators),
    ValidationRule::new("invalid-field-type", check_static_map_types),
    ValidationRule::new("unsupported-output-format", reject_xml_output),
];

pub const IMAGERY_METADATA_RULES: &[ValidationRule] = &[
    ValidationRule::new("unsupported-output-format", reject_xml_output),
    ValidationRule::new("missing-zoom-level", require_zoom_with_center),
    ValidationRule::new("unexpected-zoom-level", require_center_with_zoom),
    ValidationRule::new("alias-required", require_metadata_aliases),
    ValidationRule::new("invalid-field-type", check_metadata_types),
];

pub fn rules_for(mode: OperationMode) -> &'static [ValidationRule] {
    match mode {
        OperationMode::StaticMap => STATIC_MAP_RULES,
        OperationMode::ImageryMetadata => IMAGERY_METADATA_RULES,
    }
}

/// Runs the rules for `mode` in order and stops at the first violation.
pub fn validate(mode: OperationMode, record: &RequestRecord) -> Result<(), ValidationError> {
    rules_for(mode)
        .iter()
        .try_for_each(|rule| rule.check(record))
}

fn reject_route_parameters(record: &RequestRecord) -> Result<(), ValidationError> {
    match ROUTE_PARAMETERS.iter().find(|field| record.has(field)) {
        Some(&field) => Err(ValidationError::UnsupportedRouteParameter { field }),
        None => Ok(()),
    }
}

fn require_aliases(
    record: &RequestRecord,
    aliases: &'static [(&'static str, &'static str)],
) -> Result<(), ValidationError> {
    match aliases.iter().find(|(field, _)| record.has(field)) {
        Some(&(field, alias)) => Err(ValidationError::AliasRequired { field, alias }),
        None => Ok(()),
    }
}

fn require_static_map_aliases(record: &RequestRecord) -> Result<(), ValidationError> {
    require_aliases(record, STATIC_MAP_ALIASES)
}

fn require_metadata_aliases(record: &RequestRecord) -> Result<(), ValidationError> {
    require_aliases(record, METADATA_ALIASES)
}

fn require_locator(record: &RequestRecord) -> Result<(), ValidationError> {
    if LOCATOR_FIELDS.iter().any(|field| record.has(field)) {
        Ok(())
    } else {
        Err(ValidationError::MissingLocator)
    }
}

fn reject_conflicting_locators(record: &RequestRecord) -> Result<(), ValidationError> {
    let mut present = EXCLUSIVE_LOCATORS.iter().filter(|field| record.has(field));
    match (present.next(), present.next()) {
        (Some(&first), Some(&second)) => Err(ValidationError::ConflictingLocators { first, second }),
        _ => Ok(()),
    }
}

fn require_array(record: &RequestRecord, field: &'static str) -> Result<(), ValidationError> {
    if record.has(field) && !record.is_array(field) {
        return Err(ValidationError::InvalidFieldType {
            field,
            expected: "an array",
        });
    }
    Ok(())
}

fn check_static_map_types(record: &RequestRecord) -> Result<(), ValidationError> {
    require_array(record, "centerPoint")?;
    require_array(record, "ma")?;
    if record.has("query") && !record.is_string("query") {
        return Err(ValidationError::InvalidFieldType {
            field: "query",
            expected: "a string",
        });
    }
    require_array(record, "pp")
}

fn check_metadata_types(record: &RequestRecord) -> Result<(), ValidationError> {
    require_array(record, "centerPoint")
}

fn reject_xml_output(record: &RequestRecord) -> Result<(), ValidationError> {
    if record.is_str("o", "xml") {
        Err(ValidationError::UnsupportedOutputFormat)
    } else {
        Ok(())
    }
}

fn require_zoom_with_center(record: &RequestRecord) -> Result<(), ValidationError> {
    if record.has("centerPoint") && !record.has("zl") {
        Err(ValidationError::MissingZoomLevel)
    } else {
        Ok(())
    }
}

fn require_center_with_zoom(record: &RequestRecord) -> Result<(), ValidationError> {
    if !record.has("centerPoint") && record.has("zl") {
        Err(ValidationError::UnexpectedZoomLevel)
    } else {
        Ok(())
    }
}
