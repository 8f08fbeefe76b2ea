//! Schema - Define type schemas for resources
//!
//! Providers define schemas for each resource type,
//! enabling type validation before any API call is made.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::resource::Value;

/// Attribute type
#[derive(Debug, Clone)]
pub enum AttributeType {
    /// String
    String,
    /// Integer
    Int,
    /// Boolean
    Bool,
    /// Enum (list of allowed values)
    Enum(Vec<String>),
    /// Integer within an inclusive range
    IntRange { min: i64, max: i64 },
    /// String whose character count is within an inclusive range
    StringLength { min: usize, max: usize },
    /// Custom type (with validation function)
    Custom {
        name: String,
        base: Box<AttributeType>,
        validate: fn(&Value) -> Result<(), String>,
    },
    /// List
    List(Box<AttributeType>),
    /// Map
    Map(Box<AttributeType>),
    /// Nested block with its own fields (used as the element of a List)
    Struct(Vec<AttributeSchema>),
}

impl AttributeType {
    /// Check if a value conforms to this type
    pub fn validate(&self, value: &Value) -> Result<(), TypeError> {
        // References resolve to strings at apply time
        if matches!(value, Value::ResourceRef(_, _)) && self.accepts_reference() {
            return Ok(());
        }

        match (self, value) {
            (AttributeType::String, Value::String(_)) => Ok(()),
            (AttributeType::Int, Value::Int(_)) => Ok(()),
            (AttributeType::Bool, Value::Bool(_)) => Ok(()),

            (AttributeType::Enum(variants), Value::String(s)) => {
                if variants.iter().any(|v| v == s) {
                    Ok(())
                } else {
                    Err(TypeError::InvalidEnumVariant {
                        value: s.clone(),
                        expected: variants.clone(),
                    })
                }
            }

            (AttributeType::IntRange { min, max }, Value::Int(n)) => {
                if n >= min && n <= max {
                    Ok(())
                } else {
                    Err(TypeError::OutOfRange {
                        value: *n,
                        min: *min,
                        max: *max,
                    })
                }
            }

            (AttributeType::StringLength { min, max }, Value::String(s)) => {
                let len = s.chars().count();
                if len >= *min && len <= *max {
                    Ok(())
                } else {
                    Err(TypeError::InvalidLength {
                        len,
                        min: *min,
                        max: *max,
                    })
                }
            }

            (AttributeType::Custom { validate, .. }, v) => {
                validate(v).map_err(|msg| TypeError::ValidationFailed { message: msg })
            }

            (AttributeType::List(inner), Value::List(items)) => {
                for (i, item) in items.iter().enumerate() {
                    inner.validate(item).map_err(|e| TypeError::ListItemError {
                        index: i,
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Map(inner), Value::Map(map)) => {
                for (k, v) in map {
                    inner.validate(v).map_err(|e| TypeError::MapValueError {
                        key: k.clone(),
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Struct(fields), Value::Map(map)) => validate_struct(fields, map),

            _ => Err(TypeError::TypeMismatch {
                expected: self.type_name(),
                got: value.type_name(),
            }),
        }
    }

    fn accepts_reference(&self) -> bool {
        match self {
            AttributeType::String | AttributeType::Enum(_) | AttributeType::StringLength { .. } => {
                true
            }
            AttributeType::Custom { base, .. } => base.accepts_reference(),
            _ => false,
        }
    }

    pub fn type_name(&self) -> String {
        match self {
            AttributeType::String => "String".to_string(),
            AttributeType::Int => "Int".to_string(),
            AttributeType::Bool => "Bool".to_string(),
            AttributeType::Enum(variants) => format!("Enum({})", variants.join(" | ")),
            AttributeType::IntRange { min, max } => format!("Int({}..={})", min, max),
            AttributeType::StringLength { min, max } => format!("String({}..={} chars)", min, max),
            AttributeType::Custom { name, .. } => name.clone(),
            AttributeType::List(inner) => format!("List<{}>", inner.type_name()),
            AttributeType::Map(inner) => format!("Map<{}>", inner.type_name()),
            AttributeType::Struct(fields) => {
                let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
                format!("Block{{{}}}", names.join(", "))
            }
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

fn validate_struct(fields: &[AttributeSchema], map: &HashMap<String, Value>) -> Result<(), TypeError> {
    for field in fields {
        if field.required && field.default.is_none() && !map.contains_key(&field.name) {
            return Err(TypeError::MissingRequired {
                name: field.name.clone(),
            });
        }
    }
    for (key, value) in map {
        match fields.iter().find(|f| &f.name == key) {
            Some(field) => field.validate_value(value).map_err(|e| TypeError::FieldError {
                field: key.clone(),
                inner: Box::new(e),
            })?,
            None => return Err(TypeError::UnknownAttribute { name: key.clone() }),
        }
    }
    Ok(())
}

/// Type error
#[derive(Debug, Clone, thiserror::Error)]
pub enum TypeError {
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Invalid enum variant '{value}', expected one of: {}", expected.join(", "))]
    InvalidEnumVariant {
        value: String,
        expected: Vec<String>,
    },

    #[error("Value {value} is out of range {min}..={max}")]
    OutOfRange { value: i64, min: i64, max: i64 },

    #[error("Length {len} is out of range {min}..={max}")]
    InvalidLength { len: usize, min: usize, max: usize },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Required attribute '{name}' is missing")]
    MissingRequired { name: String },

    #[error("Unknown attribute '{name}'")]
    UnknownAttribute { name: String },

    #[error("Attribute '{name}' is computed by the provider and cannot be set")]
    ComputedAttribute { name: String },

    #[error("Attribute '{name}' accepts at most {max} items, got {got}")]
    TooManyItems { name: String, max: usize, got: usize },

    #[error("Attribute '{name}' needs at least {min} items, got {got}")]
    TooFewItems { name: String, min: usize, got: usize },

    #[error("List item at index {index}: {inner}")]
    ListItemError { index: usize, inner: Box<TypeError> },

    #[error("Map value for key '{key}': {inner}")]
    MapValueError { key: String, inner: Box<TypeError> },

    #[error("Field '{field}': {inner}")]
    FieldError { field: String, inner: Box<TypeError> },

    #[error("{name}: {inner}")]
    Attribute { name: String, inner: Box<TypeError> },
}

/// Attribute schema
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    pub required: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
    /// Vendor-side property name (e.g., "subnetId")
    pub provider_name: Option<String>,
    /// Changing this attribute requires replacing the resource
    pub force_new: bool,
    /// The provider may fill this attribute in
    pub computed: bool,
    /// Reported by the provider only; cannot be set in configuration
    pub output_only: bool,
    /// Never printed in plans or logs
    pub sensitive: bool,
    /// Sent on create or update but never reported back by the service
    pub write_only: bool,
    /// List compared as a multiset; element order carries no meaning
    pub unordered: bool,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            required: false,
            default: None,
            description: None,
            provider_name: None,
            force_new: false,
            computed: false,
            output_only: false,
            sensitive: false,
            write_only: false,
            unordered: false,
            min_items: None,
            max_items: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = Some(name.into());
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    /// Mark as provider-reported only
    pub fn output(mut self) -> Self {
        self.computed = true;
        self.output_only = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn write_only(mut self) -> Self {
        self.write_only = true;
        self
    }

    pub fn unordered(mut self) -> Self {
        self.unordered = true;
        self
    }

    pub fn with_min_items(mut self, min: usize) -> Self {
        self.min_items = Some(min);
        self
    }

    pub fn with_max_items(mut self, max: usize) -> Self {
        self.max_items = Some(max);
        self
    }

    /// Validate a single value against the type and the item bounds
    pub fn validate_value(&self, value: &Value) -> Result<(), TypeError> {
        self.attr_type.validate(value)?;
        if let Value::List(items) = value {
            if let Some(max) = self.max_items
                && items.len() > max
            {
                return Err(TypeError::TooManyItems {
                    name: self.name.clone(),
                    max,
                    got: items.len(),
                });
            }
            if let Some(min) = self.min_items
                && items.len() < min
            {
                return Err(TypeError::TooFewItems {
                    name: self.name.clone(),
                    min,
                    got: items.len(),
                });
            }
        }
        Ok(())
    }
}

/// Create/update/delete timeouts of a resource type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Timeouts {
    pub const DEFAULT: Duration = Duration::from_secs(20 * 60);

    pub fn new(create: Duration, update: Duration, delete: Duration) -> Self {
        Self {
            create,
            update,
            delete,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::new(Self::DEFAULT, Self::DEFAULT, Self::DEFAULT)
    }
}

/// Cross-attribute validation hook
pub type SchemaValidator = fn(&HashMap<String, Value>) -> Result<(), Vec<String>>;

/// Resource schema
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub attributes: HashMap<String, AttributeSchema>,
    pub description: Option<String>,
    /// Read-only data source rather than a managed resource
    pub data_source: bool,
    pub timeouts: Timeouts,
    pub validator: Option<SchemaValidator>,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: HashMap::new(),
            description: None,
            data_source: false,
            timeouts: Timeouts::default(),
            validator: None,
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn as_data_source(mut self) -> Self {
        self.data_source = true;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_validator(mut self, validator: SchemaValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.get(name)
    }

    pub fn is_force_new(&self, name: &str) -> bool {
        self.attributes.get(name).is_some_and(|a| a.force_new)
    }

    pub fn is_output_only(&self, name: &str) -> bool {
        self.attributes.get(name).is_some_and(|a| a.output_only)
    }

    pub fn is_sensitive(&self, name: &str) -> bool {
        self.attributes.get(name).is_some_and(|a| a.sensitive)
    }

    /// Attributes the service does not echo back, so the last known value must be kept
    pub fn is_unreadable(&self, name: &str) -> bool {
        self.attributes
            .get(name)
            .is_some_and(|a| a.sensitive || a.write_only)
    }

    /// Whether two values of the attribute are equal, honoring `unordered`
    pub fn values_match(&self, name: &str, a: &Value, b: &Value) -> bool {
        match (self.attributes.get(name), a, b) {
            (Some(attr), Value::List(left), Value::List(right)) if attr.unordered => {
                left.len() == right.len() && {
                    let mut unmatched: Vec<&Value> = right.iter().collect();
                    left.iter().all(|item| {
                        match unmatched.iter().position(|other| *other == item) {
                            Some(pos) => {
                                unmatched.swap_remove(pos);
                                true
                            }
                            None => false,
                        }
                    })
                }
            }
            _ => a == b,
        }
    }

    /// Attribute schemas sorted by name
    pub fn sorted_attributes(&self) -> Vec<&AttributeSchema> {
        let mut attrs: Vec<&AttributeSchema> = self.attributes.values().collect();
        attrs.sort_by(|a, b| a.name.cmp(&b.name));
        attrs
    }

    /// Validate resource attributes
    pub fn validate(&self, attributes: &HashMap<String, Value>) -> Result<(), Vec<TypeError>> {
        let mut errors = Vec::new();

        for schema in self.sorted_attributes() {
            if schema.required
                && schema.default.is_none()
                && !attributes.contains_key(&schema.name)
            {
                errors.push(TypeError::MissingRequired {
                    name: schema.name.clone(),
                });
            }
        }

        let mut names: Vec<&String> = attributes.keys().collect();
        names.sort();
        for name in names {
            if name.starts_with('_') {
                continue;
            }
            let value = &attributes[name];
            match self.attributes.get(name) {
                Some(schema) if schema.output_only => {
                    errors.push(TypeError::ComputedAttribute { name: name.clone() });
                }
                Some(schema) => {
                    if let Err(e) = schema.validate_value(value) {
                        errors.push(TypeError::Attribute {
                            name: name.clone(),
                            inner: Box::new(e),
                        });
                    }
                }
                None => errors.push(TypeError::UnknownAttribute { name: name.clone() }),
            }
        }

        if errors.is_empty()
            && let Some(validator) = self.validator
            && let Err(messages) = validator(attributes)
        {
            errors.extend(
                messages
                    .into_iter()
                    .map(|message| TypeError::ValidationFailed { message }),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Insert defaults for absent attributes, including fields of nested blocks
    pub fn apply_defaults(&self, attributes: &mut HashMap<String, Value>) {
        for schema in self.attributes.values() {
            if schema.output_only {
                continue;
            }
            if let Some(default) = &schema.default
                && !attributes.contains_key(&schema.name)
            {
                attributes.insert(schema.name.clone(), default.clone());
            }
            if let (AttributeType::List(inner), Some(Value::List(items))) =
                (&schema.attr_type, attributes.get_mut(&schema.name))
                && let AttributeType::Struct(fields) = inner.as_ref()
            {
                for item in items.iter_mut() {
                    if let Value::Map(map) = item {
                        for field in fields {
                            if let Some(default) = &field.default {
                                map.entry(field.name.clone())
                                    .or_insert_with(|| default.clone());
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Helper functions for common types
pub mod types {
    use super::*;

    /// Positive integer type
    pub fn positive_int() -> AttributeType {
        AttributeType::Custom {
            name: "PositiveInt".to_string(),
            base: Box::new(AttributeType::Int),
            validate: |value| {
                if let Value::Int(n) = value {
                    if *n > 0 {
                        Ok(())
                    } else {
                        Err("Value must be positive".to_string())
                    }
                } else {
                    Err("Expected integer".to_string())
                }
            },
        }
    }

    /// TCP/UDP port number
    pub fn port() -> AttributeType {
        AttributeType::IntRange { min: 1, max: 65535 }
    }

    /// Resource name (1-65 characters)
    pub fn name() -> AttributeType {
        AttributeType::StringLength { min: 1, max: 65 }
    }

    /// CIDR block type (e.g., "10.0.0.0/16")
    pub fn cidr() -> AttributeType {
        AttributeType::Custom {
            name: "Cidr".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| {
                if let Value::String(s) = value {
                    validate_cidr(s)
                } else {
                    Err("Expected string".to_string())
                }
            },
        }
    }

    /// Enum from a list of string slices
    pub fn one_of(variants: &[&str]) -> AttributeType {
        AttributeType::Enum(variants.iter().map(|v| v.to_string()).collect())
    }

    /// List of nested blocks
    pub fn blocks(fields: Vec<AttributeSchema>) -> AttributeType {
        AttributeType::List(Box::new(AttributeType::Struct(fields)))
    }
}

/// Validate CIDR block format (e.g., "10.0.0.0/16")
pub fn validate_cidr(cidr: &str) -> Result<(), String> {
    let parts: Vec<&str> = cidr.split('/').collect();
    if parts.len() != 2 {
        return Err(format!(
            "Invalid CIDR format '{}': expected IP/prefix",
            cidr
        ));
    }

    let ip = parts[0];
    let prefix = parts[1];

    let octets: Vec<&str> = ip.split('.').collect();
    if octets.len() != 4 {
        return Err(format!("Invalid IP address '{}': expected 4 octets", ip));
    }

    for octet in &octets {
        if octet.parse::<u8>().is_err() {
            return Err(format!(
                "Invalid octet '{}' in IP address: must be 0-255",
                octet
            ));
        }
    }

    match prefix.parse::<u8>() {
        Ok(p) if p <= 32 => Ok(()),
        Ok(p) => Err(format!("Invalid prefix length '{}': must be 0-32", p)),
        Err(_) => Err(format!(
            "Invalid prefix length '{}': must be a number",
            prefix
        )),
    }
}
