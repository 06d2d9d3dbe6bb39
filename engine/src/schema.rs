//! Schema definition and validation.
//!
//! Schemas define the fields of each collection and the foreign keys that
//! make a record depend on another one. Replay ordering is derived from the
//! foreign keys declared here.

use crate::{error::Result, CollectionName, Error, Fields, SchemaVersion};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Value types a field can be declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    /// Any JSON number; integers are accepted
    Float,
    Bool,
    /// Milliseconds since the Unix epoch
    Timestamp,
    /// Arbitrary nested JSON
    Json,
}

impl FieldType {
    pub fn name(self) -> &'static str {
        match self {
            FieldType::String => "String",
            FieldType::Int => "Int",
            FieldType::Float => "Float",
            FieldType::Bool => "Bool",
            FieldType::Timestamp => "Timestamp",
            FieldType::Json => "Json",
        }
    }

    /// Whether a non-null value fits this type.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (FieldType::Json, _) => true,
            (FieldType::String, Value::String(_)) => true,
            (FieldType::Bool, Value::Bool(_)) => true,
            (FieldType::Float, Value::Number(_)) => true,
            (FieldType::Int | FieldType::Timestamp, Value::Number(n)) => n.is_i64() || n.is_u64(),
            _ => false,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One declared field of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    /// A required field may be neither absent nor null
    pub required: bool,
}

impl FieldDef {
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::declare(name, field_type, true)
    }

    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::declare(name, field_type, false)
    }

    fn declare(name: impl Into<String>, field_type: FieldType, required: bool) -> Self {
        Self {
            name: name.into(),
            field_type,
            required,
        }
    }

    /// Check the value stored under this field, if any.
    pub fn validate(&self, value: Option<&Value>) -> Result<()> {
        let value = match value {
            Some(Value::Null) | None if self.required => {
                return Err(Error::MissingRequiredField(self.name.clone()))
            }
            Some(Value::Null) | None => return Ok(()),
            Some(value) => value,
        };

        if self.field_type.accepts(value) {
            Ok(())
        } else {
            Err(self.mismatch(self.field_type, value))
        }
    }

    fn mismatch(&self, expected: FieldType, got: &Value) -> Error {
        Error::TypeMismatch {
            field: self.name.clone(),
            expected: expected.to_string(),
            got: describe_value(got).to_string(),
        }
    }
}

/// Short type name of a JSON value, for error messages.
fn describe_value(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

/// A field holding the identity of a record in another collection.
///
/// The value is a local id until the target is confirmed remotely, and the
/// target's remote id afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    /// Field holding the reference
    pub field: String,
    /// Collection of the referenced record
    pub target: CollectionName,
}

impl ForeignKey {
    pub fn new(field: impl Into<String>, target: impl Into<CollectionName>) -> Self {
        Self {
            field: field.into(),
            target: target.into(),
        }
    }
}

/// Schema for a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    /// Collection name
    pub name: CollectionName,
    /// Field definitions
    pub fields: Vec<FieldDef>,
    /// Foreign keys into other collections
    #[serde(default)]
    pub references: Vec<ForeignKey>,
}

impl CollectionSchema {
    /// Create a new collection schema.
    pub fn new(name: impl Into<CollectionName>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
            references: Vec::new(),
        }
    }

    /// Builder-style method to declare a foreign key. The field must also be
    /// listed in `fields` as a string.
    pub fn with_reference(
        mut self,
        field: impl Into<String>,
        target: impl Into<CollectionName>,
    ) -> Self {
        self.references.push(ForeignKey::new(field, target));
        self
    }

    /// Validate a payload against this schema.
    pub fn validate_payload(&self, payload: &Value) -> Result<()> {
        let obj = payload
            .as_object()
            .ok_or_else(|| Error::InvalidPayload("payload must be an object".into()))?;

        self.validate_fields(obj)
    }

    /// Validate field values against this schema. Unknown fields pass through.
    pub fn validate_fields(&self, fields: &Fields) -> Result<()> {
        for field in &self.fields {
            field.validate(fields.get(&field.name))?;
        }

        for reference in &self.references {
            match fields.get(&reference.field) {
                None | Some(Value::Null) | Some(Value::String(_)) => {}
                Some(other) => {
                    return Err(Error::TypeMismatch {
                        field: reference.field.clone(),
                        expected: FieldType::String.to_string(),
                        got: describe_value(other).to_string(),
                    })
                }
            }
        }

        Ok(())
    }

    /// Iterate the non-empty foreign-key values of a record's fields.
    pub fn referenced_values<'f>(
        &'f self,
        fields: &'f Fields,
    ) -> impl Iterator<Item = (&'f ForeignKey, &'f str)> + 'f {
        self.references.iter().filter_map(move |reference| {
            fields
                .get(&reference.field)
                .and_then(|v| v.as_str())
                .filter(|v| !v.is_empty())
                .map(|v| (reference, v))
        })
    }
}

/// Schema for the entire store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Schema version for migrations
    pub version: SchemaVersion,
    /// Collection schemas by name
    pub collections: HashMap<CollectionName, CollectionSchema>,
}

impl Schema {
    /// Create a new schema.
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            collections: HashMap::new(),
        }
    }

    /// Add a collection to the schema.
    pub fn add_collection(&mut self, collection: CollectionSchema) -> &mut Self {
        self.collections.insert(collection.name.clone(), collection);
        self
    }

    /// Builder-style method to add a collection.
    pub fn with_collection(mut self, collection: CollectionSchema) -> Self {
        self.add_collection(collection);
        self
    }

    /// Get a collection schema by name.
    pub fn get_collection(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.get(name)
    }

    /// Get a collection schema by name or fail.
    pub fn collection(&self, name: &str) -> Result<&CollectionSchema> {
        self.collections
            .get(name)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    /// Validate fields destined for a collection.
    pub fn validate(&self, collection: &str, fields: &Fields) -> Result<()> {
        self.collection(collection)?.validate_fields(fields)
    }

    /// Check that every foreign key points at a declared collection.
    pub fn check_references(&self) -> Result<()> {
        for collection in self.collections.values() {
            for reference in &collection.references {
                if !self.collections.contains_key(&reference.target) {
                    return Err(Error::CollectionNotFound(reference.target.clone()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_schema() -> Schema {
        Schema::new(1)
            .with_collection(CollectionSchema::new(
                "courses",
                vec![FieldDef::required("name", FieldType::String)],
            ))
            .with_collection(
                CollectionSchema::new(
                    "hazards",
                    vec![
                        FieldDef::required("courseId", FieldType::String),
                        FieldDef::required("holeNumber", FieldType::Int),
                        FieldDef::optional("lat", FieldType::Float),
                    ],
                )
                .with_reference("courseId", "courses"),
            )
    }

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn validate_valid_payload() {
        let schema = test_schema();
        let collection = schema.get_collection("hazards").unwrap();

        let payload = json!({"courseId": "c1", "holeNumber": 4});
        assert!(collection.validate_payload(&payload).is_ok());

        let with_optional = json!({"courseId": "c1", "holeNumber": 4, "lat": 12});
        assert!(collection.validate_payload(&with_optional).is_ok());
    }

    #[test]
    fn validate_missing_required_field() {
        let schema = test_schema();
        let result = schema.validate("hazards", &fields(json!({"courseId": "c1"})));

        assert!(matches!(result, Err(Error::MissingRequiredField(f)) if f == "holeNumber"));
    }

    #[test]
    fn validate_wrong_type() {
        let schema = test_schema();
        let result = schema.validate(
            "hazards",
            &fields(json!({"courseId": "c1", "holeNumber": "four"})),
        );

        assert!(matches!(result, Err(Error::TypeMismatch { field, .. }) if field == "holeNumber"));
    }

    #[test]
    fn validate_null_required_field() {
        let schema = test_schema();
        let result = schema.validate("courses", &fields(json!({"name": null})));

        assert!(matches!(result, Err(Error::MissingRequiredField(f)) if f == "name"));
    }

    #[test]
    fn validate_non_object_payload() {
        let schema = test_schema();
        let collection = schema.get_collection("courses").unwrap();
        let result = collection.validate_payload(&json!(["not", "an", "object"]));

        assert!(matches!(result, Err(Error::InvalidPayload(_))));
    }

    #[test]
    fn validate_collection_not_found() {
        let schema = test_schema();
        let result = schema.validate("bunkers", &Fields::new());

        assert!(matches!(result, Err(Error::CollectionNotFound(c)) if c == "bunkers"));
    }

    #[test]
    fn reference_must_be_string() {
        let collection =
            CollectionSchema::new("tasks", vec![]).with_reference("hazardId", "hazards");

        let result = collection.validate_fields(&fields(json!({"hazardId": 7})));
        assert!(matches!(result, Err(Error::TypeMismatch { field, .. }) if field == "hazardId"));
        assert!(collection
            .validate_fields(&fields(json!({"hazardId": null})))
            .is_ok());
    }

    #[test]
    fn referenced_values_skip_empty() {
        let collection = CollectionSchema::new("tasks", vec![])
            .with_reference("courseId", "courses")
            .with_reference("hazardId", "hazards");
        let task = fields(json!({"courseId": "c1", "hazardId": ""}));

        let values: Vec<_> = collection
            .referenced_values(&task)
            .map(|(fk, value)| (fk.target.as_str(), value))
            .collect();
        assert_eq!(values, vec![("courses", "c1")]);
    }

    #[test]
    fn check_references_detects_unknown_target() {
        let schema = Schema::new(1).with_collection(
            CollectionSchema::new("tasks", vec![]).with_reference("courseId", "courses"),
        );
        assert!(matches!(
            schema.check_references(),
            Err(Error::CollectionNotFound(c)) if c == "courses"
        ));
        assert!(test_schema().check_references().is_ok());
    }

    #[test]
    fn numeric_types() {
        assert!(FieldType::Float.accepts(&json!(4)));
        assert!(FieldType::Float.accepts(&json!(53.9)));
        assert!(!FieldType::Int.accepts(&json!(53.9)));
        assert!(FieldType::Timestamp.accepts(&json!(1_717_200_000_000u64)));
        assert!(!FieldType::Timestamp.accepts(&json!("2024-06-01")));
    }

    #[test]
    fn field_type_display() {
        assert_eq!(FieldType::String.to_string(), "String");
        assert_eq!(FieldType::Int.to_string(), "Int");
        assert_eq!(FieldType::Json.to_string(), "Json");
    }

    #[test]
    fn schema_serialization() {
        let schema = test_schema();
        let json = serde_json::to_string(&schema).unwrap();
        let parsed: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, parsed);
    }
}
