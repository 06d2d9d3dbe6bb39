//! Field survey entities and the schema they share.

use fieldsync_engine::{CollectionSchema, FieldDef, FieldType, Schema, SchemaVersion};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Version of [`survey_schema`]. Bump on any incompatible field change.
pub const SURVEY_SCHEMA_VERSION: SchemaVersion = 1;

/// A typed view of one collection.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Collection the entity is stored in.
    const COLLECTION: &'static str;

    /// Field holding the owning course, filled from the context's course
    /// scope when left empty.
    const COURSE_FIELD: Option<&'static str> = Some("courseId");

    fn collection_schema() -> CollectionSchema;
}

/// A golf course being surveyed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub name: String,
}

impl Entity for Course {
    const COLLECTION: &'static str = "courses";
    const COURSE_FIELD: Option<&'static str> = None;

    fn collection_schema() -> CollectionSchema {
        CollectionSchema::new(
            Self::COLLECTION,
            vec![FieldDef::required("name", FieldType::String)],
        )
    }
}

/// A hazard (bunker, water) placed on a hole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hazard {
    #[serde(default)]
    pub course_id: String,
    pub hole_number: i64,
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Entity for Hazard {
    const COLLECTION: &'static str = "hazards";

    fn collection_schema() -> CollectionSchema {
        CollectionSchema::new(
            Self::COLLECTION,
            vec![
                FieldDef::required("courseId", FieldType::String),
                FieldDef::required("holeNumber", FieldType::Int),
                FieldDef::required("lat", FieldType::Float),
                FieldDef::required("lng", FieldType::Float),
                FieldDef::optional("kind", FieldType::String),
            ],
        )
        .with_reference("courseId", Course::COLLECTION)
    }
}

/// A maintenance task, optionally tied to a hazard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default)]
    pub course_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hazard_id: Option<String>,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    /// When the task was raised (milliseconds since epoch)
    pub timestamp: u64,
}

impl Entity for Task {
    const COLLECTION: &'static str = "tasks";

    fn collection_schema() -> CollectionSchema {
        CollectionSchema::new(
            Self::COLLECTION,
            vec![
                FieldDef::required("courseId", FieldType::String),
                FieldDef::optional("hazardId", FieldType::String),
                FieldDef::required("description", FieldType::String),
                FieldDef::required("type", FieldType::String),
                FieldDef::required("status", FieldType::String),
                FieldDef::required("timestamp", FieldType::Timestamp),
            ],
        )
        .with_reference("courseId", Course::COLLECTION)
        .with_reference("hazardId", Hazard::COLLECTION)
    }
}

/// Where the map image of a hole is stored. The URL is opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoleMap {
    #[serde(default)]
    pub course_id: String,
    pub hole_number: i64,
    pub url: String,
}

impl Entity for HoleMap {
    const COLLECTION: &'static str = "holeMaps";

    fn collection_schema() -> CollectionSchema {
        CollectionSchema::new(
            Self::COLLECTION,
            vec![
                FieldDef::required("courseId", FieldType::String),
                FieldDef::required("holeNumber", FieldType::Int),
                FieldDef::required("url", FieldType::String),
            ],
        )
        .with_reference("courseId", Course::COLLECTION)
    }
}

/// Schema covering every survey collection.
pub fn survey_schema() -> Schema {
    Schema::new(SURVEY_SCHEMA_VERSION)
        .with_collection(Course::collection_schema())
        .with_collection(Hazard::collection_schema())
        .with_collection(Task::collection_schema())
        .with_collection(HoleMap::collection_schema())
}
