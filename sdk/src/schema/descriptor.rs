use crate::error::AuctionError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use strum::{Display as StrumDisplay, EnumString};

pub const AUCTION_VALUE_SUBJECT: &str = "auction-value";

/// The `auction-value` JSON schema as registered with the registry.
pub const AUCTION_VALUE_SCHEMA: &str = r#"{
  "$schema": "http://json-schema.org/draft-07/schema#",
  "title": "Bid",
  "type": "object",
  "properties": {
    "name": { "type": "string" },
    "price": { "type": "integer" },
    "bid_ts": { "type": "string" }
  },
  "required": ["name", "price", "bid_ts"],
  "additionalProperties": false
}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, StrumDisplay, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

/// Structural contract of a registered subject version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescriptor {
    pub subject: String,
    pub version: u32,
    pub id: u32,
    pub fields: Vec<FieldSpec>,
    pub additional_properties: bool,
}

#[derive(Debug, Deserialize)]
struct JsonSchemaDocument {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    properties: BTreeMap<String, JsonSchemaProperty>,
    #[serde(default)]
    required: Vec<String>,
    #[serde(rename = "additionalProperties", default = "additional_properties_default")]
    additional_properties: bool,
}

#[derive(Debug, Deserialize)]
struct JsonSchemaProperty {
    #[serde(rename = "type")]
    kind: String,
}

fn additional_properties_default() -> bool {
    true
}

impl SchemaDescriptor {
    /// Builds a descriptor from the JSON schema text served by the registry.
    pub fn parse(subject: &str, version: u32, id: u32, schema: &str) -> Result<Self, AuctionError> {
        let invalid = |reason: String| AuctionError::InvalidSchema {
            subject: subject.to_string(),
            reason,
        };
        let document: JsonSchemaDocument =
            serde_json::from_str(schema).map_err(|error| invalid(error.to_string()))?;
        if document.kind.as_deref() != Some("object") {
            return Err(invalid("top level type must be 'object'".to_string()));
        }

        for required in &document.required {
            if !document.properties.contains_key(required) {
                return Err(invalid(format!(
                    "required field: {required} has no property definition"
                )));
            }
        }

        let mut fields = Vec::with_capacity(document.properties.len());
        for (name, property) in document.properties {
            let kind = property.kind.parse::<FieldKind>().map_err(|_| {
                invalid(format!(
                    "unsupported type: {} for field: {name}",
                    property.kind
                ))
            })?;
            let required = document.required.contains(&name);
            fields.push(FieldSpec {
                name,
                kind,
                required,
            });
        }

        Ok(SchemaDescriptor {
            subject: subject.to_string(),
            version,
            id,
            fields,
            additional_properties: document.additional_properties,
        })
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }
}

impl Display for SchemaDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let fields = self
            .fields
            .iter()
            .map(|field| format!("{}={}", field.name, field.kind))
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "{{ subject: {}, version: {}, ID: {}, fields: [{}], additional_properties: {} }}",
            self.subject, self.version, self.id, fields, self.additional_properties
        )
    }
}
