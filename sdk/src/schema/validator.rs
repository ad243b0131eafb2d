use crate::error::{AuctionError, SchemaViolation};
use crate::models::bid::{BidEvent, BID_TS_FIELD, NAME_FIELD, PRICE_FIELD};
use crate::schema::descriptor::{FieldKind, SchemaDescriptor};
use crate::utils::timestamp::BidTimestamp;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::trace;

const BID_CONTRACT: [(&str, FieldKind); 3] = [
    (NAME_FIELD, FieldKind::String),
    (PRICE_FIELD, FieldKind::Integer),
    (BID_TS_FIELD, FieldKind::String),
];

/// Validates raw payloads against the bid schema fetched at startup.
///
/// Pure: the descriptor is fixed for the lifetime of the validator.
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    descriptor: Arc<SchemaDescriptor>,
}

impl SchemaValidator {
    /// Fails when the registered schema does not describe the bid contract.
    pub fn new(descriptor: SchemaDescriptor) -> Result<Self, AuctionError> {
        let invalid = |reason: String| AuctionError::InvalidSchema {
            subject: descriptor.subject.clone(),
            reason,
        };
        if descriptor.fields.len() != BID_CONTRACT.len() {
            return Err(invalid(format!(
                "expected {} fields, found: {}",
                BID_CONTRACT.len(),
                descriptor.fields.len()
            )));
        }

        for (name, kind) in BID_CONTRACT {
            let Some(field) = descriptor.field(name) else {
                return Err(invalid(format!("missing field: {name}")));
            };
            if field.kind != kind {
                return Err(invalid(format!(
                    "field: {name} has type: {}, expected: {kind}",
                    field.kind
                )));
            }
            if !field.required {
                return Err(invalid(format!("field: {name} must be required")));
            }
        }

        if descriptor.additional_properties {
            return Err(invalid("additional properties must be disallowed".to_string()));
        }

        Ok(SchemaValidator {
            descriptor: Arc::new(descriptor),
        })
    }

    pub fn descriptor(&self) -> &SchemaDescriptor {
        &self.descriptor
    }

    pub fn schema_id(&self) -> u32 {
        self.descriptor.id
    }

    pub fn validate(&self, raw_payload: &[u8]) -> Result<BidEvent, SchemaViolation> {
        let value: Value = serde_json::from_slice(raw_payload)
            .map_err(|error| SchemaViolation::MalformedPayload(error.to_string()))?;
        self.validate_value(&value)
    }

    pub fn validate_value(&self, value: &Value) -> Result<BidEvent, SchemaViolation> {
        let Value::Object(object) = value else {
            return Err(SchemaViolation::NotAnObject);
        };

        self.check_structure(object)?;
        let name = object
            .get(NAME_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default();
        let price = object
            .get(PRICE_FIELD)
            .and_then(Value::as_i64)
            .unwrap_or_default();
        let bid_ts = object
            .get(BID_TS_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default();
        let bid_timestamp = bid_ts
            .parse::<BidTimestamp>()
            .map_err(|error| SchemaViolation::InvalidTimestamp(format!("{bid_ts}: {error}")))?;
        let event = BidEvent::new(name, price, bid_timestamp)?;
        trace!("Validated bid event: {event}");
        Ok(event)
    }

    /// Serializes an event into the JSON shape described by the schema.
    pub fn serialize(&self, event: &BidEvent) -> Result<Vec<u8>, AuctionError> {
        Ok(serde_json::to_vec(event)?)
    }

    fn check_structure(&self, object: &Map<String, Value>) -> Result<(), SchemaViolation> {
        for field in &self.descriptor.fields {
            let Some(value) = object.get(&field.name) else {
                if field.required {
                    return Err(SchemaViolation::MissingField(field.name.clone()));
                }
                continue;
            };

            let matches = match field.kind {
                FieldKind::String => value.is_string(),
                FieldKind::Integer => value.is_i64(),
                FieldKind::Number => value.is_number(),
                FieldKind::Boolean => value.is_boolean(),
            };
            if !matches {
                return Err(SchemaViolation::InvalidType {
                    field: field.name.clone(),
                    expected: field.kind.to_string(),
                });
            }
        }

        if !self.descriptor.additional_properties {
            if let Some(unexpected) = object
                .keys()
                .find(|key| self.descriptor.field(key).is_none())
            {
                return Err(SchemaViolation::UnexpectedField(unexpected.clone()));
            }
        }

        Ok(())
    }
}
