//! Update expression construction.
//!
//! Replace fields map to `SET`, accumulate fields to `ADD`, removed fields
//! to `REMOVE`. Attribute names and values are always bound through
//! placeholders.

use std::collections::HashMap;

use aws_sdk_dynamodb::types::AttributeValue;

use super::convert::to_attribute;
use crate::storage::{FieldAction, KeySchema, Patch, Result, StorageError, UpdateOptions};

#[derive(Debug, Default)]
pub(crate) struct UpdateRequest {
    pub update_expression: String,
    pub condition_expression: Option<String>,
    pub names: HashMap<String, String>,
    pub values: HashMap<String, AttributeValue>,
}

pub(crate) fn build_update(
    schema: &KeySchema,
    patch: &Patch,
    options: &UpdateOptions,
) -> Result<UpdateRequest> {
    let mut request = UpdateRequest::default();
    let mut set = Vec::new();
    let mut add = Vec::new();
    let mut remove = Vec::new();

    for (i, (field, value)) in patch.fields().enumerate() {
        if schema.is_key_attribute(field) {
            return Err(StorageError::Validation(format!(
                "key attribute {field} cannot be updated"
            )));
        }
        let name = format!("#f{i}");
        let placeholder = format!(":v{i}");
        request.names.insert(name.clone(), field.to_string());

        match value {
            None => remove.push(name),
            Some(value) => {
                match options.action_for(field) {
                    FieldAction::Replace => set.push(format!("{name} = {placeholder}")),
                    FieldAction::Accumulate => {
                        if !value.is_number() {
                            return Err(StorageError::Validation(format!(
                                "field {field} is not numeric"
                            )));
                        }
                        add.push(format!("{name} {placeholder}"));
                    }
                }
                request.values.insert(placeholder, to_attribute(value));
            }
        }
    }

    let mut clauses = Vec::new();
    if !set.is_empty() {
        clauses.push(format!("SET {}", set.join(", ")));
    }
    if !add.is_empty() {
        clauses.push(format!("ADD {}", add.join(", ")));
    }
    if !remove.is_empty() {
        clauses.push(format!("REMOVE {}", remove.join(", ")));
    }
    if clauses.is_empty() {
        return Err(StorageError::Validation("update patch is empty".to_string()));
    }
    request.update_expression = clauses.join(" ");

    let mut conditions = Vec::new();
    if !options.create_if_missing {
        request
            .names
            .insert("#pk".to_string(), schema.partition_attribute.clone());
        conditions.push("attribute_exists(#pk)".to_string());
    }
    if let Some(fence) = &options.offset_fence {
        request
            .names
            .insert("#offset".to_string(), fence.attribute.clone());
        request.values.insert(
            ":offset".to_string(),
            AttributeValue::N(fence.offset.to_string()),
        );
        conditions.push("(attribute_not_exists(#offset) OR #offset < :offset)".to_string());
    }
    if !conditions.is_empty() {
        request.condition_expression = Some(conditions.join(" AND "));
    }

    Ok(request)
}
