//! DynamoDB KeyedStore implementation.
//!
//! Table schema:
//! - partition key attribute (String), `PK` by default
//! - optional sort key attribute (String), `SK` by default
//! - all other attributes are schemaless JSON mapped onto DynamoDB types
//!
//! Conditional updates use `ReturnValuesOnConditionCheckFailure::AllOld` so
//! a failed condition tells us whether the item was missing (`NotFound`) or
//! present but fenced (`Conflict`).

mod convert;
mod expression;

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::operation::update_item::UpdateItemError;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue, ReturnValuesOnConditionCheckFailure};
use aws_sdk_dynamodb::Client;
use tracing::{debug, info};

pub use convert::{from_attribute, from_attributes, to_attribute, to_attributes};

use crate::storage::{
    Cursor, Item, Key, KeySchema, KeyedStore, Page, Patch, QueryOptions, Result, ReturnValues,
    ScanOptions, StorageError, StoreEndpoint, UpdateOptions,
};

/// DynamoDB implementation of KeyedStore.
pub struct DynamoKeyedStore {
    client: Client,
    table_name: String,
    schema: KeySchema,
}

impl DynamoKeyedStore {
    /// Build a client for the endpoint (or the default AWS endpoint).
    pub async fn connect(
        endpoint: &StoreEndpoint,
        region: Option<&str>,
        schema: KeySchema,
    ) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        let config = loader.load().await;

        let client = if let Some(url) = &endpoint.endpoint {
            let dynamo_config = aws_sdk_dynamodb::config::Builder::from(&config)
                .endpoint_url(url)
                .build();
            Client::from_conf(dynamo_config)
        } else {
            Client::new(&config)
        };

        info!(
            table = %endpoint.table,
            endpoint = endpoint.endpoint.as_deref().unwrap_or("default"),
            "Connected to DynamoDB"
        );

        Ok(Self::with_client(client, endpoint.table.clone(), schema))
    }

    pub fn with_client(client: Client, table_name: impl Into<String>, schema: KeySchema) -> Self {
        Self {
            client,
            table_name: table_name.into(),
            schema,
        }
    }

    fn key_attributes(&self, key: &Key) -> HashMap<String, AttributeValue> {
        let mut attributes = HashMap::new();
        attributes.insert(
            self.schema.partition_attribute.clone(),
            AttributeValue::S(key.pk.clone()),
        );
        if let (Some(attr), Some(sk)) = (&self.schema.sort_attribute, &key.sk) {
            attributes.insert(attr.clone(), AttributeValue::S(sk.clone()));
        }
        attributes
    }

    fn start_key(&self, cursor: Option<&Cursor>) -> Result<Option<HashMap<String, AttributeValue>>> {
        cursor
            .map(|c| c.key().map(|key| self.key_attributes(&key)))
            .transpose()
    }

    fn page(
        &self,
        items: Option<Vec<HashMap<String, AttributeValue>>>,
        last_key: Option<HashMap<String, AttributeValue>>,
    ) -> Result<Page<Item>> {
        let items = items
            .unwrap_or_default()
            .iter()
            .map(from_attributes)
            .collect();
        let cursor = match last_key {
            Some(last) => {
                let key = self.schema.key_of(&from_attributes(&last)).ok_or_else(|| {
                    StorageError::Backend("last evaluated key is missing key attributes".to_string())
                })?;
                Some(Cursor::encode(&key)?)
            }
            None => None,
        };
        Ok(Page { items, cursor })
    }
}

fn backend<E: std::error::Error>(operation: &str, err: E) -> StorageError {
    StorageError::Backend(format!(
        "DynamoDB {} failed: {}",
        operation,
        DisplayErrorContext(err)
    ))
}

#[async_trait]
impl KeyedStore for DynamoKeyedStore {
    fn key_schema(&self) -> &KeySchema {
        &self.schema
    }

    async fn get(&self, key: &Key) -> Result<Item> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .set_key(Some(self.key_attributes(key)))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| backend("get_item", e))?;

        match result.item {
            Some(item) => Ok(from_attributes(&item)),
            None => Err(StorageError::NotFound(key.clone())),
        }
    }

    async fn create(&self, key: &Key, mut item: Item) -> Result<Item> {
        self.schema.stamp(key, &mut item);

        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(to_attributes(&item)))
            .condition_expression("attribute_not_exists(#pk)")
            .expression_attribute_names("#pk", &self.schema.partition_attribute)
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!(pk = %key.pk, sk = ?key.sk, "Created item in DynamoDB");
                Ok(item)
            }
            Err(err) => match err.into_service_error() {
                PutItemError::ConditionalCheckFailedException(_) => Err(StorageError::Conflict {
                    key: key.clone(),
                    reason: "item already exists".to_string(),
                }),
                other => Err(backend("put_item", other)),
            },
        }
    }

    async fn update(&self, key: &Key, patch: Patch, options: UpdateOptions) -> Result<Item> {
        let request = expression::build_update(&self.schema, &patch, &options)?;
        let return_value = match options.return_values {
            ReturnValues::Updated => ReturnValue::AllNew,
            ReturnValues::Original => ReturnValue::AllOld,
        };
        let values = (!request.values.is_empty()).then_some(request.values);

        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .set_key(Some(self.key_attributes(key)))
            .update_expression(request.update_expression)
            .set_condition_expression(request.condition_expression)
            .set_expression_attribute_names(Some(request.names))
            .set_expression_attribute_values(values)
            .return_values(return_value)
            .return_values_on_condition_check_failure(ReturnValuesOnConditionCheckFailure::AllOld)
            .send()
            .await;

        match result {
            Ok(output) => {
                debug!(pk = %key.pk, sk = ?key.sk, "Updated item in DynamoDB");
                Ok(match output.attributes {
                    Some(attributes) => from_attributes(&attributes),
                    None => {
                        let mut item = Item::new();
                        self.schema.stamp(key, &mut item);
                        item
                    }
                })
            }
            Err(err) => match err.into_service_error() {
                UpdateItemError::ConditionalCheckFailedException(failed) => {
                    if failed.item().is_some() {
                        Err(StorageError::Conflict {
                            key: key.clone(),
                            reason: "offset already applied".to_string(),
                        })
                    } else {
                        Err(StorageError::NotFound(key.clone()))
                    }
                }
                other => Err(backend("update_item", other)),
            },
        }
    }

    async fn delete(&self, key: &Key) -> Result<Item> {
        let result = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .set_key(Some(self.key_attributes(key)))
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(|e| backend("delete_item", e))?;

        match result.attributes {
            Some(attributes) => {
                debug!(pk = %key.pk, sk = ?key.sk, "Deleted item from DynamoDB");
                Ok(from_attributes(&attributes))
            }
            None => Err(StorageError::NotFound(key.clone())),
        }
    }

    async fn scan(&self, options: ScanOptions) -> Result<Page<Item>> {
        let result = self
            .client
            .scan()
            .table_name(&self.table_name)
            .set_exclusive_start_key(self.start_key(options.cursor.as_ref())?)
            .set_limit(options.limit.map(|l| l.max(1) as i32))
            .send()
            .await
            .map_err(|e| backend("scan", e))?;

        self.page(result.items, result.last_evaluated_key)
    }

    async fn query(&self, partition_key: &str, options: QueryOptions) -> Result<Page<Item>> {
        let mut condition = "#pk = :pk".to_string();
        let mut request = self
            .client
            .query()
            .table_name(&self.table_name)
            .expression_attribute_names("#pk", &self.schema.partition_attribute)
            .expression_attribute_values(":pk", AttributeValue::S(partition_key.to_string()));

        if let (Some(prefix), Some(sort)) = (&options.sort_key_prefix, &self.schema.sort_attribute)
        {
            condition.push_str(" AND begins_with(#sk, :prefix)");
            request = request
                .expression_attribute_names("#sk", sort)
                .expression_attribute_values(":prefix", AttributeValue::S(prefix.clone()));
        }

        let result = request
            .key_condition_expression(condition)
            .scan_index_forward(!options.descending)
            .set_exclusive_start_key(self.start_key(options.cursor.as_ref())?)
            .set_limit(options.limit.map(|l| l.max(1) as i32))
            .send()
            .await
            .map_err(|e| backend("query", e))?;

        self.page(result.items, result.last_evaluated_key)
    }
}
