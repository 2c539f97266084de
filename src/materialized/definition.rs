// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use std::{fmt, sync::Arc};

use arrow_schema::{DataType, Field, Schema, SchemaRef, TimeUnit};
use datafusion_common::{plan_err, DataFusionError, Result};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Whether the materialized data of a view reflects its defining query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefreshStatus {
    /// The view has not been refreshed since it was (re)defined.
    /// Its materialized data, if any, must not be read.
    #[default]
    Incomplete,
    /// The materialized data was produced by the current definition.
    Complete,
}

impl fmt::Display for RefreshStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshStatus::Incomplete => write!(f, "INCOMPLETE"),
            RefreshStatus::Complete => write!(f, "COMPLETE"),
        }
    }
}

/// A declared output column of a materialized view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Column name.
    pub name: String,
    /// SQL type name, e.g. `BIGINT` or `DECIMAL`.
    /// Arrow types without a SQL spelling use the Arrow textual form.
    #[serde(rename = "type")]
    pub logical_type: String,
    /// Precision, for types that have one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u8>,
    /// Scale, for types that have one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<i8>,
    /// Whether the column may contain nulls.
    #[serde(default = "nullable_by_default")]
    pub nullable: bool,
}

fn nullable_by_default() -> bool {
    true
}

impl FieldSpec {
    /// Describe an Arrow field.
    pub fn from_arrow(field: &Field) -> Self {
        let (logical_type, precision, scale) = match field.data_type() {
            DataType::Decimal128(p, s) | DataType::Decimal256(p, s) => {
                ("DECIMAL".to_string(), Some(*p), Some(*s))
            }
            data_type => (
                sql_type_name(data_type)
                    .map(str::to_string)
                    .unwrap_or_else(|| data_type.to_string()),
                None,
                None,
            ),
        };

        Self {
            name: field.name().clone(),
            logical_type,
            precision,
            scale,
            nullable: field.is_nullable(),
        }
    }

    /// The Arrow field described here.
    pub fn to_arrow(&self) -> Result<Field> {
        Ok(Field::new(&self.name, self.data_type()?, self.nullable))
    }

    /// The Arrow type of this column.
    pub fn data_type(&self) -> Result<DataType> {
        let data_type = match self.logical_type.to_ascii_uppercase().as_str() {
            "BOOLEAN" => DataType::Boolean,
            "TINYINT" => DataType::Int8,
            "SMALLINT" => DataType::Int16,
            "INT" | "INTEGER" => DataType::Int32,
            "BIGINT" => DataType::Int64,
            "TINYINT UNSIGNED" => DataType::UInt8,
            "SMALLINT UNSIGNED" => DataType::UInt16,
            "INT UNSIGNED" => DataType::UInt32,
            "BIGINT UNSIGNED" => DataType::UInt64,
            "FLOAT" | "REAL" => DataType::Float32,
            "DOUBLE" => DataType::Float64,
            "VARCHAR" => DataType::Utf8,
            "VARBINARY" => DataType::Binary,
            "DATE" => DataType::Date32,
            "TIMESTAMP" => DataType::Timestamp(TimeUnit::Nanosecond, None),
            "DECIMAL" => match (self.precision, self.scale) {
                (Some(precision), Some(scale)) => DataType::Decimal128(precision, scale),
                _ => {
                    return plan_err!(
                        "DECIMAL column '{}' requires both precision and scale",
                        self.name
                    )
                }
            },
            _ => self.logical_type.parse::<DataType>().map_err(|e| {
                DataFusionError::Plan(format!(
                    "unknown type '{}' for column '{}': {e}",
                    self.logical_type, self.name
                ))
            })?,
        };

        Ok(data_type)
    }
}

fn sql_type_name(data_type: &DataType) -> Option<&'static str> {
    Some(match data_type {
        DataType::Boolean => "BOOLEAN",
        DataType::Int8 => "TINYINT",
        DataType::Int16 => "SMALLINT",
        DataType::Int32 => "INT",
        DataType::Int64 => "BIGINT",
        DataType::UInt8 => "TINYINT UNSIGNED",
        DataType::UInt16 => "SMALLINT UNSIGNED",
        DataType::UInt32 => "INT UNSIGNED",
        DataType::UInt64 => "BIGINT UNSIGNED",
        DataType::Float32 => "FLOAT",
        DataType::Float64 => "DOUBLE",
        DataType::Utf8 => "VARCHAR",
        DataType::Binary => "VARBINARY",
        DataType::Date32 => "DATE",
        DataType::Timestamp(TimeUnit::Nanosecond, None) => "TIMESTAMP",
        _ => return None,
    })
}

/// The persisted description of a materialized view.
///
/// A definition is created by `CREATE MATERIALIZED VIEW`, re-stamped by `REFRESH`,
/// reset by `CREATE OR REPLACE` and removed by `DROP`.
/// Apart from [`mark_refreshed`](Self::mark_refreshed) and
/// [`with_refresh_info`](Self::with_refresh_info) it is immutable once constructed.
///
/// Serialized as a JSON document of the form
///
/// ```json
/// {
///     "name": "m1",
///     "sql": "SELECT a, b FROM t",
///     "fields": [{"name": "a", "type": "INT", "nullable": true}],
///     "workspaceSchemaPath": ["datafusion", "public"],
///     "dataStoragePath": "m1",
///     "lastRefreshTime": 1700000000000,
///     "refreshStatus": "COMPLETE"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "DefinitionDocument")]
pub struct MaterializedViewDefinition {
    name: String,
    #[serde(rename = "sql")]
    defining_sql: String,
    fields: Vec<FieldSpec>,
    workspace_schema_path: Vec<String>,
    data_storage_path: String,
    last_refresh_time: Option<i64>,
    refresh_status: RefreshStatus,
}

/// Lenient document shape; everything past `sql` may be missing.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DefinitionDocument {
    name: String,
    sql: String,
    #[serde(default)]
    fields: Vec<FieldSpec>,
    #[serde(default)]
    workspace_schema_path: Vec<String>,
    #[serde(default)]
    data_storage_path: Option<String>,
    #[serde(default)]
    last_refresh_time: Option<i64>,
    #[serde(default)]
    refresh_status: Option<RefreshStatus>,
}

impl From<DefinitionDocument> for MaterializedViewDefinition {
    fn from(doc: DefinitionDocument) -> Self {
        let definition = Self::new(doc.name, doc.sql, doc.fields, doc.workspace_schema_path);
        let definition = match doc.data_storage_path {
            Some(path) => definition.with_data_storage_path(path),
            None => definition,
        };

        definition.with_refresh_info(doc.last_refresh_time, doc.refresh_status.unwrap_or_default())
    }
}

impl MaterializedViewDefinition {
    /// A new, never refreshed definition whose data is stored under its own name.
    pub fn new(
        name: impl Into<String>,
        defining_sql: impl Into<String>,
        fields: Vec<FieldSpec>,
        workspace_schema_path: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Self {
        let name = name.into();
        Self {
            data_storage_path: name.clone(),
            name,
            defining_sql: defining_sql.into(),
            fields,
            workspace_schema_path: workspace_schema_path
                .into_iter()
                .map(|part| part.as_ref().to_lowercase())
                .collect(),
            last_refresh_time: None,
            refresh_status: RefreshStatus::Incomplete,
        }
    }

    /// Store materialized data under `path`, relative to the workspace root.
    /// An empty path keeps the default, which is the view name.
    pub fn with_data_storage_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        if !path.is_empty() {
            self.data_storage_path = path;
        }
        self
    }

    /// Name of the view.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The query text the view was defined with.
    pub fn defining_sql(&self) -> &str {
        &self.defining_sql
    }

    /// Declared output columns. Empty for dynamic views.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Lower-cased schema path that unqualified names in the defining query resolve against.
    pub fn workspace_schema_path(&self) -> &[String] {
        &self.workspace_schema_path
    }

    /// Location of the materialized data, relative to the workspace root.
    pub fn data_storage_path(&self) -> &str {
        &self.data_storage_path
    }

    /// Milliseconds since the epoch of the last definition change or successful refresh.
    pub fn last_refresh_time(&self) -> Option<i64> {
        self.last_refresh_time
    }

    /// Current refresh status.
    pub fn refresh_status(&self) -> RefreshStatus {
        self.refresh_status
    }

    /// Whether the materialized data may be read in place of the defining query.
    pub fn is_refreshed(&self) -> bool {
        self.refresh_status == RefreshStatus::Complete
    }

    /// A dynamic view declares no fields; its schema comes from its materialized data.
    pub fn is_dynamic(&self) -> bool {
        self.fields.is_empty()
    }

    /// Copy of this definition with the given refresh information.
    ///
    /// A refresh without a timestamp never counts as complete.
    pub fn with_refresh_info(&self, last_refresh_time: Option<i64>, status: RefreshStatus) -> Self {
        let refresh_status = match (status, last_refresh_time) {
            (RefreshStatus::Complete, None) => RefreshStatus::Incomplete,
            (status, _) => status,
        };

        Self {
            last_refresh_time,
            refresh_status,
            ..self.clone()
        }
    }

    /// Record a successful refresh that finished now.
    pub fn mark_refreshed(&mut self) {
        self.refresh_status = RefreshStatus::Complete;
        self.last_refresh_time = Some(now_millis());
    }

    /// Names of the declared fields, in order.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect_vec()
    }

    /// The declared fields as an Arrow schema.
    pub fn arrow_schema(&self) -> Result<SchemaRef> {
        let fields = self
            .fields
            .iter()
            .map(FieldSpec::to_arrow)
            .collect::<Result<Vec<_>>>()?;

        Ok(Arc::new(Schema::new(fields)))
    }

    /// Encode as a JSON document.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| DataFusionError::External(Box::new(e)))
    }

    /// Decode a JSON document.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| DataFusionError::External(Box::new(e)))
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
