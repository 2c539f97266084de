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

/// The persisted materialized view definition.
pub mod definition;

/// Persistence of definitions and materialized data.
pub mod store;

/// The table adapter that expands or scans a materialized view.
pub mod table;

/// Scoped identity switching while expanding a view.
pub mod impersonation;

/// A schema provider that serves materialized views.
pub mod schema;

/// Parsing of materialized view DDL.
pub mod ddl;

/// CREATE / DROP / REFRESH semantics.
pub mod lifecycle;

/// Writing materialized data.
pub mod materialize;

mod util;

use std::{
    any::{type_name, Any, TypeId},
    fmt::{self, Debug},
    sync::{Arc, LazyLock},
};

use async_trait::async_trait;
use dashmap::DashMap;
use datafusion::{
    catalog::{SchemaProvider, TableProvider},
    datasource::listing::ListingTableUrl,
};
use datafusion_common::Result;
use datafusion_expr::TableType;
use itertools::Itertools;

use self::{
    definition::MaterializedViewDefinition, schema::WorkspaceSchemaProvider,
    table::MaterializedViewTable,
};

static SCHEMA_TYPE_REGISTRY: LazyLock<SchemaTypeRegistry> =
    LazyLock::new(SchemaTypeRegistry::default);

/// The logical kind of a catalog object.
///
/// DataFusion only distinguishes base tables, views and temporary tables.
/// Materialized views report themselves as views to DataFusion, so their kind
/// has to be recovered from the provider type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    /// A base or temporary table.
    Table,
    /// A plain (non-materialized) view.
    View,
    /// A materialized view.
    MaterializedView,
}

impl TableKind {
    /// The kind of `table`.
    pub fn of(table: &dyn TableProvider) -> Self {
        if table
            .as_any()
            .downcast_ref::<MaterializedViewTable>()
            .is_some()
        {
            return TableKind::MaterializedView;
        }

        match table.table_type() {
            TableType::View => TableKind::View,
            TableType::Base | TableType::Temporary => TableKind::Table,
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::Table => write!(f, "table"),
            TableKind::View => write!(f, "view"),
            TableKind::MaterializedView => write!(f, "materialized view"),
        }
    }
}

/// A schema that can hold materialized views.
///
/// Reads are served from memory; writes go through to persistent storage
/// before they become visible.
#[async_trait]
pub trait MaterializedViewSchema: SchemaProvider + 'static {
    /// The definition of the materialized view `name`, if there is one.
    fn materialized_view(&self, name: &str) -> Option<MaterializedViewDefinition>;

    /// Names of all materialized views in this schema, sorted.
    fn materialized_view_names(&self) -> Vec<String>;

    /// Where the data of `definition` is stored.
    fn data_location(&self, definition: &MaterializedViewDefinition) -> Result<ListingTableUrl>;

    /// Persist `definition`, replacing any existing definition with the same name.
    async fn put_materialized_view(&self, definition: MaterializedViewDefinition) -> Result<()>;

    /// Delete the materialized data and definition of `name`.
    /// Returns the removed definition.
    async fn drop_materialized_view(&self, name: &str)
        -> Result<Option<MaterializedViewDefinition>>;

    /// Whether anything is stored at the data location of `definition`.
    async fn data_in_use(&self, definition: &MaterializedViewDefinition) -> Result<bool>;

    /// Delete everything stored at `data_storage_path`.
    async fn clear_materialized_data(&self, data_storage_path: &str) -> Result<()>;
}

/// Register a [`MaterializedViewSchema`] implementation in this registry.
/// This allows `cast_to_materialized_view_schema` to downcast a [`SchemaProvider`]
/// into a [`MaterializedViewSchema`] where possible.
///
/// [`WorkspaceSchemaProvider`] is registered by default.
pub fn register_materialized_view_schema<T: MaterializedViewSchema>() {
    SCHEMA_TYPE_REGISTRY.register_materialized_view_schema::<T>();
}

/// Attempt to cast the given SchemaProvider into a [`MaterializedViewSchema`].
/// If the schema's type has not been registered using [`register_materialized_view_schema`], will return `None`.
pub fn cast_to_materialized_view_schema(
    schema: &dyn SchemaProvider,
) -> Option<&dyn MaterializedViewSchema> {
    SCHEMA_TYPE_REGISTRY.cast_to_materialized_view_schema(schema)
}

type Downcaster<T> = Arc<dyn Fn(&dyn Any) -> Option<&T> + Send + Sync>;

/// A registry for implementations of [`MaterializedViewSchema`], used for downcasting
/// arbitrary SchemaProviders into `dyn MaterializedViewSchema` where possible.
struct SchemaTypeRegistry {
    materialized_view_schemas:
        DashMap<TypeId, (&'static str, Downcaster<dyn MaterializedViewSchema>)>,
}

impl Debug for SchemaTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaTypeRegistry")
            .field(
                "materialized_view_schemas",
                &self
                    .materialized_view_schemas
                    .iter()
                    .map(|r| r.value().0)
                    .collect_vec(),
            )
            .finish()
    }
}

impl Default for SchemaTypeRegistry {
    fn default() -> Self {
        let new = Self {
            materialized_view_schemas: DashMap::new(),
        };
        new.register_materialized_view_schema::<WorkspaceSchemaProvider>();

        new
    }
}

impl SchemaTypeRegistry {
    fn register_materialized_view_schema<T: MaterializedViewSchema>(&self) {
        self.materialized_view_schemas.insert(
            TypeId::of::<T>(),
            (
                type_name::<T>(),
                Arc::new(|any| {
                    any.downcast_ref::<T>()
                        .map(|s| s as &dyn MaterializedViewSchema)
                }),
            ),
        );
    }

    fn cast_to_materialized_view_schema<'a>(
        &'a self,
        schema: &'a dyn SchemaProvider,
    ) -> Option<&'a dyn MaterializedViewSchema> {
        self.materialized_view_schemas
            .get(&schema.as_any().type_id())
            .and_then(|r| r.value().1(schema.as_any()))
    }
}
