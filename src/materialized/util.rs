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

use std::sync::Arc;

use datafusion::{
    catalog::{CatalogProviderList, SchemaProvider},
    execution::{SessionState, SessionStateBuilder},
};
use datafusion_common::{DataFusionError, Result};
use datafusion_sql::ResolvedTableReference;

pub fn get_schema(
    catalog_list: &dyn CatalogProviderList,
    table_ref: &ResolvedTableReference,
) -> Result<Arc<dyn SchemaProvider>> {
    let catalog = catalog_list
        .catalog(table_ref.catalog.as_ref())
        .ok_or_else(|| DataFusionError::Plan(format!("no such catalog {}", table_ref.catalog)))?;

    catalog
        .schema(table_ref.schema.as_ref())
        .ok_or_else(|| DataFusionError::Plan(format!("no such schema {}", table_ref.schema)))
}

/// Dotted path of the schema holding `table_ref`.
pub fn schema_full_path(table_ref: &ResolvedTableReference) -> String {
    format!("{}.{}", table_ref.catalog, table_ref.schema)
}

/// A copy of `state` whose unqualified names resolve in `workspace_schema_path`.
///
/// The path is `[catalog, schema]`, or just `[schema]` within the current default catalog.
/// An empty path leaves the defaults alone.
pub fn workspace_state(state: &SessionState, workspace_schema_path: &[String]) -> SessionState {
    let (catalog, schema) = match workspace_schema_path {
        [] => return state.clone(),
        [schema] => (
            state.config().options().catalog.default_catalog.clone(),
            schema.clone(),
        ),
        [.., catalog, schema] => (catalog.clone(), schema.clone()),
    };

    let config = state
        .config()
        .clone()
        .with_default_catalog_and_schema(catalog, schema)
        // the catalog list is shared with `state`; never replace its catalogs
        .with_create_default_catalog_and_schema(false);

    SessionStateBuilder::new_from_existing(state.clone())
        .with_config(config)
        .build()
}
