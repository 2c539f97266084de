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

use std::{any::Any, sync::Arc};

use async_trait::async_trait;
use dashmap::DashMap;
use datafusion::{
    catalog::{SchemaProvider, TableProvider},
    datasource::listing::ListingTableUrl,
    execution::{
        runtime_env::{RuntimeEnv, RuntimeEnvBuilder},
        SessionStateBuilder,
    },
};
use datafusion_common::{plan_err, DataFusionError, Result};
use itertools::Itertools;
use log::debug;

use super::{
    definition::MaterializedViewDefinition,
    impersonation::Impersonator,
    store::ViewDefinitionStore,
    table::{scan_materialized_data, MaterializedViewTable},
    MaterializedViewSchema,
};

/// A schema that serves materialized views next to the tables of an inner schema.
///
/// Definitions are loaded from a [`ViewDefinitionStore`] when the provider is created
/// and cached in memory. Every change is written to the store before it is cached.
#[derive(Debug)]
pub struct WorkspaceSchemaProvider {
    inner: Arc<dyn SchemaProvider>,
    store: Arc<dyn ViewDefinitionStore>,
    views: DashMap<String, MaterializedViewDefinition>,
    runtime_env: Arc<RuntimeEnv>,
    impersonator: Option<Arc<dyn Impersonator>>,
}

impl WorkspaceSchemaProvider {
    /// Wrap `inner`, loading the definitions held by `store`.
    pub async fn try_new(
        inner: Arc<dyn SchemaProvider>,
        store: Arc<dyn ViewDefinitionStore>,
    ) -> Result<Self> {
        let views = store
            .list()
            .await?
            .into_iter()
            .map(|definition| (definition.name().to_string(), definition))
            .collect::<DashMap<_, _>>();

        debug!("loaded {} materialized views", views.len());

        Ok(Self {
            inner,
            store,
            views,
            runtime_env: RuntimeEnvBuilder::new().build_arc()?,
            impersonator: None,
        })
    }

    /// Use `runtime_env` to reach the materialized data when inferring dynamic view schemas.
    pub fn with_runtime_env(mut self, runtime_env: Arc<RuntimeEnv>) -> Self {
        self.runtime_env = runtime_env;
        self
    }

    /// Expand views under the schema owner's identity.
    pub fn with_impersonator(mut self, impersonator: Arc<dyn Impersonator>) -> Self {
        self.impersonator = Some(impersonator);
        self
    }

    /// The store backing this schema.
    pub fn store(&self) -> &Arc<dyn ViewDefinitionStore> {
        &self.store
    }

    async fn materialized_view_table(
        &self,
        definition: MaterializedViewDefinition,
    ) -> Result<MaterializedViewTable> {
        let location = self.store.data_location(definition.data_storage_path())?;

        let table = if definition.is_dynamic() {
            if !definition.is_refreshed() {
                return plan_err!(
                    "materialized view '{}' declares no fields and has not been refreshed",
                    definition.name()
                );
            }

            let state = SessionStateBuilder::new()
                .with_runtime_env(Arc::clone(&self.runtime_env))
                .build();
            let plan = scan_materialized_data(&state, &definition, &location).await?;
            let schema = Arc::new(plan.schema().as_arrow().clone());

            MaterializedViewTable::new_with_schema(definition, location, schema)
        } else {
            MaterializedViewTable::try_new(definition, location)?
        };

        Ok(table.with_impersonation(
            self.inner.owner_name().map(str::to_string),
            self.impersonator.clone(),
        ))
    }
}

#[async_trait]
impl SchemaProvider for WorkspaceSchemaProvider {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn owner_name(&self) -> Option<&str> {
        self.inner.owner_name()
    }

    fn table_names(&self) -> Vec<String> {
        self.inner
            .table_names()
            .into_iter()
            .chain(self.views.iter().map(|r| r.key().clone()))
            .sorted()
            .dedup()
            .collect_vec()
    }

    async fn table(&self, name: &str) -> Result<Option<Arc<dyn TableProvider>>> {
        let Some(definition) = self.materialized_view(name) else {
            return self.inner.table(name).await;
        };

        let table = self.materialized_view_table(definition).await?;
        Ok(Some(Arc::new(table)))
    }

    fn register_table(
        &self,
        name: String,
        table: Arc<dyn TableProvider>,
    ) -> Result<Option<Arc<dyn TableProvider>>> {
        if self.views.contains_key(&name) {
            return plan_err!("a materialized view named '{name}' already exists");
        }

        self.inner.register_table(name, table)
    }

    fn deregister_table(&self, name: &str) -> Result<Option<Arc<dyn TableProvider>>> {
        if self.views.contains_key(name) {
            return plan_err!("'{name}' is a materialized view; use DROP MATERIALIZED VIEW");
        }

        self.inner.deregister_table(name)
    }

    fn table_exist(&self, name: &str) -> bool {
        self.views.contains_key(name) || self.inner.table_exist(name)
    }
}

#[async_trait]
impl MaterializedViewSchema for WorkspaceSchemaProvider {
    fn materialized_view(&self, name: &str) -> Option<MaterializedViewDefinition> {
        self.views.get(name).map(|r| r.value().clone())
    }

    fn materialized_view_names(&self) -> Vec<String> {
        self.views.iter().map(|r| r.key().clone()).sorted().collect_vec()
    }

    fn data_location(&self, definition: &MaterializedViewDefinition) -> Result<ListingTableUrl> {
        self.store.data_location(definition.data_storage_path())
    }

    async fn put_materialized_view(&self, definition: MaterializedViewDefinition) -> Result<()> {
        self.store.put(&definition).await?;
        self.views.insert(definition.name().to_string(), definition);

        Ok(())
    }

    async fn drop_materialized_view(
        &self,
        name: &str,
    ) -> Result<Option<MaterializedViewDefinition>> {
        let definition = match self.materialized_view(name) {
            Some(definition) => Some(definition),
            None => self.store.get(name).await?,
        };

        // data first, then the definition
        if let Some(definition) = &definition {
            self.store
                .delete_data(definition.data_storage_path())
                .await
                .map_err(|e| {
                    DataFusionError::Execution(format!(
                        "couldn't delete the data of materialized view '{name}': {e}"
                    ))
                })?;
        }

        self.store.delete(name).await?;
        self.views.remove(name);

        Ok(definition)
    }

    async fn data_in_use(&self, definition: &MaterializedViewDefinition) -> Result<bool> {
        self.store.data_in_use(definition.data_storage_path()).await
    }

    async fn clear_materialized_data(&self, data_storage_path: &str) -> Result<()> {
        self.store.delete_data(data_storage_path).await
    }
}
