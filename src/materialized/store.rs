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

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use datafusion::datasource::listing::ListingTableUrl;
use datafusion_common::{DataFusionError, Result};
use futures::{StreamExt, TryStreamExt};
use log::debug;
use object_store::{path::Path, ObjectStore, PutPayload};

use super::definition::MaterializedViewDefinition;

/// Suffix of materialized view definition documents.
pub const DEFINITION_SUFFIX: &str = ".mv.json";

/// Persistent storage for materialized view definitions and their data directories.
///
/// A store is scoped to a single workspace (one schema).
/// Definitions are keyed by view name; data directories by the definition's
/// [`data_storage_path`](MaterializedViewDefinition::data_storage_path).
#[async_trait]
pub trait ViewDefinitionStore: Debug + Send + Sync {
    /// Every definition in this workspace.
    async fn list(&self) -> Result<Vec<MaterializedViewDefinition>>;

    /// The definition named `name`, if any.
    async fn get(&self, name: &str) -> Result<Option<MaterializedViewDefinition>>;

    /// Create or overwrite a definition.
    async fn put(&self, definition: &MaterializedViewDefinition) -> Result<()>;

    /// Delete a definition. Deleting a missing definition is not an error.
    async fn delete(&self, name: &str) -> Result<()>;

    /// URL of a data directory. Always ends with a `/`.
    fn data_location(&self, data_storage_path: &str) -> Result<ListingTableUrl>;

    /// Whether anything is stored under a data directory.
    async fn data_in_use(&self, data_storage_path: &str) -> Result<bool>;

    /// Delete everything under a data directory.
    async fn delete_data(&self, data_storage_path: &str) -> Result<()>;
}

/// A [`ViewDefinitionStore`] on top of an [`ObjectStore`].
///
/// Layout, relative to the workspace root:
///
/// ```text
/// <name>.mv.json           definition document
/// <data_storage_path>/     materialized data
/// ```
#[derive(Debug, Clone)]
pub struct ObjectStoreViewStore {
    store: Arc<dyn ObjectStore>,
    root: ListingTableUrl,
}

impl ObjectStoreViewStore {
    /// A store rooted at `root`. `store` must be the object store serving `root`.
    pub fn new(store: Arc<dyn ObjectStore>, root: ListingTableUrl) -> Self {
        Self { store, root }
    }

    /// Parse `root` (a URL or an absolute local path) as a workspace directory.
    pub fn try_new(store: Arc<dyn ObjectStore>, root: &str) -> Result<Self> {
        let root = if root.ends_with('/') {
            root.to_string()
        } else {
            format!("{root}/")
        };

        Ok(Self::new(store, ListingTableUrl::parse(root)?))
    }

    /// URL of the workspace root.
    pub fn root(&self) -> &ListingTableUrl {
        &self.root
    }

    fn definition_path(&self, name: &str) -> Path {
        self.root.prefix().child(format!("{name}{DEFINITION_SUFFIX}"))
    }

    fn data_prefix(&self, data_storage_path: &str) -> Path {
        data_storage_path
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.prefix().clone(), |path, part| path.child(part))
    }
}

#[async_trait]
impl ViewDefinitionStore for ObjectStoreViewStore {
    async fn list(&self) -> Result<Vec<MaterializedViewDefinition>> {
        let listing = match self.store.list_with_delimiter(Some(self.root.prefix())).await {
            Ok(listing) => listing,
            // an empty workspace may not have been created yet
            Err(object_store::Error::NotFound { .. }) => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut definitions = Vec::new();
        for meta in listing.objects {
            if !meta
                .location
                .filename()
                .is_some_and(|name| name.ends_with(DEFINITION_SUFFIX))
            {
                continue;
            }

            let bytes = self.store.get(&meta.location).await?.bytes().await?;
            definitions.push(
                MaterializedViewDefinition::from_json(&bytes)
                    .map_err(|e| e.context(format!("couldn't decode '{}'", meta.location)))?,
            );
        }

        debug!("found {} definitions under {}", definitions.len(), self.root);

        Ok(definitions)
    }

    async fn get(&self, name: &str) -> Result<Option<MaterializedViewDefinition>> {
        let path = self.definition_path(name);
        let bytes = match self.store.get(&path).await {
            Ok(result) => result.bytes().await?,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        MaterializedViewDefinition::from_json(&bytes)
            .map(Some)
            .map_err(|e| e.context(format!("couldn't decode '{path}'")))
    }

    async fn put(&self, definition: &MaterializedViewDefinition) -> Result<()> {
        let path = self.definition_path(definition.name());
        self.store
            .put(&path, PutPayload::from(definition.to_json()?))
            .await?;

        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match self.store.delete(&self.definition_path(name)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn data_location(&self, data_storage_path: &str) -> Result<ListingTableUrl> {
        let path = data_storage_path.trim_matches('/');
        if path.is_empty() {
            return Err(DataFusionError::Plan(
                "data storage path must not be empty".to_string(),
            ));
        }

        ListingTableUrl::parse(format!("{}{path}/", self.root))
    }

    async fn data_in_use(&self, data_storage_path: &str) -> Result<bool> {
        let prefix = self.data_prefix(data_storage_path);
        Ok(self.store.list(Some(&prefix)).next().await.transpose()?.is_some())
    }

    async fn delete_data(&self, data_storage_path: &str) -> Result<()> {
        let prefix = self.data_prefix(data_storage_path);
        delete_prefix(self.store.as_ref(), &prefix).await
    }
}

/// Delete every object under `prefix`.
pub(crate) async fn delete_prefix(store: &dyn ObjectStore, prefix: &Path) -> Result<()> {
    let deleted = store
        .delete_stream(store.list(Some(prefix)).map_ok(|meta| meta.location).boxed())
        .try_collect::<Vec<_>>()
        .await?;

    debug!("deleted {} objects under {prefix}", deleted.len());

    Ok(())
}
