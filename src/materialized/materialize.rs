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

use std::fmt::Debug;

use async_trait::async_trait;
use datafusion::{
    dataframe::DataFrameWriteOptions, datasource::listing::ListingTableUrl,
    execution::SessionState, prelude::DataFrame,
};
use datafusion_common::Result;
use datafusion_expr::LogicalPlan;
use futures::TryStreamExt;
use log::{debug, warn};
use object_store::{ObjectStore, PutPayload};

use super::{
    definition::now_millis,
    store::delete_prefix,
    table::SUCCESS_MARKER,
};

/// Runs a view's defining query and stores the result as the view's data.
#[async_trait]
pub trait MaterializationEngine: Debug + Send + Sync {
    /// Replace everything at `target` with the output of `plan`.
    ///
    /// On failure the previous contents of `target` must be left readable.
    async fn materialize(
        &self,
        state: &SessionState,
        plan: LogicalPlan,
        target: &ListingTableUrl,
    ) -> Result<()>;
}

/// Writes Parquet into a staging directory next to the target, then swaps it in.
///
/// A `_SUCCESS` marker is written along with the data, so a refresh that
/// produced no rows still leaves the target non-empty.
#[derive(Debug, Default)]
pub struct ParquetMaterializer;

impl ParquetMaterializer {
    fn staging_location(target: &ListingTableUrl) -> Result<ListingTableUrl> {
        ListingTableUrl::parse(format!(
            "{}.__staging_{}/",
            target.as_str().trim_end_matches('/'),
            now_millis()
        ))
    }

    async fn write_staging(
        &self,
        state: &SessionState,
        plan: LogicalPlan,
        staging: &ListingTableUrl,
        store: &dyn ObjectStore,
    ) -> Result<()> {
        DataFrame::new(state.clone(), plan)
            .write_parquet(staging.as_str(), DataFrameWriteOptions::new(), None)
            .await?;

        store
            .put(
                &staging.prefix().child(SUCCESS_MARKER),
                PutPayload::from_static(b""),
            )
            .await?;

        Ok(())
    }

    async fn swap(
        &self,
        store: &dyn ObjectStore,
        staging: &ListingTableUrl,
        target: &ListingTableUrl,
    ) -> Result<()> {
        delete_prefix(store, target.prefix()).await?;

        let staged = store
            .list(Some(staging.prefix()))
            .try_collect::<Vec<_>>()
            .await?;

        for meta in staged {
            let Some(parts) = meta.location.prefix_match(staging.prefix()) else {
                continue;
            };
            let destination = parts.fold(target.prefix().clone(), |path, part| path.child(part));
            store.rename(&meta.location, &destination).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl MaterializationEngine for ParquetMaterializer {
    async fn materialize(
        &self,
        state: &SessionState,
        plan: LogicalPlan,
        target: &ListingTableUrl,
    ) -> Result<()> {
        let staging = Self::staging_location(target)?;
        let store = state.runtime_env().object_store(target.object_store())?;

        debug!("materializing into {staging}");

        if let Err(e) = self.write_staging(state, plan, &staging, store.as_ref()).await {
            if let Err(cleanup) = delete_prefix(store.as_ref(), staging.prefix()).await {
                warn!("couldn't clean up {staging}: {cleanup}");
            }
            return Err(e);
        }

        self.swap(store.as_ref(), &staging, target).await?;

        debug!("materialized data is now at {target}");

        Ok(())
    }
}
