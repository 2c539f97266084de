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

use datafusion::{datasource::listing::ListingTableUrl, execution::SessionState};
use datafusion_common::Result;
use datafusion_expr::LogicalPlan;
use log::{debug, warn};

use super::{
    substitution::{PlanSubstitution, SpjSubstitution},
    util::list_schemas,
};
use crate::{
    materialized::{
        cast_to_materialized_view_schema,
        definition::MaterializedViewDefinition,
        table::{coerce_plan, expand_defining_sql, scan_materialized_data},
    },
    MaterializedViewOptions,
};

/// A materialized view considered while rewriting a query.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// The view's definition as of discovery.
    pub definition: MaterializedViewDefinition,
    /// `catalog.schema` of the schema holding the view.
    pub schema_full_path: String,
    /// Where the view's data lives.
    pub data_location: ListingTableUrl,
    /// Whether the view has been refreshed since it was last defined.
    pub refreshed: bool,
}

/// Replaces parts of queries with scans of refreshed materialized views.
///
/// Candidates are tried in discovery order and the first one that matches wins.
#[derive(Debug, Clone)]
pub struct MaterializedViewRewriter {
    substitution: Arc<dyn PlanSubstitution>,
}

impl Default for MaterializedViewRewriter {
    fn default() -> Self {
        Self::new(Arc::new(SpjSubstitution))
    }
}

impl MaterializedViewRewriter {
    /// Use `substitution` to match candidates against queries.
    pub fn new(substitution: Arc<dyn PlanSubstitution>) -> Self {
        Self { substitution }
    }

    /// Every materialized view visible to `state`, in discovery order:
    /// the default catalog first, then other catalogs, schemas and views by name.
    pub fn candidates(&self, state: &SessionState) -> Result<Vec<Candidate>> {
        let default_catalog = &state.config().options().catalog.default_catalog;
        let mut candidates = vec![];

        let schemas = list_schemas(state.catalog_list().as_ref(), default_catalog)?;
        for (schema_full_path, schema) in schemas {
            let Some(mv_schema) = cast_to_materialized_view_schema(schema.as_ref()) else {
                continue;
            };

            for name in mv_schema.materialized_view_names() {
                let Some(definition) = mv_schema.materialized_view(&name) else {
                    continue;
                };

                let data_location = match mv_schema.data_location(&definition) {
                    Ok(location) => location,
                    Err(e) => {
                        warn!("skipping materialized view {schema_full_path}.{name}: {e}");
                        continue;
                    }
                };

                candidates.push(Candidate {
                    refreshed: definition.is_refreshed(),
                    definition,
                    schema_full_path: schema_full_path.clone(),
                    data_location,
                });
            }
        }

        Ok(candidates)
    }

    /// Rewrite `plan` to read from a materialized view if one can answer part of it.
    ///
    /// `plan` should already be optimized. It is returned unchanged if rewriting is
    /// disabled or no refreshed view matches. Failures of individual views are
    /// logged and skipped.
    pub async fn rewrite(&self, plan: LogicalPlan, state: &SessionState) -> Result<LogicalPlan> {
        let enabled = state
            .config()
            .options()
            .extensions
            .get::<MaterializedViewOptions>()
            .map_or(true, |options| options.enable_query_rewrite);
        if !enabled {
            return Ok(plan);
        }

        let candidates = self
            .candidates(state)?
            .into_iter()
            .filter(|candidate| candidate.refreshed)
            .collect::<Vec<_>>();
        if candidates.is_empty() {
            debug!("no refreshed materialized views to rewrite with");
            return Ok(plan);
        }

        for candidate in &candidates {
            let name = format!("{}.{}", candidate.schema_full_path, candidate.definition.name());

            match self.try_candidate(&plan, candidate, state).await {
                Ok(Some(rewritten)) => {
                    debug!("rewrote query to use {name}:\n{}", rewritten.display_indent());
                    return Ok(rewritten);
                }
                Ok(None) => debug!("{name} doesn't match"),
                Err(e) => warn!("skipping materialized view {name}: {e}"),
            }
        }

        Ok(plan)
    }

    async fn try_candidate(
        &self,
        plan: &LogicalPlan,
        candidate: &Candidate,
        state: &SessionState,
    ) -> Result<Option<LogicalPlan>> {
        let definition = &candidate.definition;

        let target = expand_defining_sql(state, definition).await?;
        let target = state.optimize(&target)?;

        let replacement =
            scan_materialized_data(state, definition, &candidate.data_location).await?;
        let replacement = if definition.is_dynamic() {
            replacement
        } else {
            coerce_plan(replacement, definition.arrow_schema()?.as_ref())?
        };

        self.substitution
            .attempt_substitution(&target, &replacement, plan)
    }
}
