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
    catalog::{MemorySchemaProvider, SchemaProvider},
    execution::SessionStateBuilder,
    prelude::{DataFrame, SessionConfig, SessionContext},
};
use datafusion_common::{plan_datafusion_err, Result};
use datafusion_expr::LogicalPlan;
use datafusion_sql::sqlparser::dialect::dialect_from_str;
use log::info;

use crate::{
    materialized::{
        ddl::MaterializedViewStatement, lifecycle::MaterializedViewHandler,
        schema::WorkspaceSchemaProvider, store::ViewDefinitionStore,
    },
    rewrite::rewriter::MaterializedViewRewriter,
    MaterializedViewOptions,
};

/// A DataFusion session with materialized view DDL and query rewriting.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use datafusion_mv_workspace::{context::MaterializedViewContext, materialized::store::ObjectStoreViewStore};
/// # async fn example() -> datafusion_common::Result<()> {
/// let ctx = MaterializedViewContext::new();
/// let store = ObjectStoreViewStore::try_new(
///     Arc::new(object_store::local::LocalFileSystem::new()),
///     "/tmp/workspace",
/// )?;
/// ctx.register_workspace("datafusion", "public", Arc::new(store)).await?;
///
/// ctx.sql("CREATE TABLE t (a INT)").await?.collect().await?;
/// ctx.sql("CREATE MATERIALIZED VIEW m AS SELECT a FROM t").await?.show().await?;
/// ctx.sql("REFRESH MATERIALIZED VIEW m").await?.show().await?;
/// ctx.sql("SELECT a FROM t WHERE a > 1").await?.show().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MaterializedViewContext {
    ctx: SessionContext,
    handler: MaterializedViewHandler,
    rewriter: MaterializedViewRewriter,
}

impl Default for MaterializedViewContext {
    fn default() -> Self {
        Self::new()
    }
}

impl MaterializedViewContext {
    /// A context with the default configuration.
    pub fn new() -> Self {
        Self::new_with_config(SessionConfig::new())
    }

    /// A context with `config`, plus [`MaterializedViewOptions`] if it doesn't carry them yet.
    pub fn new_with_config(config: SessionConfig) -> Self {
        let config = if config
            .options()
            .extensions
            .get::<MaterializedViewOptions>()
            .is_some()
        {
            config
        } else {
            config.with_option_extension(MaterializedViewOptions::default())
        };

        Self::from_session_context(SessionContext::new_with_config(config))
    }

    /// Wrap an existing session, adding [`MaterializedViewOptions`] if it doesn't carry them yet.
    pub fn from_session_context(ctx: SessionContext) -> Self {
        let state = ctx.state();
        let ctx = if state
            .config()
            .options()
            .extensions
            .get::<MaterializedViewOptions>()
            .is_some()
        {
            ctx
        } else {
            let config = state
                .config()
                .clone()
                .with_option_extension(MaterializedViewOptions::default())
                // keep the catalogs of `ctx`
                .with_create_default_catalog_and_schema(false);
            SessionContext::new_with_state(
                SessionStateBuilder::new_from_existing(state)
                    .with_config(config)
                    .build(),
            )
        };

        Self {
            ctx,
            handler: MaterializedViewHandler::default(),
            rewriter: MaterializedViewRewriter::default(),
        }
    }

    /// Handle DDL with `handler`.
    pub fn with_handler(mut self, handler: MaterializedViewHandler) -> Self {
        self.handler = handler;
        self
    }

    /// Rewrite queries with `rewriter`.
    pub fn with_rewriter(mut self, rewriter: MaterializedViewRewriter) -> Self {
        self.rewriter = rewriter;
        self
    }

    /// The underlying DataFusion session.
    pub fn session(&self) -> &SessionContext {
        &self.ctx
    }

    /// Make `catalog.schema` able to hold materialized views stored in `store`.
    ///
    /// Tables already in the schema stay visible. The schema is created if it doesn't exist.
    pub async fn register_workspace(
        &self,
        catalog: &str,
        schema: &str,
        store: Arc<dyn ViewDefinitionStore>,
    ) -> Result<Arc<WorkspaceSchemaProvider>> {
        let catalog_provider = self
            .ctx
            .catalog(catalog)
            .ok_or_else(|| plan_datafusion_err!("no such catalog {catalog}"))?;
        let inner: Arc<dyn SchemaProvider> = match catalog_provider.schema(schema) {
            Some(inner) => inner,
            None => Arc::new(MemorySchemaProvider::new()),
        };

        let workspace = Arc::new(
            WorkspaceSchemaProvider::try_new(inner, store)
                .await?
                .with_runtime_env(self.ctx.runtime_env()),
        );
        catalog_provider.register_schema(schema, workspace.clone() as Arc<dyn SchemaProvider>)?;

        info!("registered materialized view workspace {catalog}.{schema}");

        Ok(workspace)
    }

    /// Run a single SQL statement.
    ///
    /// Materialized view DDL returns a single row `(ok, summary)`. Queries are optimized
    /// and may be rewritten to read from materialized views. Everything else runs as
    /// in [`SessionContext::sql`].
    pub async fn sql(&self, sql: &str) -> Result<DataFrame> {
        let state = self.ctx.state();
        let parser_options = &state.config().options().sql_parser;
        let dialect = dialect_from_str(&parser_options.dialect).ok_or_else(|| {
            plan_datafusion_err!("unsupported SQL dialect: {}", parser_options.dialect)
        })?;

        if let Some(statement) = MaterializedViewStatement::parse_with_dialect(
            sql,
            dialect.as_ref(),
            parser_options.enable_ident_normalization,
        )? {
            let description = statement.to_string();
            let outcome = self.handler.execute(&state, statement).await?;
            info!("{description}: {}", outcome.message);

            return self.ctx.read_batch(outcome.to_record_batch()?);
        }

        let plan = state.create_logical_plan(sql).await?;
        match plan {
            LogicalPlan::Ddl(_)
            | LogicalPlan::Dml(_)
            | LogicalPlan::Copy(_)
            | LogicalPlan::Statement(_)
            | LogicalPlan::Explain(_)
            | LogicalPlan::Analyze(_)
            | LogicalPlan::DescribeTable(_) => self.ctx.execute_logical_plan(plan).await,
            plan => {
                let plan = state.optimize(&plan)?;
                let plan = self.rewriter.rewrite(plan, &state).await?;
                Ok(DataFrame::new(state, plan))
            }
        }
    }
}
