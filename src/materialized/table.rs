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

use arrow_schema::{Schema, SchemaRef};
use async_trait::async_trait;
use datafusion::{
    catalog::{Session, TableProvider},
    datasource::{
        file_format::parquet::ParquetFormat,
        listing::{ListingOptions, ListingTable, ListingTableConfig, ListingTableUrl},
        provider_as_source,
    },
    execution::SessionState,
    physical_plan::ExecutionPlan,
};
use datafusion_common::{plan_err, Column, DFSchema, DataFusionError, Result, TableReference};
use datafusion_expr::{
    cast, expr_rewriter::unnormalize_col, EmptyRelation, Expr, LogicalPlan, LogicalPlanBuilder,
    TableType,
};
use futures::TryStreamExt;
use itertools::Itertools;
use log::trace;

use super::{
    definition::MaterializedViewDefinition,
    impersonation::{ImpersonationGuard, Impersonator},
    util::workspace_state,
};

/// Marker object written next to the data files by every successful refresh.
pub const SUCCESS_MARKER: &str = "_SUCCESS";

/// File extension of materialized data files.
pub const DATA_FILE_EXTENSION: &str = ".parquet";

/// A materialized view as seen by the planner.
///
/// Expanding the view yields either its defining query (not yet refreshed)
/// or a scan of its materialized data (refreshed).
/// See [`MaterializedViewTable::to_logical_plan`].
#[derive(Debug)]
pub struct MaterializedViewTable {
    definition: MaterializedViewDefinition,
    schema: SchemaRef,
    data_location: ListingTableUrl,
    owner: Option<String>,
    impersonator: Option<Arc<dyn Impersonator>>,
}

impl MaterializedViewTable {
    /// Adapt a view that declares its fields.
    pub fn try_new(
        definition: MaterializedViewDefinition,
        data_location: ListingTableUrl,
    ) -> Result<Self> {
        if definition.is_dynamic() {
            return plan_err!(
                "materialized view '{}' declares no fields; its schema must be inferred from its data",
                definition.name()
            );
        }

        let schema = definition.arrow_schema()?;
        Ok(Self::new_with_schema(definition, data_location, schema))
    }

    /// Adapt a view with an already known schema.
    pub fn new_with_schema(
        definition: MaterializedViewDefinition,
        data_location: ListingTableUrl,
        schema: SchemaRef,
    ) -> Self {
        Self {
            definition,
            schema,
            data_location,
            owner: None,
            impersonator: None,
        }
    }

    /// Expand the view as `owner`, the owner of the containing schema.
    pub fn with_impersonation(
        mut self,
        owner: Option<String>,
        impersonator: Option<Arc<dyn Impersonator>>,
    ) -> Self {
        self.owner = owner;
        self.impersonator = impersonator;
        self
    }

    /// The definition this table adapts.
    pub fn definition(&self) -> &MaterializedViewDefinition {
        &self.definition
    }

    /// Where the materialized data lives.
    pub fn data_location(&self) -> &ListingTableUrl {
        &self.data_location
    }

    /// Produce the relational plan for this view.
    ///
    /// Unqualified names resolve in the view's workspace schema, and the whole
    /// expansion runs under the owner's identity.
    ///
    /// * Not refreshed: the defining query, coerced to the declared fields.
    /// * Refreshed: a scan of the materialized data projecting the declared fields
    ///   by name, or all columns for a dynamic view.
    pub async fn to_logical_plan(&self, state: &SessionState) -> Result<LogicalPlan> {
        let _guard = self.impersonate()?;

        let plan = if self.definition.is_refreshed() {
            scan_materialized_data(state, &self.definition, &self.data_location).await
        } else {
            expand_defining_sql(state, &self.definition).await
        };

        plan.map_err(|e| {
            e.context(format!(
                "couldn't expand materialized view '{}'",
                self.definition.name()
            ))
        })
    }

    fn impersonate(&self) -> Result<ImpersonationGuard> {
        match &self.impersonator {
            Some(impersonator) => impersonator.impersonate(self.owner.as_deref(), &self.definition),
            None => Ok(ImpersonationGuard::noop()),
        }
    }
}

#[async_trait]
impl TableProvider for MaterializedViewTable {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn table_type(&self) -> TableType {
        TableType::View
    }

    fn get_table_definition(&self) -> Option<&str> {
        Some(self.definition.defining_sql())
    }

    async fn scan(
        &self,
        state: &dyn Session,
        projection: Option<&Vec<usize>>,
        filters: &[Expr],
        limit: Option<usize>,
    ) -> Result<Arc<dyn ExecutionPlan>> {
        let state = state
            .as_any()
            .downcast_ref::<SessionState>()
            .ok_or_else(|| {
                DataFusionError::Internal(
                    "materialized views can only be scanned within a SessionState".to_string(),
                )
            })?;

        // parquet may hand back different (but compatible) types than declared
        let plan = coerce_plan(self.to_logical_plan(state).await?, &self.schema)?;
        let mut builder = LogicalPlanBuilder::from(plan);

        // filters are qualified by whatever name the query used for this table
        if let Some(filter) = filters
            .iter()
            .cloned()
            .map(unnormalize_col)
            .reduce(|acc, f| acc.and(f))
        {
            builder = builder.filter(filter)?;
        }

        if let Some(projection) = projection {
            let schema = Arc::clone(builder.schema());
            let columns = projection
                .iter()
                .map(|&i| {
                    let (qualifier, field) = schema.qualified_field(i);
                    Expr::Column(Column::new(qualifier.cloned(), field.name()))
                })
                .collect_vec();
            builder = builder.project(columns)?;
        }

        if let Some(limit) = limit {
            builder = builder.limit(0, Some(limit))?;
        }

        let plan = builder.build()?;
        trace!(
            "scanning materialized view '{}':\n{}",
            self.definition.name(),
            plan.display_indent()
        );

        state.create_physical_plan(&plan).await
    }
}

/// Plan the defining query of `definition` within its workspace schema.
///
/// Views with declared fields get them as a type hint: the query's output is
/// cast and renamed to match.
pub async fn expand_defining_sql(
    state: &SessionState,
    definition: &MaterializedViewDefinition,
) -> Result<LogicalPlan> {
    let workspace = workspace_state(state, definition.workspace_schema_path());
    let plan = workspace
        .create_logical_plan(definition.defining_sql())
        .await?;

    if definition.is_dynamic() {
        return Ok(plan);
    }

    coerce_plan(plan, definition.arrow_schema()?.as_ref())
}

/// Plan a scan of the materialized data of `definition` at `location`.
///
/// The scan is qualified by the view name. Declared fields are projected by name with
/// their stored types; dynamic views project every stored column.
/// Fails if nothing has been written to `location`.
pub async fn scan_materialized_data(
    state: &SessionState,
    definition: &MaterializedViewDefinition,
    location: &ListingTableUrl,
) -> Result<LogicalPlan> {
    let store = state.runtime_env().object_store(location.object_store())?;
    let objects = store
        .list(Some(location.prefix()))
        .try_collect::<Vec<_>>()
        .await?;

    if objects.is_empty() {
        return plan_err!(
            "materialized data of '{}' is missing from {location}",
            definition.name()
        );
    }

    let qualifier = TableReference::bare(definition.name());

    if !objects
        .iter()
        .any(|meta| meta.location.as_ref().ends_with(DATA_FILE_EXTENSION))
    {
        // the last refresh produced no rows
        if definition.is_dynamic() {
            return plan_err!(
                "materialized view '{}' has no data to infer its schema from",
                definition.name()
            );
        }

        let schema = definition.arrow_schema()?;
        let schema = DFSchema::try_from_qualified_schema(qualifier, schema.as_ref())?;
        return Ok(LogicalPlan::EmptyRelation(EmptyRelation {
            produce_one_row: false,
            schema: Arc::new(schema),
        }));
    }

    let table = data_listing_table(state, location).await?;
    let builder = LogicalPlanBuilder::scan(qualifier.clone(), provider_as_source(table), None)?;

    if definition.is_dynamic() {
        return builder.build();
    }

    let columns = definition
        .field_names()
        .into_iter()
        .map(|name| Expr::Column(Column::new(Some(qualifier.clone()), name)))
        .collect_vec();

    builder.project(columns)?.build()
}

/// A listing table over the data files at `location`, with the schema inferred from them.
pub(crate) async fn data_listing_table(
    state: &SessionState,
    location: &ListingTableUrl,
) -> Result<Arc<dyn TableProvider>> {
    let options = ListingOptions::new(Arc::new(ParquetFormat::default()))
        .with_file_extension(DATA_FILE_EXTENSION);

    let config = ListingTableConfig::new(location.clone())
        .with_listing_options(options)
        .infer_schema(state)
        .await?;

    Ok(Arc::new(ListingTable::try_new(config)?))
}

/// Cast and rename the output columns of `plan` to match `target`, position by position.
///
/// Returns `plan` untouched when it already matches.
pub fn coerce_plan(plan: LogicalPlan, target: &Schema) -> Result<LogicalPlan> {
    let source = plan.schema();
    if source.fields().len() != target.fields().len() {
        return plan_err!(
            "query produces {} columns but {} are declared",
            source.fields().len(),
            target.fields().len()
        );
    }

    if source
        .fields()
        .iter()
        .zip(target.fields())
        .all(|(s, t)| s.name() == t.name() && s.data_type() == t.data_type())
    {
        return Ok(plan);
    }

    let exprs = source
        .iter()
        .zip(target.fields())
        .map(|((qualifier, field), target)| {
            let column = Expr::Column(Column::new(qualifier.cloned(), field.name()));
            let expr = if field.data_type() == target.data_type() {
                column
            } else {
                cast(column, target.data_type().clone())
            };
            expr.alias(target.name())
        })
        .collect_vec();

    LogicalPlanBuilder::from(plan).project(exprs)?.build()
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use arrow_schema::{DataType, Field, Schema};
    use datafusion::{
        dataframe::DataFrameWriteOptions,
        datasource::{
            listing::{ListingTable, ListingTableUrl},
            source_as_provider,
        },
        prelude::SessionContext,
    };
    use datafusion_common::{DataFusionError, Result};
    use datafusion_expr::{Expr, LogicalPlan};
    use object_store::{local::LocalFileSystem, ObjectStore, PutPayload};
    use tempfile::TempDir;

    use super::{coerce_plan, MaterializedViewTable, SUCCESS_MARKER};
    use crate::materialized::{
        definition::{FieldSpec, MaterializedViewDefinition, RefreshStatus},
        impersonation::{ImpersonationGuard, Impersonator},
    };

    #[derive(Debug, Default)]
    struct CountingImpersonator {
        acquired: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
    }

    impl Impersonator for CountingImpersonator {
        fn impersonate(
            &self,
            _owner: Option<&str>,
            _definition: &MaterializedViewDefinition,
        ) -> Result<ImpersonationGuard> {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            let released = Arc::clone(&self.released);
            Ok(ImpersonationGuard::new(move || {
                released.fetch_add(1, Ordering::SeqCst);
            }))
        }
    }

    async fn setup() -> Result<(TempDir, SessionContext)> {
        let _ = env_logger::builder().is_test(true).try_init();

        let dir = TempDir::new()?;
        let ctx = SessionContext::new();
        ctx.sql("CREATE TABLE t (a INT, b VARCHAR, c DOUBLE)")
            .await?
            .collect()
            .await?;
        ctx.sql("INSERT INTO t VALUES (1, 'x', 1.5), (2, 'y', 2.5)")
            .await?
            .collect()
            .await?;

        Ok((dir, ctx))
    }

    fn fields(fields: &[(&str, DataType)]) -> Vec<FieldSpec> {
        fields
            .iter()
            .map(|(name, data_type)| {
                FieldSpec::from_arrow(&Field::new(*name, data_type.clone(), true))
            })
            .collect()
    }

    fn location(dir: &TempDir, name: &str) -> Result<ListingTableUrl> {
        ListingTableUrl::parse(format!("{}/{name}/", dir.path().to_string_lossy()))
    }

    #[tokio::test]
    async fn test_incomplete_expands_defining_query() -> Result<()> {
        let (dir, ctx) = setup().await?;

        let definition = MaterializedViewDefinition::new(
            "m1",
            "SELECT a, b FROM t",
            fields(&[("a", DataType::Int32), ("b", DataType::Utf8)]),
            ["datafusion", "public"],
        );
        let table = MaterializedViewTable::try_new(definition, location(&dir, "m1")?)?;

        let state = ctx.state();
        let plan = table.to_logical_plan(&state).await?;
        let expected = state.create_logical_plan("SELECT a, b FROM t").await?;

        assert_eq!(
            format!("{}", plan.display_indent()),
            format!("{}", expected.display_indent())
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_incomplete_applies_type_hint() -> Result<()> {
        let (dir, ctx) = setup().await?;

        // declared names differ from the query's (an explicit column list)
        let definition = MaterializedViewDefinition::new(
            "m1",
            "SELECT a, c FROM t",
            fields(&[("x", DataType::Int64), ("y", DataType::Float64)]),
            ["datafusion", "public"],
        );
        let table = MaterializedViewTable::try_new(definition, location(&dir, "m1")?)?;
        let plan = table.to_logical_plan(&ctx.state()).await?;

        let schema = plan.schema();
        assert_eq!(
            schema.fields().iter().map(|f| f.name().as_str()).collect::<Vec<_>>(),
            vec!["x", "y"]
        );
        assert_eq!(schema.field(0).data_type(), &DataType::Int64);

        Ok(())
    }

    #[tokio::test]
    async fn test_complete_scans_data() -> Result<()> {
        let (dir, ctx) = setup().await?;
        let location = location(&dir, "m1")?;

        ctx.sql("SELECT b, a FROM t")
            .await?
            .write_parquet(location.as_str(), DataFrameWriteOptions::new(), None)
            .await?;

        let definition = MaterializedViewDefinition::new(
            "m1",
            "SELECT b, a FROM t",
            fields(&[("b", DataType::Utf8), ("a", DataType::Int32)]),
            ["datafusion", "public"],
        )
        .with_refresh_info(Some(1), RefreshStatus::Complete);
        let table = MaterializedViewTable::try_new(definition, location.clone())?;
        let plan = table.to_logical_plan(&ctx.state()).await?;

        let LogicalPlan::Projection(projection) = &plan else {
            panic!("expected a projection, got:\n{}", plan.display_indent());
        };
        let names = projection
            .expr
            .iter()
            .map(|e| match e {
                Expr::Column(c) => c.name.clone(),
                other => panic!("expected a column, got {other}"),
            })
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["b", "a"]);

        let LogicalPlan::TableScan(scan) = projection.input.as_ref() else {
            panic!("expected a table scan under the projection");
        };
        let provider = source_as_provider(&scan.source)?;
        let listing = provider
            .as_any()
            .downcast_ref::<ListingTable>()
            .expect("listing table");
        assert_eq!(listing.table_paths(), &vec![location]);

        Ok(())
    }

    #[tokio::test]
    async fn test_complete_without_data_fails() -> Result<()> {
        let (dir, ctx) = setup().await?;

        let definition = MaterializedViewDefinition::new(
            "m1",
            "SELECT a FROM t",
            fields(&[("a", DataType::Int32)]),
            ["datafusion", "public"],
        )
        .with_refresh_info(Some(1), RefreshStatus::Complete);
        let table = MaterializedViewTable::try_new(definition, location(&dir, "m1")?)?;

        let err = table.to_logical_plan(&ctx.state()).await.unwrap_err();
        assert!(err.to_string().contains("missing"), "{err}");

        Ok(())
    }

    #[tokio::test]
    async fn test_complete_with_empty_refresh() -> Result<()> {
        let (dir, ctx) = setup().await?;
        let location = location(&dir, "m1")?;

        let store = LocalFileSystem::new();
        store
            .put(
                &location.prefix().child(SUCCESS_MARKER),
                PutPayload::from_static(b""),
            )
            .await?;

        let definition = MaterializedViewDefinition::new(
            "m1",
            "SELECT a FROM t WHERE false",
            fields(&[("a", DataType::Int32)]),
            ["datafusion", "public"],
        )
        .with_refresh_info(Some(1), RefreshStatus::Complete);
        let table = MaterializedViewTable::try_new(definition, location)?;
        let plan = table.to_logical_plan(&ctx.state()).await?;

        assert!(matches!(plan, LogicalPlan::EmptyRelation(_)));
        assert_eq!(plan.schema().fields().len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_scan_reads_through_session() -> Result<()> {
        let (dir, ctx) = setup().await?;

        let definition = MaterializedViewDefinition::new(
            "m1",
            "SELECT a, b FROM t",
            fields(&[("a", DataType::Int64), ("b", DataType::Utf8)]),
            ["datafusion", "public"],
        );
        let table = MaterializedViewTable::try_new(definition, location(&dir, "m1")?)?;
        ctx.register_table("m1", Arc::new(table))?;

        let batches = ctx
            .sql("SELECT b FROM m1 WHERE a > 1")
            .await?
            .collect()
            .await?;
        let rows = batches.iter().map(|b| b.num_rows()).sum::<usize>();
        assert_eq!(rows, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_impersonation_released_on_error() -> Result<()> {
        let (dir, ctx) = setup().await?;

        let impersonator = CountingImpersonator::default();
        let acquired = Arc::clone(&impersonator.acquired);
        let released = Arc::clone(&impersonator.released);

        let definition = MaterializedViewDefinition::new(
            "m1",
            "SELECT a FROM no_such_table",
            fields(&[("a", DataType::Int32)]),
            ["datafusion", "public"],
        );
        let table = MaterializedViewTable::try_new(definition, location(&dir, "m1")?)?
            .with_impersonation(Some("owner".to_string()), Some(Arc::new(impersonator)));

        assert!(table.to_logical_plan(&ctx.state()).await.is_err());
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
        assert_eq!(released.load(Ordering::SeqCst), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_coerce_plan() -> Result<()> {
        let (_dir, ctx) = setup().await?;
        let plan = ctx.state().create_logical_plan("SELECT a, b FROM t").await?;

        // already aligned
        let same = Schema::new(vec![
            Field::new("a", DataType::Int32, true),
            Field::new("b", DataType::Utf8, true),
        ]);
        assert_eq!(coerce_plan(plan.clone(), &same)?, plan);

        let wider = Schema::new(vec![
            Field::new("a", DataType::Int64, true),
            Field::new("b", DataType::Utf8, true),
        ]);
        let coerced = coerce_plan(plan.clone(), &wider)?;
        assert_eq!(coerced.schema().field(0).data_type(), &DataType::Int64);

        let fewer = Schema::new(vec![Field::new("a", DataType::Int32, true)]);
        assert!(matches!(
            coerce_plan(plan, &fewer),
            Err(DataFusionError::Plan(_))
        ));

        Ok(())
    }

    #[test]
    fn test_dynamic_needs_inferred_schema() -> Result<()> {
        let definition = MaterializedViewDefinition::new("m1", "SELECT 1", vec![], ["datafusion"]);
        let location = ListingTableUrl::parse("file:///tmp/m1/")?;
        assert!(MaterializedViewTable::try_new(definition, location).is_err());

        Ok(())
    }
}
