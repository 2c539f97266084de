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

/*!

Handling of materialized view DDL.

CREATE validates the defining query, derives the declared fields from it and
persists a definition that has not been refreshed yet.
REFRESH runs the defining query through a [`MaterializationEngine`] and only
marks the view refreshed once the data is in place.
DROP removes the data and the definition.

Validation failures are returned as errors. The "nothing to do" cases of
`IF NOT EXISTS` and `IF EXISTS` are returned as an unsuccessful [`DdlOutcome`].

*/

use std::sync::Arc;

use arrow::{
    array::{ArrayRef, BooleanArray, StringArray},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use datafusion::{catalog::SchemaProvider, execution::SessionState};
use datafusion_common::{plan_datafusion_err, plan_err, DFSchema, Result, TableReference};
use datafusion_sql::ResolvedTableReference;
use itertools::Itertools;
use log::debug;

use super::{
    cast_to_materialized_view_schema,
    ddl::{CreateMode, MaterializedViewStatement},
    definition::{now_millis, FieldSpec, MaterializedViewDefinition, RefreshStatus},
    materialize::{MaterializationEngine, ParquetMaterializer},
    table::expand_defining_sql,
    util::{get_schema, schema_full_path, workspace_state},
    MaterializedViewSchema, TableKind,
};

/// Result of a DDL statement that didn't fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdlOutcome {
    /// Whether the statement changed anything.
    pub success: bool,
    /// Human readable summary.
    pub message: String,
}

impl DdlOutcome {
    fn ok(message: String) -> Self {
        Self {
            success: true,
            message,
        }
    }

    fn skipped(message: String) -> Self {
        Self {
            success: false,
            message,
        }
    }

    /// The outcome as a single row `(ok BOOLEAN, summary VARCHAR)`.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("ok", DataType::Boolean, false),
            Field::new("summary", DataType::Utf8, false),
        ]));

        Ok(RecordBatch::try_new(
            schema,
            vec![
                Arc::new(BooleanArray::from(vec![self.success])) as ArrayRef,
                Arc::new(StringArray::from(vec![self.message.as_str()])),
            ],
        )?)
    }
}

/// Executes [`MaterializedViewStatement`]s against the catalog of a session.
#[derive(Debug, Clone)]
pub struct MaterializedViewHandler {
    engine: Arc<dyn MaterializationEngine>,
}

impl Default for MaterializedViewHandler {
    fn default() -> Self {
        Self::new(Arc::new(ParquetMaterializer))
    }
}

/// The schema a statement targets, with the view name resolved against the session defaults.
struct Target<'a> {
    table_ref: ResolvedTableReference,
    schema: Arc<dyn SchemaProvider>,
    state: &'a SessionState,
}

impl<'a> Target<'a> {
    fn resolve(state: &'a SessionState, name: TableReference) -> Result<Self> {
        let options = state.config().options();
        let table_ref = name.resolve(
            &options.catalog.default_catalog,
            &options.catalog.default_schema,
        );
        let schema = get_schema(state.catalog_list().as_ref(), &table_ref)?;

        Ok(Self {
            table_ref,
            schema,
            state,
        })
    }

    fn name(&self) -> &str {
        self.table_ref.table.as_ref()
    }

    fn schema_path(&self) -> String {
        schema_full_path(&self.table_ref)
    }

    /// The session's default schema, which unqualified names in a defining query resolve against.
    fn workspace_schema_path(&self) -> Vec<String> {
        let options = self.state.config().options();
        vec![
            options.catalog.default_catalog.clone(),
            options.catalog.default_schema.clone(),
        ]
    }

    fn materialized_view_schema(&self) -> Option<&dyn MaterializedViewSchema> {
        cast_to_materialized_view_schema(self.schema.as_ref())
    }

    fn require_materialized_view_schema(&self) -> Result<&dyn MaterializedViewSchema> {
        self.materialized_view_schema().ok_or_else(|| {
            plan_datafusion_err!(
                "schema [{}] does not support materialized views",
                self.schema_path()
            )
        })
    }

    /// What currently goes by the target name, if anything.
    async fn existing_kind(&self) -> Result<Option<TableKind>> {
        if self
            .materialized_view_schema()
            .is_some_and(|schema| schema.materialized_view(self.name()).is_some())
        {
            return Ok(Some(TableKind::MaterializedView));
        }

        let table = self.schema.table(self.name()).await?;
        Ok(table.map(|table| TableKind::of(table.as_ref())))
    }
}

impl MaterializedViewHandler {
    /// A handler that refreshes views with `engine`.
    pub fn new(engine: Arc<dyn MaterializationEngine>) -> Self {
        Self { engine }
    }

    /// Execute `statement`.
    pub async fn execute(
        &self,
        state: &SessionState,
        statement: MaterializedViewStatement,
    ) -> Result<DdlOutcome> {
        debug!("executing {statement}");

        match statement {
            MaterializedViewStatement::Create {
                name,
                columns,
                query,
                mode,
            } => self.create_view(state, name, &columns, &query, mode).await,
            MaterializedViewStatement::Drop { name, if_exists } => {
                self.drop_view(state, name, if_exists).await
            }
            MaterializedViewStatement::Refresh { name } => self.refresh_view(state, name).await,
        }
    }

    /// Create (or replace) the materialized view `name` defined by `query`.
    ///
    /// `columns`, if not empty, renames the query's output columns.
    pub async fn create_view(
        &self,
        state: &SessionState,
        name: TableReference,
        columns: &[String],
        query: &str,
        mode: CreateMode,
    ) -> Result<DdlOutcome> {
        let target = Target::resolve(state, name)?;
        let (name, schema_path) = (target.name().to_string(), target.schema_path());

        let replaced = match (target.existing_kind().await?, mode) {
            (None, _) => None,
            (Some(kind), CreateMode::IfNotExists) => {
                return Ok(DdlOutcome::skipped(format!(
                    "A {kind} with given name [{name}] already exists in schema [{schema_path}]"
                )));
            }
            (Some(kind), CreateMode::Simple) => {
                return plan_err!(
                    "A {kind} with given name [{name}] already exists in schema [{schema_path}]"
                );
            }
            (Some(TableKind::MaterializedView), CreateMode::OrReplace) => target
                .require_materialized_view_schema()?
                .materialized_view(&name),
            (Some(kind), CreateMode::OrReplace) => {
                return plan_err!(
                    "A non-materialized {kind} with given name [{name}] already exists in schema [{schema_path}]"
                );
            }
        };

        let mv_schema = target.require_materialized_view_schema()?;
        let workspace_schema_path = target.workspace_schema_path();

        let plan = workspace_state(target.state, &workspace_schema_path)
            .create_logical_plan(query)
            .await
            .map_err(|e| e.context(format!("invalid query for materialized view [{name}]")))?;
        let fields = declared_fields(plan.schema(), columns)?;

        let definition =
            MaterializedViewDefinition::new(&name, query, fields, &workspace_schema_path)
                .with_refresh_info(Some(now_millis()), RefreshStatus::Incomplete);

        match replaced {
            None => {
                if mv_schema.data_in_use(&definition).await? {
                    return plan_err!(
                        "data location {} of materialized view [{name}] is already in use",
                        mv_schema.data_location(&definition)?
                    );
                }

                mv_schema.put_materialized_view(definition).await?;

                Ok(DdlOutcome::ok(format!(
                    "Materialized view [{name}] created successfully in schema [{schema_path}]"
                )))
            }
            Some(previous) => {
                let definition =
                    definition.with_data_storage_path(previous.data_storage_path());

                // nothing reads the old data once the new definition is stored
                mv_schema.put_materialized_view(definition).await?;
                mv_schema
                    .clear_materialized_data(previous.data_storage_path())
                    .await?;

                Ok(DdlOutcome::ok(format!(
                    "Materialized view [{name}] replaced successfully in schema [{schema_path}]"
                )))
            }
        }
    }

    /// Drop the materialized view `name` and its data.
    pub async fn drop_view(
        &self,
        state: &SessionState,
        name: TableReference,
        if_exists: bool,
    ) -> Result<DdlOutcome> {
        let target = Target::resolve(state, name)?;
        let (name, schema_path) = (target.name().to_string(), target.schema_path());

        match target.existing_kind().await? {
            None if if_exists => Ok(DdlOutcome::skipped(format!(
                "Materialized view [{name}] not found in schema [{schema_path}]"
            ))),
            None => plan_err!("Unknown materialized view [{name}] in schema [{schema_path}]"),
            Some(TableKind::MaterializedView) => {
                target
                    .require_materialized_view_schema()?
                    .drop_materialized_view(&name)
                    .await?;

                Ok(DdlOutcome::ok(format!(
                    "Materialized view [{name}] deleted successfully from schema [{schema_path}]"
                )))
            }
            Some(kind) => plan_err!(
                "[{name}] in schema [{schema_path}] is a {kind}, not a materialized view"
            ),
        }
    }

    /// Materialize the current result of the defining query of `name`.
    ///
    /// The definition is only updated once the data has been written.
    pub async fn refresh_view(
        &self,
        state: &SessionState,
        name: TableReference,
    ) -> Result<DdlOutcome> {
        let target = Target::resolve(state, name)?;
        let (name, schema_path) = (target.name().to_string(), target.schema_path());

        let Some((mv_schema, mut definition)) = target
            .materialized_view_schema()
            .and_then(|schema| Some((schema, schema.materialized_view(&name)?)))
        else {
            return plan_err!("Unknown materialized view [{name}] in schema [{schema_path}]");
        };

        let location = mv_schema.data_location(&definition)?;
        let plan = expand_defining_sql(state, &definition).await?;
        let workspace = workspace_state(state, definition.workspace_schema_path());

        self.engine
            .materialize(&workspace, plan, &location)
            .await
            .map_err(|e| e.context(format!("couldn't refresh materialized view [{name}]")))?;

        definition.mark_refreshed();
        mv_schema.put_materialized_view(definition).await?;

        Ok(DdlOutcome::ok(format!(
            "Materialized view [{name}] refreshed successfully in schema [{schema_path}]"
        )))
    }
}

/// Fields of the query's output, renamed by `columns` if given.
fn declared_fields(schema: &DFSchema, columns: &[String]) -> Result<Vec<FieldSpec>> {
    if !columns.is_empty() && columns.len() != schema.fields().len() {
        return plan_err!(
            "view's field list specifies {} columns but the query produces {}",
            columns.len(),
            schema.fields().len()
        );
    }

    let fields = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let mut spec = FieldSpec::from_arrow(field);
            if let Some(name) = columns.get(i) {
                spec.name = name.clone();
            }
            spec
        })
        .collect_vec();

    if let Some(duplicate) = fields.iter().map(|f| &f.name).duplicates().next() {
        return plan_err!("duplicate column name [{duplicate}] in materialized view");
    }

    Ok(fields)
}
