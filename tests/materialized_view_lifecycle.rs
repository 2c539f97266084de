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

use std::{ops::Deref, sync::Arc};

use anyhow::{bail, Context, Result};
use datafusion::datasource::{listing::ListingTable, source_as_provider};
use datafusion_common::{
    assert_batches_sorted_eq,
    cast::{as_boolean_array, as_string_array},
    tree_node::{TreeNode, TreeNodeRecursion},
};
use datafusion_expr::LogicalPlan;
use datafusion_mv_workspace::{
    context::MaterializedViewContext,
    materialized::{
        schema::WorkspaceSchemaProvider, store::ObjectStoreViewStore, MaterializedViewSchema,
    },
    rewrite::rewriter::MaterializedViewRewriter,
};
use object_store::local::LocalFileSystem;
use tempfile::TempDir;

const ALL_ROWS: [&str; 7] = [
    "+---+-------+",
    "| a | b     |",
    "+---+-------+",
    "| 1 | one   |",
    "| 2 | two   |",
    "| 3 | three |",
    "+---+-------+",
];

struct TestContext {
    _dir: TempDir,
    ctx: MaterializedViewContext,
    workspace: Arc<WorkspaceSchemaProvider>,
}

impl Deref for TestContext {
    type Target = MaterializedViewContext;

    fn deref(&self) -> &Self::Target {
        &self.ctx
    }
}

async fn setup() -> Result<TestContext> {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = TempDir::new().context("create tempdir")?;
    let store = ObjectStoreViewStore::try_new(
        Arc::new(LocalFileSystem::new()),
        &dir.path().to_string_lossy(),
    )
    .context("create definition store")?;

    let ctx = MaterializedViewContext::new();
    let workspace = ctx
        .register_workspace("datafusion", "public", Arc::new(store))
        .await
        .context("register workspace")?;

    ctx.sql("CREATE TABLE t (a INT, b VARCHAR)")
        .await?
        .collect()
        .await?;
    ctx.sql("INSERT INTO t VALUES (1, 'one'), (2, 'two'), (3, 'three')")
        .await?
        .collect()
        .await?;
    ctx.sql("CREATE VIEW v AS SELECT a FROM t")
        .await?
        .collect()
        .await?;

    Ok(TestContext {
        _dir: dir,
        ctx,
        workspace,
    })
}

/// Run a statement that returns a DDL outcome.
async fn ddl(ctx: &MaterializedViewContext, sql: &str) -> Result<(bool, String)> {
    let batches = ctx.sql(sql).await?.collect().await?;
    let batch = batches.first().context("DDL returns a row")?;

    let ok = as_boolean_array(batch.column(0))?.value(0);
    let summary = as_string_array(batch.column(1))?.value(0).to_string();

    Ok((ok, summary))
}

/// Run a statement that should fail, returning the error message.
async fn ddl_error(ctx: &MaterializedViewContext, sql: &str) -> Result<String> {
    match ctx.sql(sql).await {
        Ok(_) => bail!("expected '{sql}' to fail"),
        Err(e) => Ok(e.to_string()),
    }
}

/// Names of the tables scanned by `plan`, and the paths of those that are listing tables.
fn scans(plan: &LogicalPlan) -> Result<(Vec<String>, Vec<String>)> {
    let mut tables = vec![];
    let mut paths = vec![];

    plan.apply(|node| {
        if let LogicalPlan::TableScan(scan) = node {
            tables.push(scan.table_name.to_string());

            let provider = source_as_provider(&scan.source)?;
            if let Some(listing) = provider.as_any().downcast_ref::<ListingTable>() {
                paths.extend(listing.table_paths().iter().map(|url| url.to_string()));
            }
        }

        Ok(TreeNodeRecursion::Continue)
    })?;

    Ok((tables, paths))
}

#[tokio::test]
async fn test_create_collisions() -> Result<()> {
    let ctx = setup().await.context("setup")?;

    let (ok, summary) = ddl(&ctx, "CREATE MATERIALIZED VIEW m1 AS SELECT a, b FROM t").await?;
    assert!(ok, "{summary}");
    assert_eq!(
        summary,
        "Materialized view [m1] created successfully in schema [datafusion.public]"
    );

    for (name, kind) in [("t", "table"), ("v", "view"), ("m1", "materialized view")] {
        let error = ddl_error(
            &ctx,
            &format!("CREATE MATERIALIZED VIEW {name} AS SELECT a FROM t"),
        )
        .await?;
        assert!(
            error.contains(&format!("A {kind} with given name [{name}] already exists")),
            "{error}"
        );

        let (ok, summary) = ddl(
            &ctx,
            &format!("CREATE MATERIALIZED VIEW IF NOT EXISTS {name} AS SELECT a FROM t"),
        )
        .await?;
        assert!(!ok, "{summary}");
        assert!(summary.contains("already exists"), "{summary}");
    }

    for name in ["t", "v"] {
        let error = ddl_error(
            &ctx,
            &format!("CREATE OR REPLACE MATERIALIZED VIEW {name} AS SELECT a FROM t"),
        )
        .await?;
        assert!(error.contains("non-materialized"), "{error}");
    }

    let (ok, summary) = ddl(
        &ctx,
        "CREATE OR REPLACE MATERIALIZED VIEW m1 (x) AS SELECT a FROM t",
    )
    .await?;
    assert!(ok, "{summary}");
    assert!(summary.contains("replaced"), "{summary}");

    let definition = ctx.workspace.materialized_view("m1").context("m1")?;
    assert_eq!(definition.field_names(), vec!["x"]);

    // plain tables and views are untouched
    assert!(ctx.session().table_exist("t")?);
    assert!(ctx.session().table_exist("v")?);

    Ok(())
}

#[tokio::test]
async fn test_invalid_definitions() -> Result<()> {
    let ctx = setup().await.context("setup")?;

    for sql in [
        "CREATE MATERIALIZED VIEW m1 AS SELECT a FROM missing",
        "CREATE MATERIALIZED VIEW m1 (x, y, z) AS SELECT a, b FROM t",
        "CREATE MATERIALIZED VIEW m1 (x, x) AS SELECT a, b FROM t",
    ] {
        ddl_error(&ctx, sql).await?;
    }

    assert!(ctx.workspace.materialized_view_names().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_replace_resets_refresh() -> Result<()> {
    let ctx = setup().await.context("setup")?;

    ddl(&ctx, "CREATE MATERIALIZED VIEW m1 AS SELECT a, b FROM t").await?;
    ddl(&ctx, "REFRESH MATERIALIZED VIEW m1").await?;

    let refreshed = ctx.workspace.materialized_view("m1").context("m1")?;
    assert!(refreshed.is_refreshed());
    assert!(ctx.workspace.data_in_use(&refreshed).await?);

    ddl(&ctx, "CREATE OR REPLACE MATERIALIZED VIEW m1 AS SELECT a FROM t").await?;

    let replaced = ctx.workspace.materialized_view("m1").context("m1")?;
    assert!(!replaced.is_refreshed());
    assert_eq!(replaced.data_storage_path(), refreshed.data_storage_path());
    assert!(!ctx.workspace.data_in_use(&replaced).await?);

    Ok(())
}

#[tokio::test]
async fn test_drop() -> Result<()> {
    let ctx = setup().await.context("setup")?;

    let (ok, summary) = ddl(&ctx, "DROP MATERIALIZED VIEW IF EXISTS nope").await?;
    assert!(!ok, "{summary}");

    let error = ddl_error(&ctx, "DROP MATERIALIZED VIEW nope").await?;
    assert!(error.contains("Unknown materialized view [nope]"), "{error}");

    for name in ["t", "v"] {
        let error = ddl_error(&ctx, &format!("DROP MATERIALIZED VIEW {name}")).await?;
        assert!(error.contains("not a materialized view"), "{error}");
        assert!(ctx.session().table_exist(name)?);
    }

    ddl(&ctx, "CREATE MATERIALIZED VIEW m1 AS SELECT a, b FROM t").await?;
    ddl(&ctx, "REFRESH MATERIALIZED VIEW m1").await?;
    let definition = ctx.workspace.materialized_view("m1").context("m1")?;

    let (ok, summary) = ddl(&ctx, "DROP MATERIALIZED VIEW m1").await?;
    assert!(ok, "{summary}");

    assert!(ctx.workspace.materialized_view("m1").is_none());
    assert!(!ctx.workspace.data_in_use(&definition).await?);
    assert!(ctx.sql("SELECT * FROM m1").await.is_err());

    // the name is free again
    ddl(&ctx, "CREATE MATERIALIZED VIEW m1 AS SELECT a FROM t").await?;

    Ok(())
}

#[tokio::test]
async fn test_refresh() -> Result<()> {
    let ctx = setup().await.context("setup")?;

    let error = ddl_error(&ctx, "REFRESH MATERIALIZED VIEW nope").await?;
    assert!(error.contains("Unknown materialized view [nope]"), "{error}");

    ddl(
        &ctx,
        "CREATE MATERIALIZED VIEW m1 AS SELECT a, b FROM t WHERE a > 1",
    )
    .await?;

    let expected = [
        "+---+-------+",
        "| a | b     |",
        "+---+-------+",
        "| 2 | two   |",
        "| 3 | three |",
        "+---+-------+",
    ];

    // not refreshed yet, so this runs the defining query
    let batches = ctx.sql("SELECT a, b FROM m1").await?.collect().await?;
    assert_batches_sorted_eq!(expected, &batches);

    let before = chrono::Utc::now().timestamp_millis();
    let (ok, summary) = ddl(&ctx, "REFRESH MATERIALIZED VIEW m1").await?;
    let after = chrono::Utc::now().timestamp_millis();
    assert!(ok, "{summary}");

    let definition = ctx.workspace.materialized_view("m1").context("m1")?;
    assert!(definition.is_refreshed());
    let refreshed_at = definition.last_refresh_time().context("refresh time")?;
    assert!((before..=after).contains(&refreshed_at));

    ctx.sql("INSERT INTO t VALUES (4, 'four')")
        .await?
        .collect()
        .await?;

    // reads the materialized data, which predates the insert
    let batches = ctx.sql("SELECT a, b FROM m1").await?.collect().await?;
    assert_batches_sorted_eq!(expected, &batches);

    ddl(&ctx, "REFRESH MATERIALIZED VIEW m1").await?;
    let batches = ctx.sql("SELECT count(*) AS n FROM m1").await?.collect().await?;
    assert_batches_sorted_eq!(["+---+", "| n |", "+---+", "| 3 |", "+---+"], &batches);

    Ok(())
}

#[tokio::test]
async fn test_failed_refresh_keeps_definition() -> Result<()> {
    let ctx = setup().await.context("setup")?;

    ddl(
        &ctx,
        "CREATE MATERIALIZED VIEW m1 AS SELECT a, b FROM t WHERE a > 1",
    )
    .await?;
    ddl(&ctx, "REFRESH MATERIALIZED VIEW m1").await?;
    let refreshed = ctx.workspace.materialized_view("m1").context("m1")?;

    ctx.sql("DROP TABLE t").await?.collect().await?;

    let error = ddl_error(&ctx, "REFRESH MATERIALIZED VIEW m1").await?;
    assert!(error.contains("not found"), "{error}");

    let definition = ctx.workspace.materialized_view("m1").context("m1")?;
    assert_eq!(definition, refreshed);
    assert!(definition.is_refreshed());
    assert_eq!(definition.last_refresh_time(), refreshed.last_refresh_time());

    // the previous data is still there
    let batches = ctx.sql("SELECT a, b FROM m1").await?.collect().await?;
    assert_batches_sorted_eq!(
        [
            "+---+-------+",
            "| a | b     |",
            "+---+-------+",
            "| 2 | two   |",
            "| 3 | three |",
            "+---+-------+",
        ],
        &batches
    );

    Ok(())
}

#[tokio::test]
async fn test_view_in_another_workspace() -> Result<()> {
    let ctx = setup().await.context("setup")?;

    let dir = TempDir::new().context("create tempdir")?;
    let store = ObjectStoreViewStore::try_new(
        Arc::new(LocalFileSystem::new()),
        &dir.path().to_string_lossy(),
    )
    .context("create definition store")?;
    let ws = ctx
        .register_workspace("datafusion", "ws", Arc::new(store))
        .await
        .context("register workspace")?;

    // `t` resolves in the session's default schema, not in `ws`
    let (ok, summary) = ddl(
        &ctx,
        "CREATE MATERIALIZED VIEW ws.m AS SELECT a FROM t WHERE a > 1",
    )
    .await?;
    assert!(ok, "{summary}");
    assert!(summary.contains("datafusion.ws"), "{summary}");

    let definition = ws.materialized_view("m").context("m")?;
    assert_eq!(definition.workspace_schema_path(), ["datafusion", "public"]);
    assert!(ctx.workspace.materialized_view("m").is_none());

    let expected = ["+---+", "| a |", "+---+", "| 2 |", "| 3 |", "+---+"];

    let batches = ctx.sql("SELECT a FROM ws.m").await?.collect().await?;
    assert_batches_sorted_eq!(expected, &batches);

    ddl(&ctx, "REFRESH MATERIALIZED VIEW ws.m").await?;
    assert!(ws.materialized_view("m").context("m")?.is_refreshed());

    let batches = ctx.sql("SELECT a FROM ws.m").await?.collect().await?;
    assert_batches_sorted_eq!(expected, &batches);

    Ok(())
}

#[tokio::test]
async fn test_refresh_empty_result() -> Result<()> {
    let ctx = setup().await.context("setup")?;

    ddl(
        &ctx,
        "CREATE MATERIALIZED VIEW m1 AS SELECT a, b FROM t WHERE a > 100",
    )
    .await?;
    ddl(&ctx, "REFRESH MATERIALIZED VIEW m1").await?;

    let batches = ctx.sql("SELECT count(*) AS n FROM m1").await?.collect().await?;
    assert_batches_sorted_eq!(["+---+", "| n |", "+---+", "| 0 |", "+---+"], &batches);

    Ok(())
}

#[tokio::test]
async fn test_rewrite_end_to_end() -> Result<()> {
    let ctx = setup().await.context("setup")?;

    ddl(&ctx, "CREATE MATERIALIZED VIEW m1 AS SELECT a, b FROM t").await?;
    ddl(&ctx, "REFRESH MATERIALIZED VIEW m1").await?;

    let definition = ctx.workspace.materialized_view("m1").context("m1")?;
    let location = ctx.workspace.data_location(&definition)?;

    let df = ctx.sql("SELECT a, b FROM t").await?;
    let (tables, paths) = scans(df.logical_plan())?;
    assert_eq!(tables, vec!["m1"]);
    assert_eq!(paths, vec![location.to_string()]);

    let batches = df.collect().await?;
    assert_batches_sorted_eq!(ALL_ROWS, &batches);

    // a narrower query is answered from the view too
    let df = ctx.sql("SELECT b FROM t WHERE a >= 2").await?;
    let (tables, _) = scans(df.logical_plan())?;
    assert_eq!(tables, vec!["m1"]);
    let batches = df.collect().await?;
    assert_batches_sorted_eq!(
        ["+-------+", "| b     |", "+-------+", "| three |", "| two   |", "+-------+"],
        &batches
    );

    // rewritten queries see the data as of the last refresh
    ctx.sql("INSERT INTO t VALUES (4, 'four')")
        .await?
        .collect()
        .await?;
    let batches = ctx.sql("SELECT a, b FROM t").await?.collect().await?;
    assert_batches_sorted_eq!(ALL_ROWS, &batches);

    ctx.sql("SET materialized_views.enable_query_rewrite = false")
        .await?
        .collect()
        .await?;

    let df = ctx.sql("SELECT a, b FROM t").await?;
    let (tables, paths) = scans(df.logical_plan())?;
    assert_eq!(tables, vec!["t"]);
    assert!(paths.is_empty());
    assert_eq!(df.collect().await?.iter().map(|b| b.num_rows()).sum::<usize>(), 4);

    Ok(())
}

#[tokio::test]
async fn test_rewrite_is_noop_without_candidates() -> Result<()> {
    let ctx = setup().await.context("setup")?;
    let rewriter = MaterializedViewRewriter::default();

    let plan = ctx
        .session()
        .sql("SELECT a, b FROM t")
        .await?
        .into_optimized_plan()?;
    let state = ctx.session().state();

    assert!(rewriter.candidates(&state)?.is_empty());
    assert_eq!(rewriter.rewrite(plan.clone(), &state).await?, plan);

    // defined but never refreshed
    ddl(&ctx, "CREATE MATERIALIZED VIEW m1 AS SELECT a, b FROM t").await?;
    let candidates = rewriter.candidates(&state)?;
    assert_eq!(candidates.len(), 1);
    assert!(!candidates[0].refreshed);
    assert_eq!(rewriter.rewrite(plan.clone(), &state).await?, plan);

    // refreshed, but rewriting is turned off
    ddl(&ctx, "REFRESH MATERIALIZED VIEW m1").await?;
    ctx.sql("SET materialized_views.enable_query_rewrite = false")
        .await?
        .collect()
        .await?;
    let state = ctx.session().state();
    assert_eq!(rewriter.rewrite(plan.clone(), &state).await?, plan);

    Ok(())
}

#[tokio::test]
async fn test_bad_candidate_is_skipped() -> Result<()> {
    let ctx = setup().await.context("setup")?;

    ctx.sql("CREATE TABLE u (a INT, b VARCHAR)")
        .await?
        .collect()
        .await?;
    ddl(&ctx, "CREATE MATERIALIZED VIEW aa_bad AS SELECT a, b FROM u").await?;
    ddl(&ctx, "REFRESH MATERIALIZED VIEW aa_bad").await?;
    ctx.sql("DROP TABLE u").await?.collect().await?;

    ddl(&ctx, "CREATE MATERIALIZED VIEW bb_good AS SELECT a, b FROM t").await?;
    ddl(&ctx, "REFRESH MATERIALIZED VIEW bb_good").await?;

    let candidates = MaterializedViewRewriter::default().candidates(&ctx.session().state())?;
    assert_eq!(
        candidates
            .iter()
            .map(|c| format!("{}.{}", c.schema_full_path, c.definition.name()))
            .collect::<Vec<_>>(),
        vec!["datafusion.public.aa_bad", "datafusion.public.bb_good"]
    );

    let df = ctx.sql("SELECT a, b FROM t").await?;
    let (tables, _) = scans(df.logical_plan())?;
    assert_eq!(tables, vec!["bb_good"]);
    assert_batches_sorted_eq!(ALL_ROWS, &df.collect().await?);

    Ok(())
}
