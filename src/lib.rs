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

#![deny(missing_docs)]

//! `datafusion-mv-workspace` adds persistent materialized views to DataFusion.
//!
//! Views are defined, dropped and refreshed with SQL DDL, stored as JSON documents next to their
//! Parquet data, and resolved like any other table. Queries over the tables a refreshed view is
//! defined on can be rewritten to read the view's data instead.

use datafusion_common::{config::ConfigExtension, extensions_options};

/// Definitions, storage and DDL for materialized views.
///
/// Views live in schemas implementing [`MaterializedViewSchema`](materialized::MaterializedViewSchema),
/// which must be registered with [`register_materialized_view_schema`](materialized::register_materialized_view_schema)
/// to be found by DDL and query rewriting.
/// [`WorkspaceSchemaProvider`](materialized::schema::WorkspaceSchemaProvider) is registered by default.
pub mod materialized;

/// Query rewriting, which answers queries from materialized views where possible.
pub mod rewrite;

/// A session that understands materialized view DDL and rewrites queries.
pub mod context;

extensions_options! {
    /// Session options for materialized views, under the `materialized_views` prefix.
    pub struct MaterializedViewOptions {
        /// Whether queries may be rewritten to read from refreshed materialized views.
        pub enable_query_rewrite: bool, default = true
    }
}

impl ConfigExtension for MaterializedViewOptions {
    const PREFIX: &'static str = "materialized_views";
}
