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

use datafusion::catalog::{CatalogProviderList, SchemaProvider};
use datafusion_common::{DataFusionError, Result};
use itertools::Itertools;

/// List every schema in the catalog list along with its `catalog.schema` path.
///
/// The order is deterministic: `default_catalog` comes first, then the remaining
/// catalogs by name. Schemas within a catalog are sorted by name.
pub fn list_schemas(
    catalog_list: &dyn CatalogProviderList,
    default_catalog: &str,
) -> Result<Vec<(String, Arc<dyn SchemaProvider>)>> {
    let catalog_names = catalog_list
        .catalog_names()
        .into_iter()
        .sorted_by_key(|name| (name != default_catalog, name.clone()))
        .collect_vec();

    let catalogs_by_name = catalog_names
        .into_iter()
        .map(|catalog_name| {
            catalog_list
                .catalog(&catalog_name)
                .ok_or(DataFusionError::Internal(format!(
                    "could not find named catalog: {catalog_name}"
                )))
                .map(|catalog| (catalog, catalog_name))
        })
        .collect::<Result<Vec<_>>>()?;

    catalogs_by_name
        .into_iter()
        .flat_map(|(catalog, catalog_name)| {
            catalog
                .schema_names()
                .into_iter()
                .sorted()
                .map(move |schema_name| {
                    catalog
                        .schema(&schema_name)
                        .ok_or(DataFusionError::Internal(format!(
                            "could not find named schema: {catalog_name}.{schema_name}"
                        )))
                        .map(|schema| (format!("{catalog_name}.{schema_name}"), schema))
                })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use datafusion::{
        catalog::{CatalogProvider, MemoryCatalogProvider, MemorySchemaProvider},
        prelude::SessionContext,
    };
    use datafusion_common::Result;
    use itertools::Itertools;

    use super::list_schemas;

    #[test]
    fn test_default_catalog_first() -> Result<()> {
        let ctx = SessionContext::new();

        for catalog_name in ["aaa", "zzz"] {
            let catalog = MemoryCatalogProvider::new();
            catalog.register_schema("b", Arc::new(MemorySchemaProvider::new()))?;
            catalog.register_schema("a", Arc::new(MemorySchemaProvider::new()))?;
            ctx.register_catalog(catalog_name, Arc::new(catalog));
        }

        let paths = list_schemas(ctx.state().catalog_list().as_ref(), "datafusion")?
            .into_iter()
            .map(|(path, _)| path)
            .collect_vec();

        assert_eq!(
            paths,
            vec![
                "datafusion.public",
                "aaa.a",
                "aaa.b",
                "zzz.a",
                "zzz.b"
            ]
        );

        Ok(())
    }
}
