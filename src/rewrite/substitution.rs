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

use datafusion_common::{
    tree_node::{Transformed, TreeNode, TreeNodeRecursion},
    Result,
};
use datafusion_expr::LogicalPlan;

use super::normal_form::SpjNormalForm;

/// Finds a part of a query that a materialized view can answer.
pub trait PlanSubstitution: Debug + Send + Sync {
    /// If some sub-tree of `query` can be computed from the output of `target`,
    /// return `query` with that sub-tree computed from `replacement` instead.
    ///
    /// `replacement` must produce the same columns as `target`, in the same order.
    /// Returns `None` if nothing in `query` matches.
    fn attempt_substitution(
        &self,
        target: &LogicalPlan,
        replacement: &LogicalPlan,
        query: &LogicalPlan,
    ) -> Result<Option<LogicalPlan>>;
}

/// Substitution by comparing select-project-join normal forms.
///
/// The query is searched top-down, so the largest matching sub-tree is replaced.
#[derive(Debug, Default)]
pub struct SpjSubstitution;

impl PlanSubstitution for SpjSubstitution {
    fn attempt_substitution(
        &self,
        target: &LogicalPlan,
        replacement: &LogicalPlan,
        query: &LogicalPlan,
    ) -> Result<Option<LogicalPlan>> {
        let target = SpjNormalForm::new(target)?;

        let result = query.clone().transform_down(|node| {
            // anything that isn't select-project-join just doesn't match
            let rewritten = match SpjNormalForm::new(&node) {
                Ok(normal_form) => normal_form.rewrite_from(&target, replacement.clone())?,
                Err(e) => {
                    log::trace!("not in normal form: {e}");
                    None
                }
            };

            Ok(match rewritten {
                Some(plan) => Transformed::new(plan, true, TreeNodeRecursion::Stop),
                None => Transformed::no(node),
            })
        })?;

        if !result.transformed {
            return Ok(None);
        }

        // ancestors of the replaced sub-tree may have cached a schema with different nullability
        result
            .data
            .transform_up(|node| node.recompute_schema().map(Transformed::yes))
            .map(|rewritten| Some(rewritten.data))
    }
}
