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

Select-project-join view matching, following
[Goldstein & Larson, "Optimizing Queries Using Materialized Views"](https://courses.cs.washington.edu/courses/cse591d/01sp/opt_views.pdf).

A plan built from table scans, filters, projections and inner joins is summarized by an [`SpjNormalForm`]:
its output expressions written directly against base table columns, plus a summary of its filters:

* column equivalence classes, from `a = b` predicates and join keys,
* a value range per equivalence class, from comparisons against literals,
* residual predicates, which are everything else.

A query can be answered from a materialized view when

1. every equivalence class of the view is contained in one of the query's (equijoin subsumption),
2. every range of the query is contained in the view's range for the same class (range subsumption),
3. every residual of the view also appears in the query (residual subsumption), and
4. the query's output expressions and compensating filters only need the view's output columns.

Passing the subsumption tests yields the compensating filters that restrict the view's rows
to the query's: equivalences and ranges the view doesn't enforce, and leftover residuals.

For example, with the view

```sql
SELECT l_orderkey, o_custkey, l_partkey, l_shipdate, o_orderdate,
       l_quantity * l_extendedprice AS gross_revenue
FROM example
WHERE l_orderkey = o_orderkey AND l_partkey = p_partkey
  AND p_partkey >= 150 AND o_custkey >= 50 AND o_custkey <= 500
  AND p_name LIKE '%abc%'
```

the query

```sql
SELECT l_orderkey, o_custkey, l_partkey, l_quantity * l_extendedprice
FROM example
WHERE l_orderkey = o_orderkey AND l_partkey = p_partkey
  AND l_partkey >= 150 AND l_partkey <= 160 AND o_custkey = 123
  AND o_orderdate = l_shipdate AND p_name LIKE '%abc%'
  AND l_quantity * l_extendedprice > 100
```

is rewritten to

```text
Projection: mv.l_orderkey AS l_orderkey, mv.o_custkey AS o_custkey, mv.l_partkey AS l_partkey, mv.gross_revenue AS example.l_quantity * example.l_extendedprice
  Filter: mv.o_orderdate = mv.l_shipdate AND mv.l_partkey >= Int32(150) AND mv.l_partkey <= Int32(160) AND mv.o_custkey = Int32(123) AND mv.gross_revenue > Float64(100)
    TableScan: mv
```

*/

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::Arc,
};

use datafusion_common::{
    plan_err,
    tree_node::{Transformed, TransformedResult, TreeNode, TreeNodeRecursion, TreeNodeRewriter},
    Column, DFSchema, DataFusionError, ExprSchema, Result, ScalarValue, TableReference,
};
use datafusion_expr::{
    interval_arithmetic::{satisfy_greater, Interval},
    lit,
    utils::split_conjunction,
    BinaryExpr, Expr, JoinType, LogicalPlan, LogicalPlanBuilder, Operator, TableScan,
};
use itertools::Itertools;

/// A normalized representation of a plan containing only Select/Project/Join in the relational algebra sense.
/// In DataFusion terminology this also includes Filter nodes. Only inner joins are supported.
#[derive(Debug, Clone)]
pub struct SpjNormalForm {
    output_schema: Arc<DFSchema>,
    output_exprs: Vec<Expr>,
    referenced_tables: Vec<TableReference>,
    predicate: Predicate,
}

/// Replaces sub-expressions that are outputs of a view with the matching column
/// of the plan standing in for the view.
struct ViewOutputRewriter<'a> {
    view_exprs: &'a [Expr],
    replacement_columns: &'a [Column],
}

impl TreeNodeRewriter for ViewOutputRewriter<'_> {
    type Node = Expr;

    fn f_down(&mut self, node: Self::Node) -> Result<Transformed<Self::Node>> {
        Ok(match self.view_exprs.iter().position(|x| x == &node) {
            Some(idx) => Transformed::new(
                Expr::Column(self.replacement_columns[idx].clone()),
                true,
                TreeNodeRecursion::Jump,
            ),
            None => Transformed::no(node),
        })
    }
}

impl SpjNormalForm {
    /// Schema of data output by this plan.
    pub fn output_schema(&self) -> &Arc<DFSchema> {
        &self.output_schema
    }

    /// Expressions output by this plan, in terms of base table columns.
    /// Filters are not included, so evaluating these over the tables alone yields a superset of the rows.
    pub fn output_exprs(&self) -> &[Expr] {
        &self.output_exprs
    }

    /// All tables referenced in this plan.
    pub fn referenced_tables(&self) -> &[TableReference] {
        &self.referenced_tables
    }

    /// Analyze an existing `LogicalPlan` and rewrite it in select-project-join normal form.
    pub fn new(original_plan: &LogicalPlan) -> Result<Self> {
        let predicate = Predicate::new(original_plan)?;
        let output_exprs = get_output_exprs(original_plan)?
            .into_iter()
            .map(|expr| predicate.normalize_expr(expr))
            .collect::<Result<Vec<_>>>()?;

        let mut referenced_tables = vec![];
        original_plan.apply(|plan| {
            if let LogicalPlan::TableScan(scan) = plan {
                referenced_tables.push(scan.table_name.clone());
            }

            Ok(TreeNodeRecursion::Continue)
        })?;

        Ok(Self {
            output_schema: Arc::clone(original_plan.schema()),
            output_exprs,
            referenced_tables,
            predicate,
        })
    }

    /// Rewrite this plan as a selection and projection on top of `replacement`,
    /// a plan whose output matches `view` column for column.
    ///
    /// Returns `None` if this plan can't be answered from `view`.
    pub fn rewrite_from(
        &self,
        view: &Self,
        replacement: LogicalPlan,
    ) -> Result<Option<LogicalPlan>> {
        // any other table in the view would multiply or filter its rows
        if self.referenced_tables.iter().counts() != view.referenced_tables.iter().counts() {
            return Ok(None);
        }

        let replacement_columns = replacement.schema().columns();
        if replacement_columns.len() != view.output_exprs.len() {
            return plan_err!(
                "replacement plan has {} columns but the view outputs {}",
                replacement_columns.len(),
                view.output_exprs.len()
            );
        }

        let mut rewriter = ViewOutputRewriter {
            view_exprs: &view.output_exprs,
            replacement_columns: &replacement_columns,
        };
        // once rewritten, an expression may only reference the replacement's columns
        let only_replacement_columns = |expr: &Expr| {
            expr.column_refs()
                .iter()
                .all(|c| replacement_columns.contains(c))
        };

        let mut new_output_exprs = Vec::with_capacity(self.output_exprs.len());
        for (output_expr, column) in self.output_exprs.iter().zip(self.output_schema.columns()) {
            let new_output_expr = view
                .predicate
                .normalize_expr(output_expr.clone())?
                .rewrite(&mut rewriter)?
                .data;

            if !only_replacement_columns(&new_output_expr) {
                return Ok(None);
            }

            new_output_exprs.push(new_output_expr.alias_qualified(column.relation, column.name));
        }

        log::trace!("passed output rewrite");

        // Passing all three tests means our rows are a subset of the view's,
        // given the compensating filters.
        let Some(equijoin_filters) = self.predicate.equijoin_subsumption_test(&view.predicate)
        else {
            return Ok(None);
        };
        let Some(range_filters) = self.predicate.range_subsumption_test(&view.predicate)? else {
            return Ok(None);
        };
        let Some(residual_filters) = self.predicate.residual_subsumption_test(&view.predicate)?
        else {
            return Ok(None);
        };

        log::trace!("passed subsumption tests");

        let all_filters = equijoin_filters
            .into_iter()
            .chain(range_filters)
            .chain(residual_filters)
            .map(|expr| expr.rewrite(&mut rewriter).data())
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .reduce(|a, b| a.and(b));

        if all_filters
            .as_ref()
            .is_some_and(|expr| !only_replacement_columns(expr))
        {
            return Ok(None);
        }

        let mut builder = LogicalPlanBuilder::from(replacement);

        if let Some(filter) = all_filters {
            builder = builder.filter(filter)?;
        }

        builder.project(new_output_exprs)?.build().map(Some)
    }
}

/// Stores information on filters from a Select-Project-Join plan.
#[derive(Debug, Clone)]
struct Predicate {
    /// Full table schema, including all possible columns.
    schema: DFSchema,
    /// List of column equivalence classes.
    eq_classes: Vec<ColumnEquivalenceClass>,
    /// Reverse lookup by eq class elements
    eq_class_idx_by_column: HashMap<Column, usize>,
    /// Stores (possibly empty) intervals describing each equivalence class.
    ranges_by_equivalence_class: Vec<Option<Interval>>,
    /// Filter expressions that aren't column equality predicates or range filters.
    residuals: HashSet<Expr>,
}

impl Predicate {
    fn new(plan: &LogicalPlan) -> Result<Self> {
        let mut new = Self {
            schema: DFSchema::empty(),
            eq_classes: vec![],
            eq_class_idx_by_column: HashMap::default(),
            ranges_by_equivalence_class: vec![],
            residuals: HashSet::new(),
        };

        // Every column of every scanned table starts out in its own class
        plan.apply(|plan| {
            if let LogicalPlan::TableScan(scan) = plan {
                let table_schema = DFSchema::try_from_qualified_schema(
                    scan.table_name.clone(),
                    scan.source.schema().as_ref(),
                )?;

                for (table_ref, field) in table_schema.iter() {
                    let column = Column::new(table_ref.cloned(), field.name());
                    new.eq_class_idx_by_column
                        .insert(column.clone(), new.eq_classes.len());
                    new.eq_classes
                        .push(ColumnEquivalenceClass::new_singleton(column));
                    new.ranges_by_equivalence_class
                        .push(Some(Interval::make_unbounded(field.data_type())?));
                }

                new.schema = if new.schema.fields().is_empty() {
                    table_schema
                } else {
                    new.schema.join(&table_schema)?
                };
            }

            Ok(TreeNodeRecursion::Continue)
        })?;

        // Collect any filters
        plan.apply(|plan| {
            let conjuncts = match plan {
                LogicalPlan::TableScan(scan) => scan.filters.clone(),
                LogicalPlan::Filter(filter) => vec![filter.predicate.clone()],
                LogicalPlan::Join(join) if join.join_type == JoinType::Inner => join
                    .on
                    .iter()
                    .map(|(left, right)| left.clone().eq(right.clone()))
                    .chain(join.filter.clone())
                    .collect_vec(),
                LogicalPlan::Join(join) => {
                    return plan_err!("{} joins are not supported", join.join_type)
                }
                LogicalPlan::Projection(_) => vec![],
                _ => {
                    return plan_err!("unsupported logical plan: {}", plan.display());
                }
            };

            for expr in conjuncts.iter().flat_map(split_conjunction) {
                new.insert_conjunct(expr)?;
            }

            Ok(TreeNodeRecursion::Continue)
        })?;

        Ok(new)
    }

    fn class_for_column(&self, col: &Column) -> Option<&ColumnEquivalenceClass> {
        self.eq_class_idx_by_column
            .get(col)
            .and_then(|&idx| self.eq_classes.get(idx))
    }

    /// Add a new column equivalence
    fn add_equivalence(&mut self, c1: &Column, c2: &Column) -> Result<()> {
        match (
            self.eq_class_idx_by_column.get(c1).copied(),
            self.eq_class_idx_by_column.get(c2).copied(),
        ) {
            (None, None) => {
                let idx = self.eq_classes.len();
                self.eq_classes
                    .push(ColumnEquivalenceClass::new([c1.clone(), c2.clone()]));
                self.eq_class_idx_by_column.insert(c1.clone(), idx);
                self.eq_class_idx_by_column.insert(c2.clone(), idx);
                self.ranges_by_equivalence_class
                    .push(Some(Interval::make_unbounded(
                        self.schema.field_from_column(c1)?.data_type(),
                    )?));
            }

            (None, Some(idx)) => {
                self.eq_classes[idx].columns.insert(c1.clone());
                self.eq_class_idx_by_column.insert(c1.clone(), idx);
            }
            (Some(idx), None) => {
                self.eq_classes[idx].columns.insert(c2.clone());
                self.eq_class_idx_by_column.insert(c2.clone(), idx);
            }
            (Some(i), Some(j)) if i == j => {}
            (Some(i), Some(j)) => {
                // Keep the lower index so fewer entries move
                let (i, j) = if i < j { (i, j) } else { (j, i) };

                let moved = self.eq_classes.remove(j).columns;
                self.eq_classes[i].columns.extend(moved.iter().cloned());
                for idx in self.eq_class_idx_by_column.values_mut() {
                    if *idx > j {
                        *idx -= 1;
                    }
                }
                for column in moved {
                    self.eq_class_idx_by_column.insert(column, i);
                }

                // Both classes hold the same values, so the merged range is the intersection
                let removed = self.ranges_by_equivalence_class.remove(j);
                self.ranges_by_equivalence_class[i] = self.ranges_by_equivalence_class[i]
                    .clone()
                    .zip(removed)
                    .and_then(|(range, other_range)| range.intersect(other_range).transpose())
                    .transpose()?;
            }
        }

        Ok(())
    }

    /// Narrow the range of a column's equivalence class
    fn add_range(&mut self, c: &Column, op: &Operator, value: &ScalarValue) -> Result<()> {
        let value = value.cast_to(self.schema.data_type(c)?)?;
        let idx = *self.eq_class_idx_by_column.get(c).ok_or_else(|| {
            DataFusionError::Plan(format!("column {c} not found in equivalence classes"))
        })?;
        let range = self
            .ranges_by_equivalence_class
            .get_mut(idx)
            .ok_or_else(|| DataFusionError::Internal(format!("no range for column {c}")))?;

        let new_range = match op {
            Operator::Eq => Interval::try_new(value.clone(), value.clone()),
            Operator::LtEq => {
                Interval::try_new(ScalarValue::try_from(value.data_type())?, value.clone())
            }
            Operator::GtEq => {
                Interval::try_new(value.clone(), ScalarValue::try_from(value.data_type())?)
            }
            // Intervals are closed. satisfy_greater is the only public way
            // to step past a bound, which turns < and > into closed ranges.
            Operator::Lt => Ok(
                match satisfy_greater(
                    &Interval::try_new(value.clone(), value.clone())?,
                    &Interval::make_unbounded(&value.data_type())?,
                    true,
                )? {
                    Some((_, range)) => range,
                    None => {
                        *range = None;
                        return Ok(());
                    }
                },
            ),
            Operator::Gt => Ok(
                match satisfy_greater(
                    &Interval::make_unbounded(&value.data_type())?,
                    &Interval::try_new(value.clone(), value.clone())?,
                    true,
                )? {
                    Some((range, _)) => range,
                    None => {
                        *range = None;
                        return Ok(());
                    }
                },
            ),
            _ => plan_err!("unsupported range operator {op}"),
        }?;

        *range = match range {
            None => None,
            Some(range) => range.intersect(new_range)?,
        };

        Ok(())
    }

    /// Add a term T_i of a conjunction T_1 AND T_2 AND ... to our collection of filters.
    fn insert_conjunct(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::BinaryExpr(BinaryExpr { left, op, right }) => {
                self.insert_binary_expr(left, *op, right)?;
            }
            Expr::Not(e) => match e.as_ref() {
                Expr::BinaryExpr(BinaryExpr { left, op, right }) => {
                    if let Some(negated) = op.negate() {
                        self.insert_binary_expr(left, negated, right)?;
                    } else {
                        self.residuals.insert(expr.clone());
                    }
                }
                _ => {
                    self.residuals.insert(expr.clone());
                }
            },
            _ => {
                self.residuals.insert(expr.clone());
            }
        }

        Ok(())
    }

    fn insert_binary_expr(&mut self, left: &Expr, op: Operator, right: &Expr) -> Result<()> {
        match (left, op, right) {
            (Expr::Column(c), op, Expr::Literal(v)) => match self.add_range(c, &op, v) {
                Ok(()) => return Ok(()),
                // not every comparison is a usable range; keep it as a residual
                Err(e) => log::debug!("failed to add range filter: {e}"),
            },
            (Expr::Literal(_), op, Expr::Column(_)) => {
                if let Some(swapped) = op.swap() {
                    return self.insert_binary_expr(right, swapped, left);
                }
            }
            (Expr::Column(c1), Operator::Eq, Expr::Column(c2)) => {
                return self.add_equivalence(c1, c2);
            }
            _ => {}
        }

        self.residuals.insert(Expr::BinaryExpr(BinaryExpr {
            left: Box::new(left.clone()),
            op,
            right: Box::new(right.clone()),
        }));

        Ok(())
    }

    /// Test that every column equivalence class of `other` is contained in one of ours.
    /// Returns equalities we enforce but `other` doesn't.
    fn equijoin_subsumption_test(&self, other: &Self) -> Option<Vec<Expr>> {
        let mut new_equivalences = vec![];
        for other_class in &other.eq_classes {
            let (representative, eq_class) = match other_class
                .columns
                .iter()
                .find_map(|c| self.class_for_column(c).map(|class| (c, class)))
            {
                // A trivial class of columns we never see is fine, since we may be
                // a subset of `other`. A nontrivial one would need a compensating
                // filter on columns we don't have.
                None if other_class.columns.len() == 1 => continue,
                Some(found) => found,
                None => return None,
            };

            if !other_class.columns.is_subset(&eq_class.columns) {
                return None;
            }

            for column in eq_class.columns.difference(&other_class.columns) {
                new_equivalences
                    .push(Expr::Column(representative.clone()).eq(Expr::Column(column.clone())))
            }
        }

        log::trace!("passed equijoin subsumption test");

        Some(new_equivalences)
    }

    /// Test that each of our ranges is contained in the corresponding range of `other`.
    /// Returns range filters that narrow `other` down to ours.
    fn range_subsumption_test(&self, other: &Self) -> Result<Option<Vec<Expr>>> {
        let mut extra_range_filters = vec![];
        for (eq_class, range) in self
            .eq_classes
            .iter()
            .zip(self.ranges_by_equivalence_class.iter())
        {
            let Some(range) = range else {
                // unsatisfiable, so contained in anything
                extra_range_filters.push(lit(false));
                continue;
            };

            let Some((other_column, other_range)) = eq_class.columns.iter().find_map(|c| {
                other.eq_class_idx_by_column.get(c).and_then(|&idx| {
                    other.eq_classes[idx]
                        .columns
                        .first()
                        .zip(other.ranges_by_equivalence_class[idx].as_ref())
                })
            }) else {
                return Ok(None);
            };

            if other_range.contains(range)? != Interval::CERTAINLY_TRUE {
                return Ok(None);
            }

            if range.contains(other_range)? == Interval::CERTAINLY_TRUE {
                continue;
            }

            let column = || Box::new(Expr::Column(other_column.clone()));
            let bound = |op, value: &ScalarValue| {
                Expr::BinaryExpr(BinaryExpr {
                    left: column(),
                    op,
                    right: Box::new(Expr::Literal(value.clone())),
                })
            };

            if !range.lower().is_null() && range.lower() == range.upper() {
                // keep point ranges as equalities; some DataFusion rules only recognize `col = val`
                extra_range_filters.push(bound(Operator::Eq, range.lower()));
            } else {
                if !range.lower().is_null() {
                    extra_range_filters.push(bound(Operator::GtEq, range.lower()));
                }
                if !range.upper().is_null() {
                    extra_range_filters.push(bound(Operator::LtEq, range.upper()));
                }
            }
        }

        log::trace!("passed range subsumption test");

        Ok(Some(extra_range_filters))
    }

    /// Test that every residual filter of `other` (one that is neither an equivalence nor
    /// a range on a column, like `x * y > 100`) is also one of ours.
    /// Returns our residuals that `other` lacks.
    fn residual_subsumption_test(&self, other: &Self) -> Result<Option<Vec<Expr>>> {
        let [self_residuals, other_residuals] = [&self.residuals, &other.residuals].map(|set| {
            set.iter()
                .map(|r| self.normalize_expr(r.clone()))
                .collect::<Result<HashSet<Expr>>>()
        });
        let (self_residuals, other_residuals) = (self_residuals?, other_residuals?);

        if !self_residuals.is_superset(&other_residuals) {
            return Ok(None);
        }

        log::trace!("passed residual subsumption test");

        Ok(Some(
            self_residuals
                .difference(&other_residuals)
                .cloned()
                .collect_vec(),
        ))
    }

    /// Rewrite an expression in terms of the representatives of our equivalence classes.
    fn normalize_expr(&self, e: Expr) -> Result<Expr> {
        e.transform(|e| {
            let c = match e {
                Expr::Column(c) => c,
                Expr::Alias(alias) => return Ok(Transformed::yes(*alias.expr)),
                _ => return Ok(Transformed::no(e)),
            };

            match self
                .class_for_column(&c)
                .and_then(|eq_class| eq_class.columns.first())
            {
                Some(representative) => Ok(Transformed::yes(Expr::Column(representative.clone()))),
                None => Ok(Transformed::no(Expr::Column(c))),
            }
        })
        .data()
    }
}

/// Columns that are known to hold equal values.
/// The first column in order is the class representative.
#[derive(Debug, Clone, Default)]
struct ColumnEquivalenceClass {
    columns: BTreeSet<Column>,
}

impl ColumnEquivalenceClass {
    fn new(columns: impl IntoIterator<Item = Column>) -> Self {
        Self {
            columns: BTreeSet::from_iter(columns),
        }
    }

    fn new_singleton(column: Column) -> Self {
        Self {
            columns: BTreeSet::from([column]),
        }
    }
}

/// For each field in the plan's schema, the expression that defines it,
/// written directly against table columns rather than subqueries or child plans.
fn get_output_exprs(plan: &LogicalPlan) -> Result<Vec<Expr>> {
    use datafusion_expr::logical_plan::Projection;

    let output_exprs = match plan {
        // doesn't change the schema or the definitions
        LogicalPlan::Filter(filter) => return get_output_exprs(&filter.input),
        LogicalPlan::Projection(Projection { expr, .. }) => Ok(expr.clone()),
        LogicalPlan::TableScan(table_scan) => {
            return Ok(get_table_scan_columns(table_scan)?
                .into_iter()
                .map(Expr::Column)
                .collect())
        }
        LogicalPlan::Join(join) => Ok(join
            .left
            .schema()
            .columns()
            .into_iter()
            .chain(join.right.schema().columns())
            .map(Expr::Column)
            .collect_vec()),
        _ => Err(DataFusionError::NotImplemented(format!(
            "Logical plan not supported: {}",
            plan.display()
        ))),
    }?;

    flatten_exprs(output_exprs, plan)
}

/// Rewrite columns that refer to the children of `parent` into the child's own output expressions.
fn flatten_exprs(exprs: Vec<Expr>, parent: &LogicalPlan) -> Result<Vec<Expr>> {
    if matches!(parent, LogicalPlan::TableScan(_)) {
        return Ok(exprs);
    }

    let schemas = parent
        .inputs()
        .iter()
        .map(|input| input.schema().as_ref())
        .collect_vec();
    let using_columns = parent.using_columns()?;

    let output_exprs_by_child = parent
        .inputs()
        .into_iter()
        .map(get_output_exprs)
        .collect::<Result<Vec<_>>>()?;

    exprs
        .into_iter()
        .map(|expr| {
            expr.transform_up(|e| match e {
                Expr::Column(col) => {
                    let col = col
                        .normalize_with_schemas_and_ambiguity_check(&[&schemas], &using_columns)?;

                    // USING columns may match more than one child; any of them will do
                    let (child_idx, expr_idx) = schemas
                        .iter()
                        .enumerate()
                        .find_map(|(schema_idx, schema)| {
                            Some(schema_idx).zip(schema.maybe_index_of_column(&col))
                        })
                        .ok_or_else(|| {
                            DataFusionError::Internal(format!(
                                "column {col} not found in any input of {}",
                                parent.display()
                            ))
                        })?;

                    Ok(Transformed::yes(
                        output_exprs_by_child[child_idx][expr_idx].clone(),
                    ))
                }
                _ => Ok(Transformed::no(e)),
            })
            .data()
        })
        .collect()
}

/// Return the columns output by this [`TableScan`].
fn get_table_scan_columns(scan: &TableScan) -> Result<Vec<Column>> {
    let fields = {
        let mut schema = scan.source.schema().as_ref().clone();
        if let Some(ref p) = scan.projection {
            schema = schema.project(p)?;
        }
        schema.fields
    };

    Ok(fields
        .into_iter()
        .map(|field| Column::new(Some(scan.table_name.to_owned()), field.name()))
        .collect())
}
