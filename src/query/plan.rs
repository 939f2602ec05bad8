//! Query plans
//!
//! A plan is a tree of [`PlanNode`]s rooted at the record scan. Each stage
//! estimates its output from the rows the previous stage produced:
//! - a group scope keeps roughly 30%
//! - each WHERE filter keeps roughly half
//! - GROUP BY keeps roughly a tenth, ungrouped aggregates yield one row
//! - ORDER BY costs `n log2 n` and keeps every row
//! - LIMIT caps the count

use crate::query::ast::{Query, ScopeType};
use crate::query::result::Cell;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

/// Operation performed by a plan node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanNodeType {
    Scan,
    Filter,
    Aggregate,
    Sort,
    Limit,
}

impl fmt::Display for PlanNodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scan => write!(f, "scan"),
            Self::Filter => write!(f, "filter"),
            Self::Aggregate => write!(f, "aggregate"),
            Self::Sort => write!(f, "sort"),
            Self::Limit => write!(f, "limit"),
        }
    }
}

/// One stage of a query plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanNode {
    pub node_type: PlanNodeType,
    /// Estimated cost in record visits
    pub cost: f64,
    /// Estimated output rows
    pub rows: usize,
    /// Output columns
    pub width: usize,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PlanNode>,
}

impl PlanNode {
    fn new(node_type: PlanNodeType, cost: f64, rows: usize, width: usize) -> Self {
        Self {
            node_type,
            cost,
            rows,
            width,
            details: serde_json::Value::Null,
            children: Vec::new(),
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Estimate a plan for `query` over `total_rows` records
    pub fn for_query(query: &Query, total_rows: usize) -> Self {
        let width = (query.select.columns.len() + query.select.aggregates.len()).max(1);

        let mut root = PlanNode::new(PlanNodeType::Scan, total_rows as f64, total_rows, width)
            .with_details(json!({ "scope": query.from.scope.label() }));

        // Stages hang off the deepest node so the tree reads top-down
        let mut stages = Vec::new();
        let mut rows = total_rows;

        let scope = &query.from.scope;
        if let (ScopeType::Group, Some(group)) = (scope.scope_type, &scope.value) {
            let cost = rows as f64 * 0.1;
            rows = rows * 3 / 10;
            stages.push(
                PlanNode::new(PlanNodeType::Filter, cost, rows, width)
                    .with_details(json!({ "scope": group })),
            );
        }

        let filters = query.filters();
        if !filters.is_empty() {
            let cost = rows as f64 * 0.2;
            rows = (rows as f64 * 0.5f64.powi(filters.len() as i32)).floor() as usize;
            stages.push(
                PlanNode::new(PlanNodeType::Filter, cost, rows, width)
                    .with_details(json!({ "filters": filters.len() })),
            );
        }

        if query.is_aggregate() {
            let cost = rows as f64 * 0.5;
            let group_by: Vec<&str> = query
                .group_by
                .iter()
                .flat_map(|g| g.columns.iter().map(String::as_str))
                .collect();
            rows = if group_by.is_empty() { 1 } else { rows / 10 };
            let aggregations: Vec<String> = query
                .select
                .aggregates
                .iter()
                .map(|a| a.header())
                .collect();
            stages.push(
                PlanNode::new(PlanNodeType::Aggregate, cost, rows, width)
                    .with_details(json!({ "groupBy": group_by, "aggregations": aggregations })),
            );
        }

        if let Some(order_by) = &query.order_by {
            let n = rows as f64;
            let cost = if rows < 2 { 0.0 } else { n * n.log2() };
            let keys: Vec<serde_json::Value> = order_by
                .columns
                .iter()
                .map(|k| json!({ "column": k.column, "direction": k.direction.to_string() }))
                .collect();
            stages.push(
                PlanNode::new(PlanNodeType::Sort, cost, rows, width)
                    .with_details(json!({ "orderBy": keys })),
            );
        }

        if let Some(limit) = &query.limit {
            rows = rows.min(limit.value);
            stages.push(
                PlanNode::new(PlanNodeType::Limit, 1.0, rows, width)
                    .with_details(json!({ "limit": limit.value })),
            );
        }

        // Nest in reverse so each stage is the child of the one before it
        let mut chain: Option<PlanNode> = None;
        for mut stage in stages.into_iter().rev() {
            if let Some(child) = chain.take() {
                stage.children.push(child);
            }
            chain = Some(stage);
        }
        if let Some(chain) = chain {
            root.children.push(chain);
        }

        root
    }

    /// Estimated output of the whole plan
    pub fn estimated_rows(&self) -> usize {
        self.children
            .last()
            .map(PlanNode::estimated_rows)
            .unwrap_or(self.rows)
    }

    /// Sum of the cost of every node
    pub fn total_cost(&self) -> f64 {
        self.cost + self.children.iter().map(PlanNode::total_cost).sum::<f64>()
    }

    /// Number of nodes in the tree
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(PlanNode::node_count).sum::<usize>()
    }

    /// Flatten into explain rows: operation indented by depth, cost, rows and
    /// JSON details
    pub fn explain_rows(&self) -> Vec<Vec<Cell>> {
        let mut rows = Vec::with_capacity(self.node_count());
        self.collect_rows(0, &mut rows);
        rows
    }

    fn collect_rows(&self, depth: usize, out: &mut Vec<Vec<Cell>>) {
        let details = if self.details.is_null() {
            String::new()
        } else {
            self.details.to_string()
        };

        out.push(vec![
            Cell::Text(format!("{}{}", "  ".repeat(depth), self.node_type)),
            Cell::Number((self.cost * 100.0).round() / 100.0),
            Cell::Number(self.rows as f64),
            Cell::Text(details),
        ]);

        for child in &self.children {
            child.collect_rows(depth + 1, out);
        }
    }
}

/// Headers of an explain result
pub const EXPLAIN_HEADERS: [&str; 4] = ["Operation", "Cost", "Rows", "Details"];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::{AggregateFunction, FilterOperator, SortDirection};

    #[test]
    fn test_scan_only() {
        let query = Query::select(&["Computer Name"]).build();
        let plan = PlanNode::for_query(&query, 100);

        assert_eq!(plan.node_type, PlanNodeType::Scan);
        assert_eq!(plan.rows, 100);
        assert_eq!(plan.cost, 100.0);
        assert!(plan.children.is_empty());
        assert_eq!(plan.details["scope"], "all");
    }

    #[test]
    fn test_stages_cascade() {
        let query = Query::select(&["Location"])
            .aggregate(AggregateFunction::Count, None)
            .filter("CPU Percent", FilterOperator::GreaterThan, 50.0)
            .group_by(&["Location"])
            .order_by("Location", SortDirection::Asc)
            .limit(3)
            .build();
        let plan = PlanNode::for_query(&query, 1000);

        let filter = &plan.children[0];
        assert_eq!(filter.node_type, PlanNodeType::Filter);
        assert_eq!(filter.rows, 500);

        let aggregate = &filter.children[0];
        assert_eq!(aggregate.node_type, PlanNodeType::Aggregate);
        assert_eq!(aggregate.rows, 50);

        let sort = &aggregate.children[0];
        assert_eq!(sort.node_type, PlanNodeType::Sort);
        assert_eq!(sort.rows, 50);
        assert!((sort.cost - 50.0 * 50f64.log2()).abs() < 1e-9);

        let limit = &sort.children[0];
        assert_eq!(limit.rows, 3);
        assert_eq!(plan.estimated_rows(), 3);
        assert_eq!(plan.node_count(), 5);
    }

    #[test]
    fn test_group_scope_filter_precedes_where() {
        let query = Query::select(&["Computer Name"])
            .from_group("servers")
            .filter("CPU Percent", FilterOperator::GreaterThan, 50.0)
            .filter("OS Platform", FilterOperator::Contains, "Linux")
            .build();
        let plan = PlanNode::for_query(&query, 100);

        assert_eq!(plan.children.len(), 1);
        let scope = &plan.children[0];
        assert_eq!(scope.node_type, PlanNodeType::Filter);
        assert_eq!(scope.rows, 30);
        assert!((scope.cost - 10.0).abs() < 1e-9);
        assert_eq!(scope.details["scope"], "servers");

        let filter = &scope.children[0];
        assert_eq!(filter.node_type, PlanNodeType::Filter);
        assert_eq!(filter.details["filters"], 2);
        assert_eq!(filter.rows, 7);
        assert!((filter.cost - 6.0).abs() < 1e-9);
        assert_eq!(plan.node_count(), 3);
    }

    #[test]
    fn test_all_machines_has_no_scope_filter() {
        let query = Query::select(&["Computer Name"]).limit(5).build();
        let plan = PlanNode::for_query(&query, 100);

        assert_eq!(plan.children[0].node_type, PlanNodeType::Limit);
    }

    #[test]
    fn test_ungrouped_aggregate_yields_one_row() {
        let query = Query::select(&[])
            .aggregate(AggregateFunction::Avg, Some("CPU Percent"))
            .build();
        let plan = PlanNode::for_query(&query, 40);
        assert_eq!(plan.estimated_rows(), 1);
    }

    #[test]
    fn test_explain_rows_are_indented() {
        let query = Query::select(&["Computer Name"])
            .filter("OS Platform", FilterOperator::Contains, "Windows")
            .limit(5)
            .build();
        let rows = PlanNode::for_query(&query, 11).explain_rows();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][0], Cell::Text("scan".into()));
        assert_eq!(rows[1][0], Cell::Text("  filter".into()));
        assert_eq!(rows[2][0], Cell::Text("    limit".into()));
        assert_eq!(rows[1][2], Cell::Number(5.0));
        assert_eq!(rows[2][3], Cell::Text("{\"limit\":5}".into()));
    }
}
