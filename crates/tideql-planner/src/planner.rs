use std::collections::HashSet;

use log::debug;
use sqlparser::ast::{
    Assignment, BinaryOperator, Delete, Expr, FromTable, FunctionArg, FunctionArgExpr,
    FunctionArguments, GroupByExpr, Insert, JoinOperator, Query, SelectItem, SetExpr, Statement,
    TableFactor, TableWithJoins, UnaryOperator, Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use tideql_common::types::Value;

use crate::query_info::{
    Aggregate, AggregateFunc, JoinInfo, JoinKind, Operation, Predicate, PredicateOp,
    PredicateValue, QueryInfo, SortDirection,
};

/// Parses SQL into a [`QueryInfo`] pushdown plan.
///
/// The planner is deliberately forgiving: anything it cannot recognise
/// (parse failures, set operations, DDL) degrades to `Operation::Raw` with
/// the statement preserved verbatim, so the engine can still hand it to the
/// local analytical engine. It never fails.
#[derive(Debug, Default)]
pub struct QueryPlanner;

impl QueryPlanner {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, sql: &str) -> QueryInfo {
        let sql = sql.trim();
        let statements = match Parser::parse_sql(&GenericDialect {}, sql) {
            Ok(statements) => statements,
            Err(e) => {
                debug!("statement kept raw, parser said: {}", e);
                return QueryInfo::raw(sql);
            }
        };
        let Some(statement) = statements.into_iter().next() else {
            return QueryInfo::raw(sql);
        };
        self.plan_statement(statement, sql)
    }

    fn plan_statement(&self, statement: Statement, raw: &str) -> QueryInfo {
        match statement {
            Statement::Explain { statement, .. } => {
                let mut info = self.plan_statement(*statement, raw);
                info.is_explain = true;
                info
            }
            Statement::Query(query) => self.plan_query(*query, raw),
            Statement::Insert(insert) => self.plan_insert(insert, raw),
            Statement::Update {
                table,
                assignments,
                selection,
                ..
            } => self.plan_update(table, assignments, selection, raw),
            Statement::Delete(delete) => self.plan_delete(delete, raw),
            _ => QueryInfo::raw(raw),
        }
    }

    fn plan_query(&self, query: Query, raw: &str) -> QueryInfo {
        let cte_names: HashSet<String> = query
            .with
            .as_ref()
            .map(|with| {
                with.cte_tables
                    .iter()
                    .map(|cte| cte.alias.name.value.to_lowercase())
                    .collect()
            })
            .unwrap_or_default();

        let SetExpr::Select(select) = *query.body else {
            return QueryInfo::raw(raw);
        };

        let mut info = QueryInfo::new(Operation::Select, raw);

        // Routing table: the first physical, non-CTE relation in the FROM
        // clause (joins included); CTE-only statements fall back to the
        // first relation so the engine still has something to route on.
        let mut first_relation: Option<String> = None;
        for table_with_joins in &select.from {
            self.visit_relation(
                &table_with_joins.relation,
                &cte_names,
                &mut info,
                &mut first_relation,
            );
            for join in &table_with_joins.joins {
                let table = relation_name(&join.relation);
                info.joins.push(JoinInfo {
                    kind: join_kind(&join.join_operator),
                    table: table.clone(),
                });
                self.visit_relation(&join.relation, &cte_names, &mut info, &mut first_relation);
            }
        }
        if info.table.is_none() {
            info.table = first_relation;
        }

        info.columns.clear();
        for item in &select.projection {
            match item {
                SelectItem::Wildcard(_) => info.columns.push("*".to_string()),
                SelectItem::QualifiedWildcard(name, _) => {
                    info.columns.push(format!("{}.*", name));
                }
                SelectItem::UnnamedExpr(expr) => {
                    if let Some(aggregate) = aggregate_from_expr(expr, None) {
                        info.columns.push(aggregate.projected_name());
                        info.aggregates.push(aggregate);
                    } else {
                        info.columns.push(expr.to_string());
                    }
                }
                SelectItem::ExprWithAlias { expr, alias } => {
                    if let Some(aggregate) = aggregate_from_expr(expr, Some(alias.value.clone())) {
                        info.aggregates.push(aggregate);
                    }
                    info.columns.push(alias.value.clone());
                }
            }
        }

        if let Some(selection) = &select.selection {
            let complete = collect_predicates(selection, &mut info.predicates);
            info.has_residual_predicates = !complete;
        }
        if select.having.is_some() {
            info.has_residual_predicates = true;
        }

        match &select.group_by {
            GroupByExpr::Expressions(exprs, _) => {
                info.group_by = exprs.iter().map(|e| e.to_string()).collect();
            }
            GroupByExpr::All(_) => {}
        }

        if let Some(order_by) = &query.order_by {
            for ordered in &order_by.exprs {
                let direction = if ordered.asc == Some(false) {
                    SortDirection::Desc
                } else {
                    SortDirection::Asc
                };
                info.order_by.push((ordered.expr.to_string(), direction));
            }
        }

        if let Some(limit) = &query.limit {
            info.limit = integer_literal(limit);
        }
        if let Some(offset) = &query.offset {
            info.offset = integer_literal(&offset.value);
        }

        info
    }

    fn visit_relation(
        &self,
        relation: &TableFactor,
        cte_names: &HashSet<String>,
        info: &mut QueryInfo,
        first_relation: &mut Option<String>,
    ) {
        if let TableFactor::Table { name, .. } = relation {
            let text = name.to_string();
            if first_relation.is_none() {
                *first_relation = Some(text.clone());
            }
            let is_cte = cte_names.contains(&unquote(&text).to_lowercase());
            if info.table.is_none() && !is_cte {
                info.table = Some(text);
            }
        }
    }

    fn plan_insert(&self, insert: Insert, raw: &str) -> QueryInfo {
        let mut info = QueryInfo::new(Operation::Insert, raw);
        info.table = Some(insert.table_name.to_string());

        let columns: Vec<String> = insert.columns.iter().map(|c| c.value.clone()).collect();
        if let Some(source) = &insert.source {
            if let SetExpr::Values(values) = source.body.as_ref() {
                // Multi-row VALUES keeps only the first row; the complete
                // statement stays available in raw_sql.
                if let Some(first_row) = values.rows.first() {
                    for (column, expr) in columns.iter().zip(first_row.iter()) {
                        info.values.insert(column.clone(), literal_value(expr));
                    }
                }
            }
        }
        info
    }

    fn plan_update(
        &self,
        table: TableWithJoins,
        assignments: Vec<Assignment>,
        selection: Option<Expr>,
        raw: &str,
    ) -> QueryInfo {
        let mut info = QueryInfo::new(Operation::Update, raw);
        info.table = Some(relation_name(&table.relation));
        for assignment in &assignments {
            info.values
                .insert(assignment.target.to_string(), literal_value(&assignment.value));
        }
        if let Some(selection) = &selection {
            let complete = collect_predicates(selection, &mut info.predicates);
            info.has_residual_predicates = !complete;
        }
        info
    }

    fn plan_delete(&self, delete: Delete, raw: &str) -> QueryInfo {
        let mut info = QueryInfo::new(Operation::Delete, raw);
        let tables = match &delete.from {
            FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables,
        };
        info.table = tables.first().map(|t| relation_name(&t.relation));
        if let Some(selection) = &delete.selection {
            let complete = collect_predicates(selection, &mut info.predicates);
            info.has_residual_predicates = !complete;
        }
        info
    }
}

fn relation_name(relation: &TableFactor) -> String {
    match relation {
        TableFactor::Table { name, .. } => name.to_string(),
        other => other.to_string(),
    }
}

fn join_kind(operator: &JoinOperator) -> JoinKind {
    match operator {
        JoinOperator::LeftOuter(_) => JoinKind::Left,
        JoinOperator::RightOuter(_) => JoinKind::Right,
        JoinOperator::FullOuter(_) => JoinKind::Outer,
        _ => JoinKind::Inner,
    }
}

fn unquote(text: &str) -> &str {
    text.trim_matches('"').trim_matches('`')
}

fn aggregate_from_expr(expr: &Expr, alias: Option<String>) -> Option<Aggregate> {
    let Expr::Function(function) = expr else {
        return None;
    };
    let func = AggregateFunc::from_name(&function.name.to_string())?;
    let column = match &function.args {
        FunctionArguments::List(list) => match list.args.first() {
            Some(FunctionArg::Unnamed(FunctionArgExpr::Wildcard)) => "*".to_string(),
            Some(FunctionArg::Unnamed(FunctionArgExpr::Expr(arg))) => arg.to_string(),
            Some(other) => other.to_string(),
            None => "*".to_string(),
        },
        _ => "*".to_string(),
    };
    Some(Aggregate {
        func,
        column,
        alias,
    })
}

fn comparison_op(op: &BinaryOperator) -> Option<PredicateOp> {
    match op {
        BinaryOperator::Eq => Some(PredicateOp::Eq),
        BinaryOperator::NotEq => Some(PredicateOp::NotEq),
        BinaryOperator::Lt => Some(PredicateOp::Lt),
        BinaryOperator::LtEq => Some(PredicateOp::LtEq),
        BinaryOperator::Gt => Some(PredicateOp::Gt),
        BinaryOperator::GtEq => Some(PredicateOp::GtEq),
        _ => None,
    }
}

/// Walks a WHERE tree collecting AND-connected comparison leaves in source
/// order. Returns `false` when any part of the tree was left behind (a
/// disjunction, a negated operator, a subquery), meaning `out` alone does
/// not imply the full condition.
fn collect_predicates(expr: &Expr, out: &mut Vec<Predicate>) -> bool {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            let l = collect_predicates(left, out);
            let r = collect_predicates(right, out);
            l && r
        }
        Expr::Nested(inner) => collect_predicates(inner, out),
        Expr::BinaryOp { left, op, right } => match comparison_op(op) {
            Some(op) => {
                out.push(Predicate::new(
                    left.to_string(),
                    op,
                    PredicateValue::Scalar(literal_value(right)),
                ));
                true
            }
            None => false,
        },
        Expr::Like {
            negated: false,
            expr,
            pattern,
            ..
        } => {
            out.push(Predicate::new(
                expr.to_string(),
                PredicateOp::Like,
                PredicateValue::Scalar(literal_value(pattern)),
            ));
            true
        }
        Expr::InList {
            expr,
            list,
            negated: false,
        } => {
            out.push(Predicate::new(
                expr.to_string(),
                PredicateOp::In,
                PredicateValue::List(list.iter().map(literal_value).collect()),
            ));
            true
        }
        Expr::IsNull(inner) => {
            out.push(Predicate::new(
                inner.to_string(),
                PredicateOp::IsNull,
                PredicateValue::Scalar(Value::Null),
            ));
            true
        }
        Expr::IsNotNull(inner) => {
            out.push(Predicate::new(
                inner.to_string(),
                PredicateOp::IsNotNull,
                PredicateValue::Scalar(Value::Null),
            ));
            true
        }
        _ => false,
    }
}

fn literal_value(expr: &Expr) -> Value {
    match expr {
        Expr::Value(SqlValue::Number(text, _)) => number_value(text),
        Expr::Value(SqlValue::SingleQuotedString(s))
        | Expr::Value(SqlValue::DoubleQuotedString(s)) => Value::String(s.clone()),
        Expr::Value(SqlValue::Boolean(b)) => Value::Bool(*b),
        Expr::Value(SqlValue::Null) => Value::Null,
        Expr::Value(SqlValue::Placeholder(_)) => Value::Placeholder,
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match literal_value(expr) {
            Value::Int64(i) => Value::Int64(-i),
            Value::Float64(f) => Value::Float64(-f),
            other => Value::String(format!("-{}", other)),
        },
        other => Value::String(other.to_string()),
    }
}

fn number_value(text: &str) -> Value {
    if text.contains(['.', 'e', 'E']) {
        text.parse::<f64>()
            .map(Value::Float64)
            .unwrap_or_else(|_| Value::String(text.to_string()))
    } else {
        match text.parse::<i64>() {
            Ok(i) => Value::Int64(i),
            Err(_) => text
                .parse::<f64>()
                .map(Value::Float64)
                .unwrap_or_else(|_| Value::String(text.to_string())),
        }
    }
}

fn integer_literal(expr: &Expr) -> Option<u64> {
    match expr {
        Expr::Value(SqlValue::Number(text, _)) => text.parse::<u64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(sql: &str) -> QueryInfo {
        QueryPlanner::new().parse(sql)
    }

    #[test]
    fn test_simple_select() {
        let info = parse("SELECT number, short_description FROM incident WHERE priority = 1");
        assert_eq!(info.operation, Operation::Select);
        assert_eq!(info.table.as_deref(), Some("incident"));
        assert_eq!(info.columns, vec!["number", "short_description"]);
        assert_eq!(info.predicates.len(), 1);
        assert_eq!(info.predicates[0].column, "priority");
        assert_eq!(info.predicates[0].op, PredicateOp::Eq);
        assert_eq!(
            info.predicates[0].value,
            PredicateValue::Scalar(Value::Int64(1))
        );
        assert!(!info.has_residual_predicates);
    }

    #[test]
    fn test_raw_sql_is_trimmed_original() {
        let sql = "  SELECT * FROM incident  ";
        let info = parse(sql);
        assert_eq!(info.raw_sql, sql.trim());
    }

    #[test]
    fn test_conjunction_order_preserved() {
        let info = parse(
            "SELECT * FROM t WHERE b = 2 AND a = 1 AND c LIKE '%x%' AND d IS NOT NULL",
        );
        let columns: Vec<_> = info.predicates.iter().map(|p| p.column.as_str()).collect();
        assert_eq!(columns, vec!["b", "a", "c", "d"]);
        assert_eq!(info.predicates[2].op, PredicateOp::Like);
        assert_eq!(info.predicates[3].op, PredicateOp::IsNotNull);
        assert!(!info.has_residual_predicates);
    }

    #[test]
    fn test_disjunction_blocks_extraction() {
        let info = parse("SELECT * FROM t WHERE a = 1 OR b = 2");
        assert!(info.predicates.is_empty());
        assert!(info.has_residual_predicates);
    }

    #[test]
    fn test_disjunction_under_and_blocks_only_that_subtree() {
        let info = parse("SELECT * FROM t WHERE a = 1 AND (b = 2 OR c = 3)");
        assert_eq!(info.predicates.len(), 1);
        assert_eq!(info.predicates[0].column, "a");
        assert!(info.has_residual_predicates);
    }

    #[test]
    fn test_in_list() {
        let info = parse("SELECT key FROM issues WHERE status IN ('Open', 'In Progress')");
        assert_eq!(info.predicates.len(), 1);
        assert_eq!(info.predicates[0].op, PredicateOp::In);
        assert_eq!(
            info.predicates[0].value,
            PredicateValue::List(vec![
                Value::String("Open".to_string()),
                Value::String("In Progress".to_string()),
            ])
        );
    }

    #[test]
    fn test_null_tests() {
        let info = parse("SELECT * FROM t WHERE a IS NULL AND b IS NOT NULL");
        assert_eq!(info.predicates[0].op, PredicateOp::IsNull);
        assert_eq!(info.predicates[1].op, PredicateOp::IsNotNull);
    }

    #[test]
    fn test_placeholder_parameters() {
        let info = parse("SELECT * FROM t WHERE id = ? AND name = ?");
        assert_eq!(
            info.predicates[0].value,
            PredicateValue::Scalar(Value::Placeholder)
        );
        assert_eq!(
            info.predicates[1].value,
            PredicateValue::Scalar(Value::Placeholder)
        );
    }

    #[test]
    fn test_literal_types_preserved() {
        let info = parse(
            "SELECT * FROM t WHERE a = 1 AND b = 1.5 AND c = 'x' AND d = true AND e = -3",
        );
        let values: Vec<_> = info
            .predicates
            .iter()
            .map(|p| p.value.as_scalar().cloned().unwrap())
            .collect();
        assert_eq!(
            values,
            vec![
                Value::Int64(1),
                Value::Float64(1.5),
                Value::String("x".to_string()),
                Value::Bool(true),
                Value::Int64(-3),
            ]
        );
    }

    #[test]
    fn test_aggregates_and_group_by() {
        let info = parse(
            "SELECT grp, SUM(val) AS total, COUNT(*) FROM t GROUP BY grp ORDER BY grp",
        );
        assert_eq!(info.group_by, vec!["grp"]);
        assert_eq!(info.aggregates.len(), 2);
        assert_eq!(info.aggregates[0].func, AggregateFunc::Sum);
        assert_eq!(info.aggregates[0].column, "val");
        assert_eq!(info.aggregates[0].alias.as_deref(), Some("total"));
        assert_eq!(info.aggregates[1].func, AggregateFunc::Count);
        assert_eq!(info.aggregates[1].column, "*");
        assert_eq!(info.columns, vec!["grp", "total", "COUNT(*)"]);
    }

    #[test]
    fn test_order_by_directions() {
        let info = parse("SELECT * FROM t ORDER BY created DESC, id");
        assert_eq!(
            info.order_by,
            vec![
                ("created".to_string(), SortDirection::Desc),
                ("id".to_string(), SortDirection::Asc),
            ]
        );
    }

    #[test]
    fn test_limit_offset() {
        let info = parse("SELECT * FROM t LIMIT 10 OFFSET 5");
        assert_eq!(info.limit, Some(10));
        assert_eq!(info.offset, Some(5));
    }

    #[test]
    fn test_joins() {
        let info = parse(
            "SELECT a.id, s.n FROM sales.account a \
             JOIN support.incident s ON s.account = a.id \
             LEFT JOIN support.task t ON t.incident = s.id",
        );
        assert_eq!(info.table.as_deref(), Some("sales.account"));
        assert_eq!(info.joins.len(), 2);
        assert_eq!(info.joins[0].kind, JoinKind::Inner);
        assert_eq!(info.joins[0].table, "support.incident");
        assert_eq!(info.joins[1].kind, JoinKind::Left);
        assert_eq!(info.joins[1].table, "support.task");
    }

    #[test]
    fn test_cte_is_not_routing_table() {
        let info = parse(
            "WITH recent AS (SELECT * FROM incident) SELECT * FROM recent JOIN incident i ON i.id = recent.id",
        );
        // The CTE alias is skipped; the physical table routes.
        assert_eq!(info.table.as_deref(), Some("incident"));
    }

    #[test]
    fn test_quoting_preserved() {
        let info = parse("SELECT * FROM \"sales\".\"Account\" WHERE \"Region\" = 'EMEA'");
        assert_eq!(info.table.as_deref(), Some("\"sales\".\"Account\""));
        assert_eq!(info.predicates[0].column, "\"Region\"");
    }

    #[test]
    fn test_insert() {
        let info =
            parse("INSERT INTO incident (short_description, priority) VALUES ('broken', 1)");
        assert_eq!(info.operation, Operation::Insert);
        assert_eq!(info.table.as_deref(), Some("incident"));
        assert_eq!(
            info.values.get("short_description"),
            Some(&Value::String("broken".to_string()))
        );
        assert_eq!(info.values.get("priority"), Some(&Value::Int64(1)));
    }

    #[test]
    fn test_insert_multi_row_keeps_first() {
        let info = parse("INSERT INTO t (a) VALUES (1), (2), (3)");
        assert_eq!(info.values.get("a"), Some(&Value::Int64(1)));
        assert_eq!(info.values.len(), 1);
        assert!(info.raw_sql.contains("(3)"));
    }

    #[test]
    fn test_insert_without_columns_has_no_values() {
        let info = parse("INSERT INTO t VALUES (1, 2)");
        assert_eq!(info.operation, Operation::Insert);
        assert!(info.values.is_empty());
    }

    #[test]
    fn test_update() {
        let info = parse("UPDATE incident SET priority = 2, state = 'open' WHERE sys_id = 'abc'");
        assert_eq!(info.operation, Operation::Update);
        assert_eq!(info.values.get("priority"), Some(&Value::Int64(2)));
        assert_eq!(
            info.values.get("state"),
            Some(&Value::String("open".to_string()))
        );
        assert_eq!(info.predicates[0].column, "sys_id");
    }

    #[test]
    fn test_delete() {
        let info = parse("DELETE FROM incident WHERE priority = 1");
        assert_eq!(info.operation, Operation::Delete);
        assert_eq!(info.table.as_deref(), Some("incident"));
        assert_eq!(info.predicates.len(), 1);
    }

    #[test]
    fn test_explain_recurses() {
        let sql = "EXPLAIN SELECT * FROM incident WHERE priority = 1";
        let info = parse(sql);
        assert!(info.is_explain);
        assert_eq!(info.operation, Operation::Select);
        assert_eq!(info.table.as_deref(), Some("incident"));
        assert_eq!(info.raw_sql, sql);
        assert_eq!(info.predicates.len(), 1);
    }

    #[test]
    fn test_unrecognised_statement_is_raw() {
        let info = parse("CREATE TABLE t (x INT)");
        assert_eq!(info.operation, Operation::Raw);
        assert_eq!(info.raw_sql, "CREATE TABLE t (x INT)");
    }

    #[test]
    fn test_parse_failure_is_raw_never_panics() {
        let info = parse("SELECT FROM WHERE !!");
        assert_eq!(info.operation, Operation::Raw);
        assert_eq!(info.raw_sql, "SELECT FROM WHERE !!");
    }

    #[test]
    fn test_set_operation_is_raw() {
        let info = parse("SELECT a FROM t UNION SELECT a FROM u");
        assert_eq!(info.operation, Operation::Raw);
    }

    #[test]
    fn test_not_in_is_residual() {
        let info = parse("SELECT * FROM t WHERE a NOT IN (1, 2)");
        assert!(info.predicates.is_empty());
        assert!(info.has_residual_predicates);
    }
}
