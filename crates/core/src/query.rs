#![forbid(unsafe_code)]

use crate::error::QueryError;
use crate::schema::{Table, link_between};

/// Binary operators of the query language. The set is closed by design;
/// anything richer goes through the raw-query escape hatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Like,
    In,
    And,
    Or,
}

impl BinOp {
    fn sql(self) -> &'static str {
        match self {
            BinOp::Eq => "=",
            BinOp::Like => "LIKE",
            BinOp::In => "IN",
            BinOp::And => "AND",
            BinOp::Or => "OR",
        }
    }
}

/// A constant operand. Lists are only meaningful as the right-hand side of
/// `IN`, and their elements must be scalars.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Const {
    Null,
    Int(i64),
    Text(String),
    List(Vec<Const>),
}

/// Boolean/comparison expression tree over positioned field references.
///
/// `Ref(position, field)` points at the table occupying `position` in the
/// join chain of the enclosing [`Select`]; position 0 is the root table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    Not(Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
    Const(Const),
    Ref(usize, String),
}

impl Expr {
    pub fn not(expr: Expr) -> Expr {
        Expr::Not(Box::new(expr))
    }

    pub fn bin(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Bin(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn field(position: usize, field: impl Into<String>) -> Expr {
        Expr::Ref(position, field.into())
    }

    pub fn constant(value: impl Into<Const>) -> Expr {
        Expr::Const(value.into())
    }
}

impl From<i64> for Const {
    fn from(value: i64) -> Self {
        Const::Int(value)
    }
}

impl From<&str> for Const {
    fn from(value: &str) -> Self {
        Const::Text(value.to_string())
    }
}

impl From<String> for Const {
    fn from(value: String) -> Self {
        Const::Text(value)
    }
}

/// Compile an expression against the positioned table chain.
///
/// Returns the SQL fragment plus the bound values in placeholder order.
/// The left-before-right concatenation is load-bearing: placeholders are
/// positional.
pub fn compile_expr(expr: &Expr, tables: &[Table]) -> Result<(String, Vec<Const>), QueryError> {
    match expr {
        Expr::Not(sub) => {
            let (sql, values) = compile_expr(sub, tables)?;
            Ok((format!("NOT ({sql})"), values))
        }
        Expr::Bin(op, lhs, rhs) => {
            let (lhs_sql, mut values) = compile_expr(lhs, tables)?;
            let (rhs_sql, rhs_values) = compile_expr(rhs, tables)?;
            values.extend(rhs_values);
            Ok((format!("(({lhs_sql}) {} ({rhs_sql}))", op.sql()), values))
        }
        Expr::Const(Const::List(elements)) => {
            // No enclosing parentheses here; the Bin wrapping already
            // parenthesizes the right-hand side of IN.
            for element in elements {
                if matches!(element, Const::List(_)) {
                    return Err(QueryError::UnsupportedConstant);
                }
            }
            let sql = vec!["?"; elements.len()].join(", ");
            Ok((sql, elements.clone()))
        }
        Expr::Const(scalar) => Ok(("?".to_string(), vec![scalar.clone()])),
        Expr::Ref(position, field) => {
            let table = tables
                .get(*position)
                .copied()
                .ok_or(QueryError::RefPositionOutOfRange {
                    position: *position,
                })?;
            table.field_index(field)?;
            Ok((format!("t{position}.{field}"), Vec::new()))
        }
    }
}

/// Output shape of a compiled select.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Projection {
    Rows,
    Ids,
    Count,
}

/// A declarative query: a root table, an ordered inner-join chain, an
/// optional filter, and an ordering.
///
/// Each join step is `(table, back_reference)` where the back reference
/// names a strictly earlier chain position the new table links to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Select {
    pub root: Table,
    pub joins: Vec<(Table, usize)>,
    pub filter: Option<Expr>,
    pub order_by: Vec<(usize, String, bool)>,
}

impl Select {
    pub fn from_root(root: Table) -> Self {
        Self {
            root,
            joins: Vec::new(),
            filter: None,
            order_by: Vec::new(),
        }
    }
}

/// Compile a [`Select`] into a parameterized statement plus bound values.
///
/// Validation (forward references, link resolution, field names) happens
/// entirely here; callers get a statement that is safe to prepare verbatim.
pub fn build_select(
    select: &Select,
    projection: Projection,
) -> Result<(String, Vec<Const>), QueryError> {
    let mut tables = Vec::with_capacity(select.joins.len() + 1);
    tables.push(select.root);

    let mut join_sql = String::new();
    let mut values = Vec::new();

    for (step, (table, back)) in select.joins.iter().enumerate() {
        let position = step + 1;
        if *back >= position {
            return Err(QueryError::ForwardReference {
                position,
                reference: *back,
            });
        }
        tables.push(*table);

        let (field_on_new, field_on_ref) = link_between(*table, tables[*back])?;
        let on = Expr::bin(
            BinOp::Eq,
            Expr::field(position, field_on_new),
            Expr::field(*back, field_on_ref),
        );
        let (on_sql, on_values) = compile_expr(&on, &tables)?;
        join_sql.push_str(&format!(
            " INNER JOIN {} AS t{position} ON {on_sql}",
            table.name()
        ));
        // Join equalities compare two column references and bind nothing,
        // but any values would have to precede the filter's.
        values.extend(on_values);
    }

    let mut where_sql = String::new();
    if let Some(filter) = &select.filter {
        let (sql, filter_values) = compile_expr(filter, &tables)?;
        where_sql = format!(" WHERE {sql}");
        values.extend(filter_values);
    }

    let mut order_sql = String::new();
    for (index, (position, field, ascending)) in select.order_by.iter().enumerate() {
        let table = tables
            .get(*position)
            .copied()
            .ok_or(QueryError::RefPositionOutOfRange {
                position: *position,
            })?;
        table.field_index(field)?;
        order_sql.push_str(if index == 0 { " ORDER BY " } else { ", " });
        order_sql.push_str(&format!(
            "t{position}.{field} {}",
            if *ascending { "ASC" } else { "DESC" }
        ));
    }

    let columns = match projection {
        Projection::Rows | Projection::Count => "DISTINCT t0.*".to_string(),
        Projection::Ids => {
            if !select.root.has_id() {
                return Err(QueryError::NoIdColumn(select.root.name()));
            }
            "DISTINCT t0.id".to_string()
        }
    };

    let statement = format!(
        "SELECT {columns} FROM {} AS t0{join_sql}{where_sql}{order_sql}",
        select.root.name()
    );

    match projection {
        Projection::Count => Ok((format!("SELECT COUNT(*) FROM ({statement})"), values)),
        Projection::Rows | Projection::Ids => Ok((statement, values)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_constant_compiles_to_one_placeholder() {
        let (sql, values) =
            compile_expr(&Expr::constant("abc"), &[Table::ExpProgs]).expect("scalar compiles");
        assert_eq!(sql, "?");
        assert_eq!(values, vec![Const::Text("abc".to_string())]);
    }

    #[test]
    fn list_constant_compiles_without_enclosing_parens() {
        let list = Expr::Const(Const::List(vec![Const::Int(1), Const::Null, "x".into()]));
        let (sql, values) = compile_expr(&list, &[Table::ExpProgs]).expect("flat list compiles");
        assert_eq!(sql, "?, ?, ?");
        assert_eq!(
            values,
            vec![Const::Int(1), Const::Null, Const::Text("x".to_string())]
        );
    }

    #[test]
    fn nested_list_is_an_unsupported_constant() {
        let nested = Expr::Const(Const::List(vec![Const::List(vec![Const::Int(1)])]));
        let err = compile_expr(&nested, &[Table::ExpProgs]).expect_err("nested list must fail");
        assert_eq!(err, QueryError::UnsupportedConstant);
    }

    #[test]
    fn bin_binds_left_values_before_right_values() {
        let expr = Expr::bin(
            BinOp::And,
            Expr::bin(BinOp::Eq, Expr::field(0, "arch"), Expr::constant("a")),
            Expr::bin(BinOp::Like, Expr::field(0, "code"), Expr::constant("b%")),
        );
        let (sql, values) = compile_expr(&expr, &[Table::ExpProgs]).expect("expression compiles");
        assert_eq!(sql, "(((t0.arch) = (?)) AND ((t0.code) LIKE (?)))");
        assert_eq!(
            values,
            vec![Const::Text("a".to_string()), Const::Text("b%".to_string())]
        );
    }

    #[test]
    fn not_wraps_and_keeps_bound_values() {
        let expr = Expr::not(Expr::bin(
            BinOp::Eq,
            Expr::field(0, "name"),
            Expr::constant("x"),
        ));
        let (sql, values) =
            compile_expr(&expr, &[Table::ExpProgsLists]).expect("negation compiles");
        assert_eq!(sql, "NOT (((t0.name) = (?)))");
        assert_eq!(values, vec![Const::Text("x".to_string())]);
    }

    #[test]
    fn ref_is_validated_against_its_positioned_table() {
        let err = compile_expr(&Expr::field(0, "code"), &[Table::ExpProgsLists])
            .expect_err("lists have no code field");
        assert!(matches!(err, QueryError::UnknownField { .. }));

        let err = compile_expr(&Expr::field(3, "code"), &[Table::ExpProgs])
            .expect_err("position 3 does not exist");
        assert!(matches!(err, QueryError::RefPositionOutOfRange { position: 3 }));
    }

    #[test]
    fn join_chain_compiles_with_positional_aliases() {
        let select = Select {
            root: Table::ExpProgs,
            joins: vec![
                (Table::ExpProgsListsEntries, 0),
                (Table::ExpProgsLists, 1),
            ],
            filter: Some(Expr::bin(
                BinOp::Eq,
                Expr::field(2, "name"),
                Expr::constant("holbarun_1"),
            )),
            order_by: vec![(0, "id".to_string(), true)],
        };

        let (sql, values) = build_select(&select, Projection::Rows).expect("chain compiles");
        assert!(sql.starts_with("SELECT DISTINCT t0.* FROM exp_progs AS t0"));
        // t1 joins the root on prog_id=id, t2 joins t1 on its list_id.
        assert!(sql.contains("INNER JOIN exp_progs_lists_entries AS t1 ON ((t1.prog_id) = (t0.id))"));
        assert!(sql.contains("INNER JOIN exp_progs_lists AS t2 ON ((t2.id) = (t1.list_id))"));
        assert!(sql.ends_with(" WHERE ((t2.name) = (?)) ORDER BY t0.id ASC"));
        assert_eq!(values, vec![Const::Text("holbarun_1".to_string())]);
    }

    #[test]
    fn forward_reference_is_rejected_before_any_sql_exists() {
        let select = Select {
            root: Table::ExpProgs,
            joins: vec![(Table::ExpProgsListsEntries, 1)],
            filter: None,
            order_by: Vec::new(),
        };
        let err = build_select(&select, Projection::Rows).expect_err("self reference must fail");
        assert_eq!(
            err,
            QueryError::ForwardReference {
                position: 1,
                reference: 1
            }
        );
    }

    #[test]
    fn count_projection_wraps_the_statement() {
        let select = Select::from_root(Table::ExpProgs);
        let (sql, values) = build_select(&select, Projection::Count).expect("count compiles");
        assert_eq!(
            sql,
            "SELECT COUNT(*) FROM (SELECT DISTINCT t0.* FROM exp_progs AS t0)"
        );
        assert!(values.is_empty());
    }

    #[test]
    fn id_projection_requires_an_id_column() {
        let select = Select::from_root(Table::ExpProgsListsEntries);
        let err = build_select(&select, Projection::Ids).expect_err("entries have no id");
        assert_eq!(err, QueryError::NoIdColumn("exp_progs_lists_entries"));

        let (sql, _) = build_select(&Select::from_root(Table::ExpProgs), Projection::Ids)
            .expect("ids compile");
        assert_eq!(sql, "SELECT DISTINCT t0.id FROM exp_progs AS t0");
    }
}
