//! SELECT compilation with nested JSON embedding
//!
//! Every embedded relation is aggregated on its own before it meets its
//! parent: the relation's rows are grouped by the join column into one JSON
//! array per parent key, and that one-row-per-key table is LEFT JOINed onto
//! the parent. Sibling relations therefore never multiply each other's rows.
//! The root is then aggregated once more into a single `data` column:
//!
//! ```text
//! SELECT json_group_array(json_object(<root pairs>)) AS data FROM (
//!     SELECT <root columns>, coalesce(child.agg, '[]') AS child FROM root
//!     LEFT JOIN (
//!         SELECT child.key, json_group_array(json_object(...)) AS agg
//!         FROM (<child select>) AS child GROUP BY child.key
//!     ) AS child ON root.x = child.key
//!     WHERE ... GROUP BY <root key> ORDER BY ...
//! ) AS root
//! ```
//!
//! Filters and order terms on an embedded relation apply inside that
//! relation's select. A filtered relation also requires its parent to have at
//! least one matching row.
//!
//! Only validated identifiers and operator keywords are written into the
//! statement text; filter operands become bound arguments.

use std::collections::BTreeMap;

use sqlrest_common::error::{Error, Result};
use sqlrest_common::types::Value;

use crate::filter::{where_sql, Predicate};
use crate::order::{order_by, OrderSpec, OrderTerm};
use crate::relationship::Relationship;
use crate::schema::SchemaSnapshot;
use crate::select::{SelectColumn, SelectionNode};
use crate::statement::CompiledStatement;
use crate::validate::{string_literal, Ident, IdentifierValidator};

/// Compiles parsed requests against one schema snapshot
#[derive(Debug, Clone, Copy)]
pub struct QueryCompiler<'a> {
    pub(crate) validator: IdentifierValidator<'a>,
}

/// A compiled selection node, not yet wrapped by its parent
struct NodeParts {
    select_list: Vec<String>,
    from: String,
    json_pairs: Vec<String>,
    /// Conditions the parent must add so that only rows with a matching
    /// filtered relation survive
    required: Vec<String>,
}

/// Filters and order terms applied at one level of the selection
#[derive(Debug, Default)]
struct Pushdown<'p> {
    predicates: Vec<&'p Predicate>,
    order: Vec<&'p OrderTerm>,
}

impl Pushdown<'_> {
    fn conditions(&self, args: &mut Vec<Value>) -> Vec<String> {
        self.predicates.iter().map(|p| p.render(args)).collect()
    }
}

/// Where each filter and order term of a request is applied: on the root or
/// inside one of the relations embedded directly under it
#[derive(Debug, Default)]
struct Placement<'p> {
    root: Pushdown<'p>,
    embedded: BTreeMap<&'p str, Pushdown<'p>>,
}

impl<'p> Placement<'p> {
    fn new(
        selection: &SelectionNode,
        filters: &'p [Predicate],
        order: &'p OrderSpec,
    ) -> Result<Self> {
        let mut placement = Self::default();
        for predicate in filters {
            match predicate_table(predicate)? {
                Some(table) => placement.level(selection, table)?.predicates.push(predicate),
                None => placement.root.predicates.push(predicate),
            }
        }
        for term in &order.terms {
            placement.level(selection, &term.table)?.order.push(term);
        }
        Ok(placement)
    }

    fn level(&mut self, selection: &SelectionNode, table: &'p Ident) -> Result<&mut Pushdown<'p>> {
        if table.as_str() == selection.table.as_str() {
            return Ok(&mut self.root);
        }
        if selection.child(table.as_str()).is_none() {
            return Err(Error::InvalidFilter(format!(
                "table {} is not embedded directly under {}",
                table.as_str(),
                selection.table.as_str()
            )));
        }
        Ok(self.embedded.entry(table.as_str()).or_default())
    }
}

/// The one table every atom of `predicate` refers to
fn predicate_table(predicate: &Predicate) -> Result<Option<&Ident>> {
    let mut tables = predicate.atoms().map(|atom| &atom.table);
    let Some(first) = tables.next() else {
        return Ok(None);
    };
    if let Some(other) = tables.find(|t| t.as_str() != first.as_str()) {
        return Err(Error::InvalidFilter(format!(
            "or group mixes tables {} and {}",
            first.as_str(),
            other.as_str()
        )));
    }
    Ok(Some(first))
}

impl<'a> QueryCompiler<'a> {
    #[must_use]
    pub fn new(snapshot: &'a SchemaSnapshot) -> Self {
        Self {
            validator: IdentifierValidator::new(snapshot),
        }
    }

    #[must_use]
    pub fn validator(&self) -> &IdentifierValidator<'a> {
        &self.validator
    }

    /// Compile a selection tree with its filters and ordering into one
    /// statement returning a single `data` column of JSON.
    pub fn select(
        &self,
        selection: &SelectionNode,
        filters: &[Predicate],
        order: &OrderSpec,
    ) -> Result<CompiledStatement> {
        let root = &selection.table;
        let placement = Placement::new(selection, filters, order)?;

        let mut args = Vec::new();
        let parts = self.compile_node(selection, None, &placement.embedded, &mut args)?;

        let mut conditions = placement.root.conditions(&mut args);
        conditions.extend(parts.required);

        let text = format!(
            "SELECT json_group_array(json_object({pairs})) AS data FROM (SELECT {list} FROM {from}{where_sql} GROUP BY {key}{order}) AS {root}",
            pairs = parts.json_pairs.join(", "),
            list = parts.select_list.join(", "),
            from = parts.from,
            where_sql = where_sql(&conditions),
            key = self.group_key(root),
            order = order_by(None, placement.root.order.iter().copied()),
        );

        Ok(CompiledStatement::new(text, args))
    }

    /// Compile `node` and the relations under it. `join` is the column the
    /// parent joins on, selected even when not requested. `pushed` holds the
    /// filters and order terms for the relations directly under `node`.
    fn compile_node(
        &self,
        node: &SelectionNode,
        join: Option<&Ident>,
        pushed: &BTreeMap<&str, Pushdown<'_>>,
        args: &mut Vec<Value>,
    ) -> Result<NodeParts> {
        let table = &node.table;
        let mut columns: Vec<Ident> = Vec::new();
        let mut json_pairs = Vec::new();

        for column in &node.columns {
            match column {
                SelectColumn::Star => {
                    for name in self.validator.expand_star(table)? {
                        json_pairs.push(format!(
                            "{}, {table}.{name}",
                            string_literal(name.as_str())
                        ));
                        push_distinct(&mut columns, name);
                    }
                }
                SelectColumn::Named { column: name, .. } => {
                    let key = column.json_key().unwrap_or(name.as_str());
                    json_pairs.push(format!("{}, {table}.{name}", string_literal(key)));
                    push_distinct(&mut columns, name.clone());
                }
            }
        }
        if let Some(join) = join {
            push_distinct(&mut columns, join.clone());
        }

        let mut select_list: Vec<String> = columns
            .iter()
            .map(|name| format!("{table}.{name}"))
            .collect();
        let mut from = table.to_string();
        let mut required = Vec::new();

        for child in &node.children {
            let alias = &child.table;
            let rel = Relationship::between(&self.validator, table, alias)?;
            let key = &rel.child_column;
            let pushdown = pushed.get(alias.as_str());

            let parts = self.compile_node(child, Some(key), &BTreeMap::new(), args)?;
            let mut inner = format!("SELECT {} FROM {}", parts.select_list.join(", "), parts.from);
            if let Some(pushdown) = pushdown {
                let conditions = pushdown.conditions(args);
                if !conditions.is_empty() {
                    required.push(format!("{alias}.{key} IS NOT NULL"));
                }
                inner.push_str(&where_sql(&conditions));
                if !pushdown.order.is_empty() {
                    inner.push_str(&order_by(
                        Some(format!("{alias}.{key}")),
                        pushdown.order.iter().copied(),
                    ));
                }
            }

            let aggregate = aggregate_column(alias, key)?;
            select_list.push(format!("coalesce({alias}.{aggregate}, '[]') AS {alias}"));
            from.push_str(&format!(
                " LEFT JOIN (SELECT {alias}.{key}, json_group_array(json_object({pairs})) FILTER (WHERE {alias}.{key} IS NOT NULL) AS {aggregate} FROM ({inner}) AS {alias} GROUP BY {alias}.{key}) AS {alias} ON {table}.{parent} = {alias}.{key}",
                pairs = parts.json_pairs.join(", "),
                parent = rel.parent_column,
            ));
            json_pairs.push(format!(
                "{}, json({table}.{alias})",
                string_literal(alias.as_str())
            ));
        }

        Ok(NodeParts {
            select_list,
            from,
            json_pairs,
            required,
        })
    }

    fn group_key(&self, table: &Ident) -> String {
        match self.validator.primary_key(table) {
            Some(pk) => format!("{table}.{pk}"),
            None => format!("{table}.rowid"),
        }
    }
}

/// Name of a relation's aggregate column; it must not shadow the join column
/// selected beside it.
fn aggregate_column(table: &Ident, key: &Ident) -> Result<Ident> {
    if table.as_str() == key.as_str() {
        Ident::declare(&format!("{}_json", table.as_str()))
    } else {
        Ok(table.clone())
    }
}

fn push_distinct(columns: &mut Vec<Ident>, column: Ident) {
    if !columns.contains(&column) {
        columns.push(column);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{parse_filters, Scope};
    use crate::request::RequestParams;

    fn snapshot() -> SchemaSnapshot {
        SchemaSnapshot::builder()
            .table("users", &[("id", "INTEGER"), ("name", "TEXT"), ("age", "INTEGER")])
            .table("vehicles", &[("id", "INTEGER"), ("user_id", "INTEGER"), ("year", "INTEGER")])
            .table("cars", &[("id", "INTEGER"), ("vehicle_id", "INTEGER")])
            .table("tires", &[("id", "INTEGER"), ("car_id", "INTEGER"), ("brand", "TEXT")])
            .table("posts", &[("id", "INTEGER"), ("user_id", "INTEGER"), ("title", "TEXT")])
            .table("logs", &[("message", "TEXT")])
            .primary_key("users", "id")
            .primary_key("posts", "id")
            .primary_key("vehicles", "id")
            .primary_key("cars", "id")
            .primary_key("tires", "id")
            .foreign_key("vehicles", "user_id", "users", "id")
            .foreign_key("cars", "vehicle_id", "vehicles", "id")
            .foreign_key("tires", "car_id", "cars", "id")
            .foreign_key("posts", "user_id", "users", "id")
            .build()
            .unwrap()
    }

    fn compile(snapshot: &SchemaSnapshot, table: &str, query: &str) -> Result<CompiledStatement> {
        let compiler = QueryCompiler::new(snapshot);
        let params = RequestParams::parse(query);
        let validator = compiler.validator();
        let node = SelectionNode::parse(validator, table, params.select().unwrap_or(""), 8)?;
        let scope = Scope::selection(&node);
        let filters = parse_filters(validator, &scope, &params)?;
        let order = OrderSpec::parse(validator, &scope, params.order().unwrap_or(""))?;
        compiler.select(&node, &filters, &order)
    }

    #[test]
    fn test_select_star_without_joins() {
        let snapshot = snapshot();
        let stmt = compile(&snapshot, "users", "select=*").unwrap();
        assert_eq!(
            stmt.text,
            r#"SELECT json_group_array(json_object('age', "users"."age", 'id', "users"."id", 'name', "users"."name")) AS data FROM (SELECT "users"."age", "users"."id", "users"."name" FROM "users" GROUP BY "users"."id") AS "users""#
        );
        assert!(!stmt.text.contains("JOIN"));
        assert!(stmt.args.is_empty());
    }

    #[test]
    fn test_aliases_become_json_keys() {
        let snapshot = snapshot();
        let stmt = compile(&snapshot, "users", "select=id,full_name:name").unwrap();
        assert!(stmt
            .text
            .starts_with(r#"SELECT json_group_array(json_object('id', "users"."id", 'full_name', "users"."name"))"#));
    }

    #[test]
    fn test_single_embedding() {
        let snapshot = snapshot();
        let stmt = compile(&snapshot, "users", "select=id,vehicles(year)").unwrap();
        assert_eq!(
            stmt.text,
            concat!(
                r#"SELECT json_group_array(json_object('id', "users"."id", 'vehicles', json("users"."vehicles"))) AS data FROM ("#,
                r#"SELECT "users"."id", coalesce("vehicles"."vehicles", '[]') AS "vehicles" FROM "users" "#,
                r#"LEFT JOIN (SELECT "vehicles"."user_id", json_group_array(json_object('year', "vehicles"."year")) FILTER (WHERE "vehicles"."user_id" IS NOT NULL) AS "vehicles" "#,
                r#"FROM (SELECT "vehicles"."year", "vehicles"."user_id" FROM "vehicles") AS "vehicles" GROUP BY "vehicles"."user_id") AS "vehicles" "#,
                r#"ON "users"."id" = "vehicles"."user_id" GROUP BY "users"."id") AS "users""#
            )
        );
    }

    #[test]
    fn test_three_level_embedding() {
        let snapshot = snapshot();
        let stmt = compile(
            &snapshot,
            "users",
            "select=id,vehicles(id,cars(id,tires(brand,id)))",
        )
        .unwrap();

        assert_eq!(stmt.text.matches("LEFT JOIN (").count(), 3);
        assert_eq!(stmt.text.matches("FILTER (WHERE").count(), 3);
        assert!(stmt.text.contains(r#"FILTER (WHERE "tires"."car_id" IS NOT NULL) AS "tires""#));
        assert!(stmt.text.contains(r#"ON "cars"."id" = "tires"."car_id""#));
        assert!(stmt.text.contains(r#"GROUP BY "tires"."car_id""#));
        assert!(stmt.text.contains(r#"GROUP BY "cars"."vehicle_id""#));
        assert!(stmt.text.contains(r#"GROUP BY "vehicles"."user_id""#));
        assert!(!stmt.text.contains(r#"GROUP BY "cars"."id""#));
        assert!(stmt.text.contains(r#"coalesce("tires"."tires", '[]') AS "tires""#));
        assert!(stmt.text.contains(r#"'tires', json("cars"."tires")"#));
    }

    #[test]
    fn test_embedding_from_the_referencing_side() {
        let snapshot = snapshot();
        let stmt = compile(&snapshot, "vehicles", "select=id,users(name)").unwrap();
        assert!(stmt.text.contains(
            r#"FROM (SELECT "users"."name", "users"."id" FROM "users") AS "users" GROUP BY "users"."id") AS "users" ON "vehicles"."user_id" = "users"."id""#
        ));
    }

    #[test]
    fn test_filters_and_order_inside_derived_table() {
        let snapshot = snapshot();
        let stmt = compile(
            &snapshot,
            "users",
            "select=id&age=gte.18&or=(name.like.A*,name.like.B*)&order=age.desc",
        )
        .unwrap();
        assert!(stmt.text.ends_with(
            r#"FROM "users" WHERE "users"."age" >= ? AND ("users"."name" LIKE ? OR "users"."name" LIKE ?) GROUP BY "users"."id" ORDER BY "users"."age" DESC) AS "users""#
        ));
        assert_eq!(stmt.args.len(), 3);
    }

    #[test]
    fn test_sibling_relations_are_aggregated_separately() {
        let snapshot = snapshot();
        let stmt = compile(&snapshot, "users", "select=id,vehicles(id),posts(id)&id=eq.1").unwrap();

        assert_eq!(stmt.text.matches("LEFT JOIN (").count(), 2);
        assert!(stmt.text.contains(r#"GROUP BY "vehicles"."user_id") AS "vehicles" ON "users"."id" = "vehicles"."user_id""#));
        assert!(stmt.text.contains(r#"GROUP BY "posts"."user_id") AS "posts" ON "users"."id" = "posts"."user_id""#));
        assert!(stmt.text.contains(
            r#"SELECT "users"."id", coalesce("vehicles"."vehicles", '[]') AS "vehicles", coalesce("posts"."posts", '[]') AS "posts" FROM "users""#
        ));
        // the root level only picks up finished arrays
        let root_list = &stmt.text[stmt.text.find("FROM (SELECT").unwrap()..stmt.text.find(r#"FROM "users""#).unwrap()];
        assert!(!root_list.contains("json_group_array"));
        assert_eq!(stmt.args, vec![Value::from("1")]);
    }

    #[test]
    fn test_embedded_filter_and_order_apply_inside_relation() {
        let snapshot = snapshot();
        let stmt = compile(
            &snapshot,
            "users",
            "select=id,vehicles(id)&vehicles.year=gt.2000&order=vehicles.year.desc",
        )
        .unwrap();
        assert!(stmt.text.contains(
            r#"FROM (SELECT "vehicles"."id", "vehicles"."user_id" FROM "vehicles" WHERE "vehicles"."year" > ? ORDER BY "vehicles"."user_id", "vehicles"."year" DESC) AS "vehicles""#
        ));
        assert!(stmt.text.ends_with(
            r#"WHERE "vehicles"."user_id" IS NOT NULL GROUP BY "users"."id") AS "users""#
        ));
        assert_eq!(stmt.args, vec![Value::from("2000")]);
    }

    #[test]
    fn test_arguments_follow_placeholder_order() {
        let snapshot = snapshot();
        let stmt = compile(
            &snapshot,
            "users",
            "select=id,vehicles(id),posts(title)&age=gt.30&posts.title=like.A*&vehicles.year=eq.2020",
        )
        .unwrap();
        // vehicles joins first, then posts, then the root WHERE
        assert_eq!(
            stmt.args,
            vec![Value::from("2020"), Value::from("A*"), Value::from("30")]
        );
        assert!(stmt.text.contains(
            r#"WHERE "users"."age" > ? AND "vehicles"."user_id" IS NOT NULL AND "posts"."user_id" IS NOT NULL GROUP BY"#
        ));
    }

    #[test]
    fn test_or_group_across_tables_rejected() {
        let snapshot = snapshot();
        let err = compile(
            &snapshot,
            "users",
            "select=id,vehicles(id)&or=(age.eq.1,vehicles.year.eq.2000)",
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidFilter(_)));
    }

    #[test]
    fn test_filter_on_nested_relation_rejected() {
        let snapshot = snapshot();
        let err = compile(
            &snapshot,
            "users",
            "select=id,vehicles(id,cars(id))&cars.id=eq.1",
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidFilter(_)));
    }

    #[test]
    fn test_table_without_primary_key_groups_by_rowid() {
        let snapshot = snapshot();
        let stmt = compile(&snapshot, "logs", "").unwrap();
        assert!(stmt.text.contains(r#"GROUP BY "logs".rowid"#));
    }

    #[test]
    fn test_missing_relationship() {
        let snapshot = snapshot();
        let err = compile(&snapshot, "users", "select=logs(message)").unwrap_err();
        assert!(matches!(
            err,
            Error::MissingRelationship { table, other } if table == "logs" && other == "users"
        ));
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let snapshot = snapshot();
        let query = "select=id,vehicles(id,cars(*))&age=lt.30";
        let first = compile(&snapshot, "users", query).unwrap();
        let second = compile(&snapshot, "users", query).unwrap();
        assert_eq!(first, second);
    }
}
