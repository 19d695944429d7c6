//! The single composition pipeline behind every repository read.
//!
//! Every read shape (`get_entity`, `get_all`, `get_query`, `exists`,
//! `count`) is rendered here so filtering semantics cannot drift between
//! entry points.
//!
//! Stages, in order:
//! 1. include directives become `LEFT JOIN`s and extra selected columns;
//! 2. the predicate becomes the `WHERE` clause;
//! 3. ordering, always ending with the entity key as tiebreaker;
//! 4. skip, then take (`LIMIT`/`OFFSET`);
//! 5. the tracking mode is carried through for the executor.

use super::descriptor::{QueryDescriptor, SortDirection, Tracking};
use super::filter::{qualify, validate_identifier, Literal};
use crate::db::{StoreError, StoreResult};
use crate::entity::{relation_alias, Entity, Relation};

/// Result shape requested from the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// All matching rows.
    Rows,
    /// At most the first matching row.
    First,
    /// `SELECT EXISTS(...)`.
    Exists,
    /// `SELECT COUNT(*)` over the matching rows.
    Count,
}

/// Parameterized SQL plus the post-execution tracking decision.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedQuery {
    pub sql: String,
    pub binds: Vec<Literal>,
    pub tracking: Tracking,
    pub relations: Vec<&'static Relation>,
}

/// Composes `descriptor` for entity `T` into executable SQL.
pub fn compose<T: Entity>(
    descriptor: &QueryDescriptor,
    projection: Projection,
) -> StoreResult<ComposedQuery> {
    let root = T::TABLE;
    let relations = resolve_includes::<T>(descriptor)?;

    let mut select_list: Vec<String> = T::columns()
        .iter()
        .map(|column| format!("\"{root}\".\"{column}\" AS \"{column}\""))
        .collect();
    let mut joins = String::new();
    for relation in &relations {
        joins.push_str(&format!(
            " LEFT JOIN \"{table}\" AS \"{alias}\" ON \"{alias}\".\"{foreign}\" = \"{root}\".\"{local}\"",
            table = relation.table,
            alias = relation.name,
            foreign = relation.foreign_column,
            local = relation.local_column,
        ));
        for column in relation.columns {
            select_list.push(format!(
                "\"{}\".\"{column}\" AS \"{}\"",
                relation.name,
                relation_alias(relation.name, column)
            ));
        }
    }

    let mut binds = Vec::new();
    let mut where_clause = String::new();
    if let Some(predicate) = descriptor.predicate.as_ref() {
        for column in predicate.columns() {
            ensure_column_reachable(column, &relations)?;
        }
        let rendered = predicate
            .to_sql(root, &mut binds)
            .map_err(StoreError::MalformedPredicate)?;
        where_clause = format!(" WHERE {rendered}");
    }

    let mut ordering = Vec::with_capacity(descriptor.order_by.len() + 1);
    for order in &descriptor.order_by {
        ensure_column_reachable(&order.column, &relations)?;
        let column = qualify(root, &order.column).map_err(StoreError::MalformedPredicate)?;
        let direction = match order.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        ordering.push(format!("{column} {direction}"));
    }
    ordering.push(format!("\"{root}\".\"{}\" ASC", T::KEY));
    let order_clause = format!(" ORDER BY {}", ordering.join(", "));

    let take = match projection {
        Projection::First => 1,
        _ => descriptor.take,
    };
    let paging = paging_clause(descriptor.skip, take, &mut binds);

    let sql = match projection {
        Projection::Rows | Projection::First => format!(
            "SELECT {} FROM \"{root}\"{joins}{where_clause}{order_clause}{paging}",
            select_list.join(", ")
        ),
        Projection::Exists => format!(
            "SELECT EXISTS(SELECT 1 FROM \"{root}\"{joins}{where_clause}{order_clause}{paging})"
        ),
        Projection::Count => format!(
            "SELECT COUNT(*) FROM (SELECT 1 FROM \"{root}\"{joins}{where_clause}{order_clause}{paging})"
        ),
    };

    Ok(ComposedQuery {
        sql,
        binds,
        tracking: descriptor.tracking,
        relations,
    })
}

fn resolve_includes<T: Entity>(descriptor: &QueryDescriptor) -> StoreResult<Vec<&'static Relation>> {
    let mut relations: Vec<&'static Relation> = Vec::new();
    for include in &descriptor.includes {
        let relation = T::relation(&include.0).ok_or_else(|| StoreError::UnknownRelation {
            entity: T::TABLE,
            relation: include.0.clone(),
        })?;
        if relations.iter().any(|known| known.name == relation.name) {
            continue;
        }
        relations.push(relation);
    }
    Ok(relations)
}

fn ensure_column_reachable(column: &str, relations: &[&'static Relation]) -> StoreResult<()> {
    validate_identifier(column).map_err(StoreError::MalformedPredicate)?;
    if let Some((relation, _)) = column.split_once('.') {
        if !relations.iter().any(|known| known.name == relation) {
            return Err(StoreError::MalformedPredicate(format!(
                "column `{column}` references relation `{relation}` which is not included"
            )));
        }
    }
    Ok(())
}

fn paging_clause(skip: u64, take: u64, binds: &mut Vec<Literal>) -> String {
    let to_literal = |value: u64| Literal::Integer(i64::try_from(value).unwrap_or(i64::MAX));
    match (skip, take) {
        (0, 0) => String::new(),
        (0, take) => {
            binds.push(to_literal(take));
            " LIMIT ?".to_string()
        }
        (skip, 0) => {
            binds.push(to_literal(skip));
            " LIMIT -1 OFFSET ?".to_string()
        }
        (skip, take) => {
            binds.push(to_literal(take));
            binds.push(to_literal(skip));
            " LIMIT ? OFFSET ?".to_string()
        }
    }
}
