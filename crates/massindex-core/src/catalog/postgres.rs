//! PostgreSQL catalog
//!
//! Each entity type maps to a table with a single-column primary key. Integer keys
//! (`smallint`, `integer`, `bigint`) are read as [`EntityId::Int`]; every other key type
//! is carried as text and cast back to the column type when bound.
//!
//! Scans run inside a read-only `REPEATABLE READ` transaction on one pooled connection
//! and page through the table by key (`ORDER BY id LIMIT fetch_size`), so rows inserted
//! after the scan was opened are never seen. Documents are the row as `jsonb`.
//!
//! The snapshot is a [`sqlx::Transaction`]: a scan dropped without `close()` rolls back
//! before its connection is handed out again.

use async_trait::async_trait;
use massindex_common::types::{EntityId, FilterPredicate, IdKind, IdentifierField};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, QueryBuilder, Row, Transaction};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use tracing::debug;

use super::{EntityCatalog, OrderedScan, ScanProjection, ScanRequest, ScannedRow};
use crate::error::{CatalogError, ResourceReleaseError};

/// Resource name reported by [`PgScan::close`]
pub const SNAPSHOT_RESOURCE: &str = "snapshot";

const ID_ALIAS: &str = "__massindex_id";
const DOC_ALIAS: &str = "__massindex_doc";

const INTEGER_TYPES: &[&str] = &["int2", "int4", "int8"];

/// Primary key and column types of one table
#[derive(Debug, Clone)]
struct TableInfo {
    identifier: IdentifierField,
    /// column name -> `format_type` output
    columns: HashMap<String, String>,
}

/// [`EntityCatalog`] backed by a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgCatalog {
    pool: PgPool,
    tables: Arc<RwLock<HashMap<String, TableInfo>>>,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tables: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn table_info(&self, entity_type: &str) -> Result<TableInfo, CatalogError> {
        let cached = self
            .tables
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(entity_type)
            .cloned();
        if let Some(info) = cached {
            return Ok(info);
        }

        let qualified = qualified_table(entity_type);
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(&qualified)
            .fetch_one(&self.pool)
            .await?;
        if !exists {
            return Err(CatalogError::UnknownEntityType(entity_type.to_string()));
        }

        let key_rows = sqlx::query(
            r#"
            SELECT a.attname::text AS name,
                   format_type(a.atttypid, a.atttypmod) AS sql_type,
                   t.typname::text AS type_name
            FROM pg_index i
            JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
            JOIN pg_type t ON t.oid = a.atttypid
            WHERE i.indrelid = $1::regclass AND i.indisprimary
            "#,
        )
        .bind(&qualified)
        .fetch_all(&self.pool)
        .await?;

        let key = match key_rows.as_slice() {
            [] => {
                return Err(CatalogError::NoIdentifier {
                    entity_type: entity_type.to_string(),
                    reason: "table has no primary key".to_string(),
                })
            }
            [key] => key,
            _ => {
                return Err(CatalogError::NoIdentifier {
                    entity_type: entity_type.to_string(),
                    reason: format!("composite primary key of {} columns", key_rows.len()),
                })
            }
        };

        let name: String = key.try_get("name")?;
        let sql_type: String = key.try_get("sql_type")?;
        let type_name: String = key.try_get("type_name")?;
        let kind = if INTEGER_TYPES.contains(&type_name.as_str()) {
            IdKind::Integer
        } else {
            IdKind::Text
        };

        let column_rows = sqlx::query(
            r#"
            SELECT attname::text AS name, format_type(atttypid, atttypmod) AS sql_type
            FROM pg_attribute
            WHERE attrelid = $1::regclass AND attnum > 0 AND NOT attisdropped
            "#,
        )
        .bind(&qualified)
        .fetch_all(&self.pool)
        .await?;

        let mut columns = HashMap::with_capacity(column_rows.len());
        for row in &column_rows {
            columns.insert(row.try_get::<String, _>("name")?, row.try_get::<String, _>("sql_type")?);
        }

        let info = TableInfo {
            identifier: IdentifierField { name, kind, sql_type },
            columns,
        };
        debug!(
            entity_type,
            identifier = %info.identifier.name,
            kind = %info.identifier.kind,
            "Resolved primary key"
        );

        self.tables
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(entity_type.to_string(), info.clone());
        Ok(info)
    }
}

#[async_trait]
impl EntityCatalog for PgCatalog {
    async fn identifier_field(&self, entity_type: &str) -> Result<IdentifierField, CatalogError> {
        Ok(self.table_info(entity_type).await?.identifier)
    }

    async fn row_count(&self, entity_type: &str, filters: &[FilterPredicate]) -> Result<u64, CatalogError> {
        let info = self.table_info(entity_type).await?;
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM ");
        builder.push(qualified_table(entity_type)).push(" t WHERE TRUE");
        push_filters(&mut builder, &info, filters)?;

        let count: i64 = builder.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn open_scan(&self, request: ScanRequest) -> Result<Box<dyn OrderedScan>, CatalogError> {
        let info = self.table_info(&request.entity_type).await?;
        for bound in [request.lower.as_ref(), request.upper.as_ref()].into_iter().flatten() {
            if bound.kind() != info.identifier.kind {
                return Err(CatalogError::IdentifierMismatch {
                    entity_type: request.entity_type.clone(),
                    reason: format!("bound {bound} is not of kind {}", info.identifier.kind),
                });
            }
        }
        // Reject bad filters before taking a connection
        push_filters(&mut QueryBuilder::new(""), &info, &request.filters)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgScan {
            info,
            request,
            tx: Some(tx),
            buffer: VecDeque::new(),
            fetched_through: None,
            returned: 0,
            exhausted: false,
        }))
    }
}

/// Key-paginated scan inside a read-only snapshot
pub struct PgScan {
    info: TableInfo,
    request: ScanRequest,
    tx: Option<Transaction<'static, Postgres>>,
    buffer: VecDeque<ScannedRow>,
    /// Identifier of the last row pulled from the database
    fetched_through: Option<EntityId>,
    returned: u64,
    exhausted: bool,
}

impl PgScan {
    fn remaining(&self) -> Option<u64> {
        self.request
            .max_results
            .map(|max| max.saturating_sub(self.returned + self.buffer.len() as u64))
    }

    fn order_column(&self) -> String {
        format!("t.{}", quote_ident(&self.info.identifier.name))
    }

    fn select(&self, with_documents: bool) -> QueryBuilder<'static, Postgres> {
        let id_column = self.order_column();
        let id_expr = match self.info.identifier.kind {
            IdKind::Integer => format!("{id_column}::bigint"),
            IdKind::Text => format!("{id_column}::text"),
        };
        let doc_expr = if with_documents {
            "to_jsonb(t)"
        } else {
            "NULL::jsonb"
        };

        let mut builder = QueryBuilder::new(format!(
            "SELECT {id_expr} AS {ID_ALIAS}, {doc_expr} AS {DOC_ALIAS} FROM {} t WHERE TRUE",
            qualified_table(&self.request.entity_type)
        ));

        match &self.fetched_through {
            Some(last) => push_id_condition(&mut builder, &self.info.identifier, ">", last),
            None => {
                if let Some(lower) = &self.request.lower {
                    push_id_condition(&mut builder, &self.info.identifier, ">=", lower);
                }
            }
        }
        if let Some(upper) = &self.request.upper {
            push_id_condition(&mut builder, &self.info.identifier, "<", upper);
        }
        builder
    }

    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>, CatalogError> {
        self.tx.as_mut().ok_or(CatalogError::ScanClosed)
    }

    fn decode(&self, row: &PgRow) -> Result<ScannedRow, CatalogError> {
        let id = match self.info.identifier.kind {
            IdKind::Integer => EntityId::Int(row.try_get(ID_ALIAS)?),
            IdKind::Text => EntityId::Text(row.try_get(ID_ALIAS)?),
        };
        let document: Option<Value> = row.try_get(DOC_ALIAS)?;
        Ok(ScannedRow {
            id,
            document: document.unwrap_or(Value::Null),
        })
    }

    async fn fetch_page(&mut self) -> Result<(), CatalogError> {
        let mut limit = self.request.fetch_size.max(1) as u64;
        if let Some(remaining) = self.remaining() {
            limit = limit.min(remaining);
        }
        if limit == 0 {
            self.exhausted = true;
            return Ok(());
        }

        let mut builder = self.select(self.request.projection == ScanProjection::Entities);
        push_filters(&mut builder, &self.info, &self.request.filters)?;
        builder
            .push(" ORDER BY ")
            .push(self.order_column())
            .push(" LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));

        let rows = builder.build().fetch_all(&mut **self.tx()?).await?;
        if (rows.len() as u64) < limit {
            self.exhausted = true;
        }
        for row in &rows {
            let scanned = self.decode(row)?;
            self.fetched_through = Some(scanned.id.clone());
            self.buffer.push_back(scanned);
        }
        Ok(())
    }
}

#[async_trait]
impl OrderedScan for PgScan {
    async fn next(&mut self) -> Result<Option<ScannedRow>, CatalogError> {
        if self.tx.is_none() {
            return Err(CatalogError::ScanClosed);
        }
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch_page().await?;
        }
        let row = self.buffer.pop_front();
        if row.is_some() {
            self.returned += 1;
        }
        Ok(row)
    }

    async fn advance(&mut self, rows: u64) -> Result<Option<EntityId>, CatalogError> {
        if rows == 0 {
            return Ok(None);
        }
        let mut pending = rows;
        while let Some(row) = self.buffer.pop_front() {
            self.returned += 1;
            pending -= 1;
            if pending == 0 {
                return Ok(Some(row.id));
            }
        }
        if self.exhausted || self.remaining().is_some_and(|remaining| remaining < pending) {
            self.exhausted = true;
            return Ok(None);
        }

        let mut builder = self.select(false);
        push_filters(&mut builder, &self.info, &self.request.filters)?;
        builder
            .push(" ORDER BY ")
            .push(self.order_column())
            .push(" OFFSET ")
            .push_bind(i64::try_from(pending - 1).unwrap_or(i64::MAX))
            .push(" LIMIT 1");

        let row = builder.build().fetch_optional(&mut **self.tx()?).await?;
        match row {
            Some(row) => {
                let landed = self.decode(&row)?;
                self.fetched_through = Some(landed.id.clone());
                self.returned += pending;
                Ok(Some(landed.id))
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> Vec<ResourceReleaseError> {
        let mut failures = Vec::new();
        self.buffer.clear();
        let Some(tx) = self.tx.take() else {
            return failures;
        };

        // On failure the dropped transaction queues a rollback; the pool discards the
        // connection if that rollback fails too
        if let Err(e) = tx.commit().await {
            failures.push(ResourceReleaseError::new(SNAPSHOT_RESOURCE, e.into()));
        }
        failures
    }
}

/// Quote one SQL identifier
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified table name (`schema.table`)
pub fn qualified_table(entity_type: &str) -> String {
    entity_type.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

fn push_id_condition(
    builder: &mut QueryBuilder<'static, Postgres>,
    identifier: &IdentifierField,
    op: &str,
    value: &EntityId,
) {
    builder
        .push(" AND t.")
        .push(quote_ident(&identifier.name))
        .push(format!(" {op} "));
    match value {
        EntityId::Int(v) => {
            builder.push_bind(*v);
        }
        EntityId::Text(v) => {
            builder.push("CAST(").push_bind(v.clone()).push(format!(" AS {})", identifier.sql_type));
        }
    }
}

fn push_filters(
    builder: &mut QueryBuilder<'_, Postgres>,
    info: &TableInfo,
    filters: &[FilterPredicate],
) -> Result<(), CatalogError> {
    for filter in filters {
        match filter {
            FilterPredicate::Raw { expression } => {
                builder.push(" AND (").push(expression.clone()).push(")");
            }
            FilterPredicate::Equals { field, value } if value.is_null() => {
                column_type(info, field, filter)?;
                builder.push(" AND t.").push(quote_ident(field)).push(" IS NULL");
            }
            FilterPredicate::Equals { field, value } => {
                let sql_type = column_type(info, field, filter)?;
                builder.push(" AND t.").push(quote_ident(field)).push(" = ");
                push_json_value(builder, value, sql_type, filter)?;
            }
            FilterPredicate::Compare { field, op, value } => {
                let sql_type = column_type(info, field, filter)?;
                builder
                    .push(" AND t.")
                    .push(quote_ident(field))
                    .push(format!(" {} ", op.as_sql()));
                push_json_value(builder, value, sql_type, filter)?;
            }
        }
    }
    Ok(())
}

fn column_type<'a>(info: &'a TableInfo, field: &str, filter: &FilterPredicate) -> Result<&'a str, CatalogError> {
    info.columns
        .get(field)
        .map(String::as_str)
        .ok_or_else(|| CatalogError::UnsupportedPredicate(format!("{filter}: unknown column {field}")))
}

fn push_json_value(
    builder: &mut QueryBuilder<'_, Postgres>,
    value: &Value,
    sql_type: &str,
    filter: &FilterPredicate,
) -> Result<(), CatalogError> {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => {
                builder.push_bind(i);
            }
            None => {
                builder.push_bind(n.as_f64().unwrap_or(f64::NAN));
            }
        },
        Value::Bool(b) => {
            builder.push_bind(*b);
        }
        Value::String(s) => {
            builder.push("CAST(").push_bind(s.clone()).push(format!(" AS {sql_type})"));
        }
        _ => {
            return Err(CatalogError::UnsupportedPredicate(format!(
                "{filter}: only scalar values can be compared"
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use massindex_common::types::CompareOp;

    fn employee_info() -> TableInfo {
        TableInfo {
            identifier: IdentifierField::integer("id"),
            columns: HashMap::from([
                ("id".to_string(), "bigint".to_string()),
                ("hired".to_string(), "date".to_string()),
                ("salary".to_string(), "integer".to_string()),
            ]),
        }
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("Employee"), "\"Employee\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(qualified_table("hr.Employee"), "\"hr\".\"Employee\"");
    }

    #[test]
    fn test_filters_render_with_binds_and_casts() {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT 1 FROM t WHERE TRUE");
        let filters = vec![
            FilterPredicate::compare("salary", CompareOp::Ge, 300),
            FilterPredicate::equals("hired", "2020-01-01"),
            FilterPredicate::equals("salary", Value::Null),
            FilterPredicate::raw("salary % 2 = 0"),
        ];
        push_filters(&mut builder, &employee_info(), &filters).unwrap();

        assert_eq!(
            builder.sql(),
            "SELECT 1 FROM t WHERE TRUE AND t.\"salary\" >= $1 AND t.\"hired\" = CAST($2 AS date) \
             AND t.\"salary\" IS NULL AND (salary % 2 = 0)"
        );
    }

    #[test]
    fn test_unknown_filter_column_is_rejected() {
        let mut builder = QueryBuilder::<Postgres>::new("");
        let err = push_filters(
            &mut builder,
            &employee_info(),
            &[FilterPredicate::equals("nickname", "bob")],
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::UnsupportedPredicate(_)));
    }

    #[test]
    fn test_text_bounds_are_cast_to_column_type() {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT 1 FROM t WHERE TRUE");
        let identifier = IdentifierField {
            name: "id".to_string(),
            kind: IdKind::Text,
            sql_type: "uuid".to_string(),
        };
        push_id_condition(&mut builder, &identifier, ">=", &EntityId::from("a1"));
        assert_eq!(builder.sql(), "SELECT 1 FROM t WHERE TRUE AND t.\"id\" >= CAST($1 AS uuid)");
    }
}
