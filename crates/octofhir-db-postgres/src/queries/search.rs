//! Search execution (C6 executing C7's translated predicate, §4.5, §4.6).
//!
//! [`octofhir_search::translate`] turns a query string into a WHERE-clause
//! fragment over the `resource` JSONB column plus its positional
//! parameters; this module ANDs that fragment with the tenant/current/
//! deleted predicates every search carries and runs it against the schema
//! the resource type routes to.

use octofhir_config::resource_registry::ResourceRegistry;
use octofhir_search::{SearchParameterRegistry, SqlParam, translate};
use octofhir_storage::{SearchParams, SearchResult, StorageError, TotalMode};
use sqlx_postgres::PgPool;

use crate::queries::crud::row_to_resource;
use crate::schema::SchemaManager;

fn map_sqlx(err: sqlx_core::Error) -> StorageError {
    crate::error::PostgresError::from(err).into()
}

/// Reassembles a [`SearchParams`]'s raw `(code, values)` pairs back into a
/// single query string, since [`translate`] parses from a query string and
/// the `FhirStorage` trait hands search parameters pre-split (§4.6).
fn params_to_query_string(params: &SearchParams) -> String {
    let mut pairs = Vec::new();
    for (code, values) in &params.parameters {
        for value in values {
            pairs.push(format!(
                "{}={}",
                urlencoding_lite(code),
                urlencoding_lite(value)
            ));
        }
    }
    if let Some(count) = params.count {
        pairs.push(format!("_count={count}"));
    }
    if let Some(offset) = params.offset {
        pairs.push(format!("_offset={offset}"));
    }
    if let Some(sort) = &params.sort {
        let fields: Vec<String> = sort
            .iter()
            .map(|s| {
                if s.descending {
                    format!("-{}", s.field)
                } else {
                    s.field.clone()
                }
            })
            .collect();
        if !fields.is_empty() {
            pairs.push(format!("_sort={}", fields.join(",")));
        }
    }
    pairs.join("&")
}

fn urlencoding_lite(s: &str) -> String {
    s.replace('&', "%26").replace('=', "%3D")
}

/// Executes a search for `resource_type` scoped to `tenant_id`.
#[allow(clippy::too_many_arguments)]
pub async fn search(
    pool: &PgPool,
    schema: &str,
    registry: &SearchParameterRegistry,
    resource_registry: &ResourceRegistry,
    tenant_id: i64,
    resource_type: &str,
    params: &SearchParams,
    default_count: usize,
    max_count: usize,
) -> Result<SearchResult, StorageError> {
    let table = SchemaManager::table_name(schema).map_err(|e| StorageError::internal(e.to_string()))?;
    let query_string = params_to_query_string(params);

    let translated = translate(resource_type, registry, resource_registry, &query_string, default_count, max_count)
        .map_err(|e| StorageError::invalid_resource(e.to_string()))?;

    let mut where_clause = "tenant_id = $1 AND resource_type = $2 AND is_current AND NOT is_deleted".to_string();
    if let Some(predicate) = translated.predicate() {
        // The translated predicate numbers its placeholders from $1; shift
        // them past the two fixed leading binds.
        let shifted = shift_placeholders(&predicate, 2);
        where_clause.push_str(" AND (");
        where_clause.push_str(&shifted);
        where_clause.push(')');
    }

    let order_by = if translated.sort.is_empty() {
        "last_updated DESC, resource_id ASC".to_string()
    } else {
        translated
            .sort
            .iter()
            .map(|(field, desc)| {
                let column = match field.as_str() {
                    "_lastUpdated" => "last_updated".to_string(),
                    "_id" => "resource_id".to_string(),
                    other => format!("resource->>'{other}'"),
                };
                format!("{column} {}", if *desc { "DESC" } else { "ASC" })
            })
            .collect::<Vec<_>>()
            .join(", ")
    };

    let sql = format!(
        "SELECT * FROM {table} WHERE {where_clause} ORDER BY {order_by} LIMIT ${} OFFSET ${}",
        translated.sql_builder.param_count() + 3,
        translated.sql_builder.param_count() + 4,
    );

    let mut query = sqlx_core::query::query(&sql).bind(tenant_id).bind(resource_type);
    for param in translated.sql_builder.params() {
        query = bind_sql_param(query, param);
    }
    let rows = query
        .bind(translated.count as i64)
        .bind(translated.offset as i64)
        .fetch_all(pool)
        .await
        .map_err(map_sqlx)?;

    let entries = rows
        .iter()
        .map(row_to_resource)
        .collect::<Result<Vec<_>, _>>()?;

    let total = match params.total.unwrap_or_default() {
        TotalMode::None => None,
        TotalMode::Accurate | TotalMode::Estimate => {
            let count_sql = format!("SELECT COUNT(*) FROM {table} WHERE {where_clause}");
            let mut count_query = sqlx_core::query::query_scalar::<_, i64>(&count_sql)
                .bind(tenant_id)
                .bind(resource_type);
            for param in translated.sql_builder.params() {
                count_query = bind_scalar_param(count_query, param);
            }
            let total: i64 = count_query.fetch_one(pool).await.map_err(map_sqlx)?;
            Some(total as u32)
        }
    };

    let has_more = match total {
        Some(total) => (translated.offset + entries.len()) < total as usize,
        None => entries.len() >= translated.count && translated.count > 0,
    };

    Ok(SearchResult {
        entries,
        total,
        has_more,
    })
}

/// Rewrites `$1`, `$2`, ... placeholders in `predicate` to start at
/// `offset + 1`, since the translator numbers from 1 but our query already
/// reserves `$1`/`$2` for `tenant_id`/`resource_type`.
fn shift_placeholders(predicate: &str, offset: usize) -> String {
    let mut result = String::with_capacity(predicate.len());
    let bytes = predicate.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 1 {
                let n: usize = predicate[i + 1..j].parse().unwrap_or(0);
                result.push('$');
                result.push_str(&(n + offset).to_string());
                i = j;
                continue;
            }
        }
        result.push(bytes[i] as char);
        i += 1;
    }
    result
}

fn bind_sql_param<'q>(
    query: sqlx_core::query::Query<'q, sqlx_postgres::Postgres, sqlx_postgres::PgArguments>,
    param: &'q SqlParam,
) -> sqlx_core::query::Query<'q, sqlx_postgres::Postgres, sqlx_postgres::PgArguments> {
    match param {
        SqlParam::Text(s) => query.bind(s),
        SqlParam::Integer(i) => query.bind(i),
        SqlParam::Float(f) => query.bind(f),
        SqlParam::Boolean(b) => query.bind(b),
        SqlParam::Json(j) => query.bind(j),
        SqlParam::Timestamp(t) => query.bind(t),
    }
}

fn bind_scalar_param<'q>(
    query: sqlx_core::query_scalar::QueryScalar<'q, sqlx_postgres::Postgres, i64, sqlx_postgres::PgArguments>,
    param: &'q SqlParam,
) -> sqlx_core::query_scalar::QueryScalar<'q, sqlx_postgres::Postgres, i64, sqlx_postgres::PgArguments> {
    match param {
        SqlParam::Text(s) => query.bind(s),
        SqlParam::Integer(i) => query.bind(i),
        SqlParam::Float(f) => query.bind(f),
        SqlParam::Boolean(b) => query.bind(b),
        SqlParam::Json(j) => query.bind(j),
        SqlParam::Timestamp(t) => query.bind(t),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shift_placeholders_offsets_all_numbers() {
        assert_eq!(shift_placeholders("resource_id = $1", 2), "resource_id = $3");
        assert_eq!(
            shift_placeholders("a = $1 AND b = $2", 2),
            "a = $3 AND b = $4"
        );
    }

    #[test]
    fn params_to_query_string_round_trips_simple_pairs() {
        let params = SearchParams::new().with_param("name", "jane").with_count(5);
        let qs = params_to_query_string(&params);
        assert!(qs.contains("name=jane"));
        assert!(qs.contains("_count=5"));
    }
}
