//! Decodes a Postgres row into the artifact's typed JSON shape. Duplicates
//! the small `column_value`/`row_to_json` pair already private to
//! `forge-exec` and `forge-jobs` — C11's rule evaluator and C12's job
//! resolver each need this independently of the HTTP read paths here, so
//! the crate stays DB-free where it can and this stays a crate-local
//! helper rather than a shared dependency.

use chrono::{DateTime, Utc};
use forge_emit::ArtifactEntity;
use serde_json::{Map, Value as Json};
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row};
use uuid::Uuid;

fn column_value<T>(row: &PgRow, name: &str, nullable: bool) -> Result<Json, sqlx::Error>
where
    T: for<'r> sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres> + serde::Serialize,
{
    if nullable {
        let value: Option<T> = row.try_get(name)?;
        Ok(serde_json::to_value(value).unwrap_or(Json::Null))
    } else {
        let value: T = row.try_get(name)?;
        Ok(serde_json::to_value(value).unwrap_or(Json::Null))
    }
}

pub fn row_to_json(row: &PgRow, entity: &ArtifactEntity) -> Result<Json, sqlx::Error> {
    let mut map = Map::new();
    for field in &entity.fields {
        let value = match field.ty.as_str() {
            "bool" => column_value::<bool>(row, &field.name, field.nullable)?,
            "int" => column_value::<i64>(row, &field.name, field.nullable)?,
            "float" => column_value::<f64>(row, &field.name, field.nullable)?,
            "uuid" => column_value::<Uuid>(row, &field.name, field.nullable)?,
            "time" => column_value::<DateTime<Utc>>(row, &field.name, field.nullable)?,
            _ => column_value::<String>(row, &field.name, field.nullable)?,
        };
        map.insert(field.name.clone(), value);
    }
    Ok(Json::Object(map))
}
