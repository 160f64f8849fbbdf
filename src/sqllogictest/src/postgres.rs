// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! A [`Harness`] backed by a PostgreSQL server.

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use tokio_postgres::types::Type;
use tokio_postgres::{Client, NoTls, Row};
use tracing::warn;

use crate::harness::{Harness, QueryResult};

/// Runs records against PostgreSQL. `init` connects on first use and drops
/// every table in the public schema.
pub struct PostgresHarness {
    url: String,
    client: Option<Client>,
}

impl PostgresHarness {
    pub fn new(url: &str) -> PostgresHarness {
        PostgresHarness {
            url: url.to_owned(),
            client: None,
        }
    }

    async fn connect(&mut self) -> Result<(), anyhow::Error> {
        let (client, connection) = tokio_postgres::connect(&self.url, NoTls)
            .await
            .context("connecting to postgres")?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!("postgres connection error: {}", err);
            }
        });
        self.client = Some(client);
        Ok(())
    }

    fn client(&self) -> Result<&Client, anyhow::Error> {
        self.client
            .as_ref()
            .ok_or_else(|| anyhow!("harness is not connected"))
    }

    async fn drop_all_tables(&self) -> Result<(), anyhow::Error> {
        let client = self.client()?;
        let rows = client
            .query(
                "SELECT tablename FROM pg_tables WHERE schemaname = 'public'",
                &[],
            )
            .await?;
        let table_names: Vec<String> = rows
            .iter()
            .map(|row| format!("\"{}\"", row.get::<_, String>(0)))
            .collect();
        if !table_names.is_empty() {
            client
                .execute(
                    &format!("DROP TABLE IF EXISTS {} CASCADE", table_names.join(", ")),
                    &[],
                )
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Harness for PostgresHarness {
    fn engine_str(&self) -> &str {
        "postgresql"
    }

    async fn init(&mut self) -> Result<(), anyhow::Error> {
        let connected = match &self.client {
            Some(client) => !client.is_closed(),
            None => false,
        };
        if !connected {
            self.connect().await?;
        }
        self.drop_all_tables().await
    }

    async fn execute_statement(&mut self, sql: &str) -> Result<(), anyhow::Error> {
        self.client()?.batch_execute(sql).await?;
        Ok(())
    }

    async fn execute_query(&mut self, sql: &str) -> Result<QueryResult, anyhow::Error> {
        let client = self.client()?;
        let stmt = client.prepare(sql).await?;
        let rows = client.query(&stmt, &[]).await?;

        let mut schema = String::new();
        for column in stmt.columns() {
            schema.push(type_char(column.type_())?);
        }

        let mut values = vec![];
        for row in &rows {
            for (i, column) in row.columns().iter().enumerate() {
                values.push(string_value(row, i, column.type_())?);
            }
        }

        Ok(QueryResult { schema, values })
    }
}

fn type_char(ty: &Type) -> Result<char, anyhow::Error> {
    Ok(match *ty {
        Type::BOOL | Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => 'I',
        Type::FLOAT4 | Type::FLOAT8 => 'R',
        Type::BPCHAR | Type::TEXT | Type::VARCHAR | Type::NAME => 'T',
        ref other => bail!("unhandled column type {}", other),
    })
}

/// Renders one cell: booleans as `1`/`0`, reals with exactly three
/// fractional digits, NULLs as the literal `NULL`.
fn string_value(row: &Row, i: usize, ty: &Type) -> Result<String, anyhow::Error> {
    let value = match *ty {
        Type::BOOL => row
            .try_get::<_, Option<bool>>(i)?
            .map(|v| if v { "1" } else { "0" }.to_owned()),
        Type::INT2 => row.try_get::<_, Option<i16>>(i)?.map(|v| v.to_string()),
        Type::INT4 => row.try_get::<_, Option<i32>>(i)?.map(|v| v.to_string()),
        Type::INT8 => row.try_get::<_, Option<i64>>(i)?.map(|v| v.to_string()),
        Type::OID => row.try_get::<_, Option<u32>>(i)?.map(|v| v.to_string()),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(i)?
            .map(|v| format!("{:.3}", v)),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(i)?
            .map(|v| format!("{:.3}", v)),
        Type::BPCHAR | Type::TEXT | Type::VARCHAR | Type::NAME => {
            row.try_get::<_, Option<String>>(i)?
        }
        ref other => bail!("unhandled column type {}", other),
    };
    Ok(value.unwrap_or_else(|| "NULL".to_owned()))
}
