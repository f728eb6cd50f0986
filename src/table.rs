//! Table declaration helpers: columns bound to data generators, DDL and
//! insert construction, and a parallel bulk loader for seeding tables.

use std::cmp::min;
use std::collections::HashMap;

use anyhow::{Context, Result};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use mysql_async::{Params, Value};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::generator::{ColumnGenerator, DataGenerator};
use crate::random::Rand;

/// Rows inserted per INSERT statement by the bulk loader.
const LOADER_BATCH_ROWS: u64 = 200;
/// Rows covered by one loader task before handing off to the next.
const LOADER_PARTITION_ROWS: u64 = 20_000;

pub struct Column {
    /// Name of the column.
    pub name: String,

    /// SQL definition of the column, e.g. `VARCHAR(255) NOT NULL`.
    pub definition: String,

    /// Produces this column's values.
    pub generator: ColumnGenerator,
}

impl Column {
    pub fn new(
        name: impl Into<String>,
        definition: impl Into<String>,
        generator: impl Into<ColumnGenerator>,
    ) -> Self {
        Self {
            name: name.into(),
            definition: definition.into(),
            generator: generator.into(),
        }
    }
}

/// A table declaration: ordered columns with their generators, key structure,
/// and options. Immutable once built; shared between workloads so generators
/// with internal counters stay consistent across inserts and lookups.
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
    pub indices: Vec<Vec<String>>,
    pub unique_keys: Vec<Vec<String>>,

    /// Additional options appended to the CREATE TABLE statement, such as
    /// compression or auto increment settings.
    pub table_options: String,

    column_index: HashMap<String, usize>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        let column_index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();

        Self {
            name: name.into(),
            columns,
            primary_key: Vec::new(),
            indices: Vec::new(),
            unique_keys: Vec::new(),
            table_options: String::new(),
            column_index,
        }
    }

    pub fn with_primary_key(mut self, columns: Vec<&str>) -> Self {
        self.primary_key = columns.into_iter().map(String::from).collect();
        self
    }

    pub fn with_index(mut self, columns: Vec<&str>) -> Self {
        self.indices
            .push(columns.into_iter().map(String::from).collect());
        self
    }

    pub fn with_unique_key(mut self, columns: Vec<&str>) -> Self {
        self.unique_keys
            .push(columns.into_iter().map(String::from).collect());
        self
    }

    pub fn with_table_options(mut self, options: impl Into<String>) -> Self {
        self.table_options = options.into();
        self
    }

    fn column(&self, name: &str) -> &Column {
        let idx = *self
            .column_index
            .get(name)
            .unwrap_or_else(|| panic!("table {} has no column named {name}", self.name));
        &self.columns[idx]
    }

    /// Generates a new value for the named column.
    pub fn generate(&self, r: &mut Rand, column: &str) -> Value {
        self.column(column).generator.generate(r)
    }

    /// Samples an existing value for the named column, for WHERE clauses.
    pub fn sample_existing(&self, r: &mut Rand, column: &str) -> Value {
        self.column(column).generator.sample_existing(r)
    }

    pub fn create_table_query(&self) -> String {
        let mut parts = self
            .columns
            .iter()
            .map(|c| format!("`{}` {}", c.name, c.definition))
            .collect::<Vec<_>>();

        parts.push(format!(
            "PRIMARY KEY ({})",
            self.primary_key.iter().map(|c| format!("`{c}`")).join(",")
        ));

        for index in &self.indices {
            parts.push(format!(
                "KEY ({})",
                index.iter().map(|c| format!("`{c}`")).join(",")
            ));
        }

        for index in &self.unique_keys {
            parts.push(format!(
                "UNIQUE KEY ({})",
                index.iter().map(|c| format!("`{c}`")).join(",")
            ));
        }

        let mut query = format!("CREATE TABLE `{}` ({})", self.name, parts.join(","));
        if !self.table_options.is_empty() {
            query.push(' ');
            query.push_str(&self.table_options);
        }

        query
    }

    pub fn drop_table_query(&self) -> String {
        format!("DROP TABLE IF EXISTS `{}`", self.name)
    }

    /// The INSERT statement text for `batch_size` rows of this table, with
    /// one placeholder per column.
    pub fn insert_statement(&self, batch_size: usize) -> String {
        let row = format!(
            "({})",
            std::iter::repeat("?").take(self.columns.len()).join(",")
        );

        format!(
            "INSERT INTO `{}` (`{}`) VALUES {}",
            self.name,
            self.columns.iter().map(|c| &c.name).join("`,`"),
            std::iter::repeat(row).take(batch_size).join(",")
        )
    }

    /// Generates the parameters for [`insert_statement`]
    /// (Self::insert_statement): `batch_size` rows of generated column
    /// values, with individual columns optionally pinned via `overrides`.
    pub fn insert_args(
        &self,
        r: &mut Rand,
        batch_size: usize,
        overrides: Option<&HashMap<String, Value>>,
    ) -> Vec<Value> {
        let mut args = Vec::with_capacity(self.columns.len() * batch_size);
        for _ in 0..batch_size {
            for column in &self.columns {
                let value = overrides
                    .and_then(|o| o.get(&column.name).cloned())
                    .unwrap_or_else(|| column.generator.generate(r));
                args.push(value);
            }
        }

        args
    }

    /// Builds a complete single-use insert: statement text plus generated
    /// parameters.
    pub fn insert_query(
        &self,
        r: &mut Rand,
        batch_size: usize,
        overrides: Option<&HashMap<String, Value>>,
    ) -> (String, Vec<Value>) {
        (
            self.insert_statement(batch_size),
            self.insert_args(r, batch_size, overrides),
        )
    }

    /// Drops and recreates the table, then seeds it with `total_rows` rows of
    /// generated data using `concurrency` parallel loader tasks (16 if 0 is
    /// given, so callers can pass the benchmark's `--concurrency` default
    /// through).
    pub async fn reload_data(
        &self,
        database: &DatabaseConfig,
        total_rows: u64,
        concurrency: usize,
    ) -> Result<()> {
        let concurrency = if concurrency == 0 { 16 } else { concurrency };

        info!(
            table = %self.name,
            total_rows,
            concurrency,
            "reloading data"
        );

        let mut conn = database.connection().await?;
        conn.query_drop(self.drop_table_query()).await?;
        conn.query_drop(self.create_table_query()).await?;
        conn.close().await?;

        let progress = ProgressBar::new(total_rows);
        progress.set_style(
            ProgressStyle::with_template(
                "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>9}/{len:9} {msg}",
            )
            .unwrap()
            .progress_chars("##-"),
        );
        progress.set_message(self.name.clone());

        let partitions = (0..total_rows)
            .step_by(LOADER_PARTITION_ROWS as usize)
            .map(|start| min(LOADER_PARTITION_ROWS, total_rows - start));

        let mut tasks = futures::stream::iter(
            partitions.map(|rows| self.load_partition(database, rows, progress.clone())),
        )
        .buffer_unordered(concurrency);

        while let Some(task) = tasks.next().await {
            task?;
        }

        progress.finish();
        info!(table = %self.name, total_rows, "data reloaded");

        Ok(())
    }

    async fn load_partition(
        &self,
        database: &DatabaseConfig,
        rows: u64,
        progress: ProgressBar,
    ) -> Result<()> {
        let mut conn = database.connection().await?;
        let mut r = Rand::new();

        let batch_stmt = conn.prep(self.insert_statement(LOADER_BATCH_ROWS as usize)).await?;

        let mut rows_remaining = rows;
        while rows_remaining > 0 {
            let batch = min(LOADER_BATCH_ROWS, rows_remaining);
            let args = self.insert_args(&mut r, batch as usize, None);

            if batch == LOADER_BATCH_ROWS {
                conn.exec_drop(&batch_stmt, Params::Positional(args)).await
            } else {
                let tail_stmt = conn.prep(self.insert_statement(batch as usize)).await?;
                conn.exec_drop(&tail_stmt, Params::Positional(args)).await
            }
            .with_context(|| format!("inserting {batch} rows into {}", self.name))?;

            progress.inc(batch);
            rows_remaining -= batch;
        }

        conn.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::generator::{AutoIncrementGenerator, NullGenerator, UniformIntGenerator};

    use super::*;

    fn test_table() -> Table {
        Table::new(
            "users",
            vec![
                Column::new("id", "BIGINT NOT NULL", AutoIncrementGenerator::new(0, 0)),
                Column::new("age", "INT", UniformIntGenerator::new(0, 100)),
                Column::new("bio", "TEXT", NullGenerator),
            ],
        )
        .with_primary_key(vec!["id"])
        .with_index(vec!["age"])
        .with_table_options("ENGINE=InnoDB")
    }

    #[test]
    fn create_table_query_lists_columns_and_keys() {
        assert_eq!(
            test_table().create_table_query(),
            "CREATE TABLE `users` (`id` BIGINT NOT NULL,`age` INT,`bio` TEXT,\
             PRIMARY KEY (`id`),KEY (`age`)) ENGINE=InnoDB"
        );
    }

    #[test]
    fn drop_table_query_is_idempotent() {
        assert_eq!(
            test_table().drop_table_query(),
            "DROP TABLE IF EXISTS `users`"
        );
    }

    #[test]
    fn insert_statement_repeats_placeholders_per_row() {
        assert_eq!(
            test_table().insert_statement(2),
            "INSERT INTO `users` (`id`,`age`,`bio`) VALUES (?,?,?),(?,?,?)"
        );
    }

    #[test]
    fn insert_args_generates_one_value_per_placeholder() {
        let table = test_table();
        let mut r = Rand::new();

        let args = table.insert_args(&mut r, 3, None);
        assert_eq!(args.len(), 9);
        assert_eq!(args[0], Value::Int(1));
        assert_eq!(args[3], Value::Int(2));
        assert_eq!(args[2], Value::NULL);
    }

    #[test]
    fn insert_args_applies_overrides() {
        let table = test_table();
        let mut r = Rand::new();

        let overrides = HashMap::from([("age".to_string(), Value::Int(42))]);
        let args = table.insert_args(&mut r, 2, Some(&overrides));
        assert_eq!(args[1], Value::Int(42));
        assert_eq!(args[4], Value::Int(42));
    }

    #[test]
    fn generate_dispatches_by_column_name() {
        let table = test_table();
        let mut r = Rand::new();

        assert_eq!(table.generate(&mut r, "id"), Value::Int(1));
        assert_eq!(table.sample_existing(&mut r, "bio"), Value::NULL);
    }

    #[test]
    #[should_panic(expected = "no column named")]
    fn unknown_column_panics() {
        test_table().generate(&mut Rand::new(), "nope");
    }
}
