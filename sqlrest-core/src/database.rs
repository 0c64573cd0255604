//! Database facade
//!
//! Ties request parsing, compilation and execution together. Every request
//! takes one snapshot from the cache and uses it for all of its parsing and
//! compilation, so an invalidation that lands mid-request is only seen by
//! the next one.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use sqlrest_common::config::{CompilerConfig, SqlRestConfig};
use sqlrest_common::error::{Error, Result};
use sqlrest_common::types::{Row, Value};

use crate::cache::SchemaCache;
use crate::compiler::QueryCompiler;
use crate::ddl::{ColumnDefinition, TableChanges};
use crate::filter::{parse_filters, Predicate, Scope};
use crate::mutation::Returning;
use crate::order::OrderSpec;
use crate::request::RequestParams;
use crate::schema::SchemaSnapshot;
use crate::select::SelectionNode;
use crate::statement::{placeholder_count, CompiledStatement};
use crate::store::Store;

pub struct Database {
    store: Arc<dyn Store>,
    cache: Arc<SchemaCache>,
    config: CompilerConfig,
}

impl Database {
    pub fn new(store: Arc<dyn Store>, cache: Arc<SchemaCache>, config: CompilerConfig) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    /// Open the schema cache for `store` and wrap both.
    pub fn open(store: Arc<dyn Store>, config: &SqlRestConfig) -> Result<Self> {
        let cache = SchemaCache::open(Arc::clone(&store), config.cache.clone())?;
        Ok(Self::new(store, Arc::new(cache), config.compiler.clone()))
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<SchemaCache> {
        &self.cache
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<SchemaSnapshot> {
        self.cache.get()
    }

    // ========================================================================
    // Compilation
    // ========================================================================

    pub fn compile_select(&self, table: &str, params: &RequestParams) -> Result<CompiledStatement> {
        let snapshot = self.cache.get();
        let compiler = QueryCompiler::new(&snapshot);
        let validator = compiler.validator();

        let selection = SelectionNode::parse(
            validator,
            table,
            params.select().unwrap_or_default(),
            self.config.max_embedding_depth,
        )?;
        let scope = Scope::selection(&selection);
        let filters = parse_filters(validator, &scope, params)?;
        let order = OrderSpec::parse(validator, &scope, params.order().unwrap_or_default())?;

        compiler.select(&selection, &filters, &order)
    }

    pub fn compile_insert(
        &self,
        table: &str,
        params: &RequestParams,
        body: &JsonValue,
    ) -> Result<CompiledStatement> {
        let snapshot = self.cache.get();
        let compiler = QueryCompiler::new(&snapshot);
        let returning = returning(&compiler, table, params)?;
        compiler.insert(table, body, &returning)
    }

    pub fn compile_upsert(
        &self,
        table: &str,
        params: &RequestParams,
        body: &JsonValue,
    ) -> Result<CompiledStatement> {
        let snapshot = self.cache.get();
        let compiler = QueryCompiler::new(&snapshot);
        let returning = returning(&compiler, table, params)?;
        compiler.upsert(table, body, &returning)
    }

    pub fn compile_update(
        &self,
        table: &str,
        params: &RequestParams,
        body: &JsonValue,
    ) -> Result<CompiledStatement> {
        let snapshot = self.cache.get();
        let compiler = QueryCompiler::new(&snapshot);
        let filters = mutation_filters(&compiler, table, params)?;
        let returning = returning(&compiler, table, params)?;
        compiler.update(table, body, &filters, &returning)
    }

    pub fn compile_delete(&self, table: &str, params: &RequestParams) -> Result<CompiledStatement> {
        let snapshot = self.cache.get();
        let compiler = QueryCompiler::new(&snapshot);
        let filters = mutation_filters(&compiler, table, params)?;
        if filters.is_empty() {
            return Err(Error::MissingWhereClause);
        }
        let returning = returning(&compiler, table, params)?;
        compiler.delete(table, &filters, &returning)
    }

    // ========================================================================
    // Execution
    // ========================================================================

    fn execute(&self, statement: &CompiledStatement) -> Result<Vec<Row>> {
        debug!(sql = %statement.text, args = statement.args.len(), "Executing statement");
        self.store.execute(&statement.text, &statement.args)
    }

    /// Run a select and return its JSON array of rows.
    pub fn select(&self, table: &str, params: &RequestParams) -> Result<JsonValue> {
        let statement = self.compile_select(table, params)?;
        let rows = self.execute(&statement)?;

        match rows.first().and_then(|row| row.get("data")) {
            Some(Value::Text(data)) => Ok(serde_json::from_str(data)?),
            Some(Value::Null) | None => Ok(JsonValue::Array(Vec::new())),
            Some(other) => Err(Error::StoreExecution(format!(
                "select returned {} instead of JSON text",
                other.type_name()
            ))),
        }
    }

    pub fn insert(&self, table: &str, params: &RequestParams, body: &JsonValue) -> Result<JsonValue> {
        let statement = self.compile_insert(table, params, body)?;
        self.execute_mutation(&statement)
    }

    pub fn upsert(&self, table: &str, params: &RequestParams, body: &JsonValue) -> Result<JsonValue> {
        let statement = self.compile_upsert(table, params, body)?;
        self.execute_mutation(&statement)
    }

    pub fn update(&self, table: &str, params: &RequestParams, body: &JsonValue) -> Result<JsonValue> {
        let statement = self.compile_update(table, params, body)?;
        self.execute_mutation(&statement)
    }

    pub fn delete(&self, table: &str, params: &RequestParams) -> Result<JsonValue> {
        let statement = self.compile_delete(table, params)?;
        self.execute_mutation(&statement)
    }

    /// Returned rows as a JSON array, empty without a RETURNING clause
    fn execute_mutation(&self, statement: &CompiledStatement) -> Result<JsonValue> {
        let rows = self.execute(statement)?;
        Ok(JsonValue::Array(rows.iter().map(Row::to_json).collect()))
    }

    // ========================================================================
    // Schema
    // ========================================================================

    pub fn create_table(
        &self,
        table: &str,
        columns: &BTreeMap<String, ColumnDefinition>,
    ) -> Result<()> {
        let snapshot = self.cache.get();
        let statement = QueryCompiler::new(&snapshot).create_table(table, columns)?;
        self.execute_ddl(&[statement])
    }

    pub fn alter_table(&self, table: &str, changes: &TableChanges) -> Result<()> {
        let snapshot = self.cache.get();
        let statements = QueryCompiler::new(&snapshot).alter_table(table, changes)?;
        self.execute_ddl(&statements)
    }

    pub fn drop_table(&self, table: &str) -> Result<()> {
        let snapshot = self.cache.get();
        let statement = QueryCompiler::new(&snapshot).drop_table(table)?;
        self.execute_ddl(&[statement])
    }

    /// Run caller-written schema SQL, such as an index or a view, and then
    /// rebuild the schema cache. The text is passed through as is; only the
    /// argument count is checked against its placeholders.
    pub fn execute_schema(&self, sql: &str, args: &[Value]) -> Result<()> {
        let expected = placeholder_count(sql);
        if expected != args.len() {
            return Err(Error::InvalidBody(format!(
                "statement has {expected} placeholders but {} arguments were given",
                args.len()
            )));
        }
        info!(sql = %sql, "Executing schema statement");
        self.execute_ddl(&[CompiledStatement::new(sql.to_string(), args.to_vec())])
    }

    /// Run DDL statements in order, then rebuild the schema cache. The cache
    /// is rebuilt even when a statement fails part way, since earlier
    /// statements may already have changed the schema.
    fn execute_ddl(&self, statements: &[CompiledStatement]) -> Result<()> {
        let outcome = statements
            .iter()
            .try_for_each(|statement| self.execute(statement).map(|_| ()));

        match (outcome, self.cache.invalidate()) {
            (Ok(()), invalidated) => invalidated.map(|_| ()),
            (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(cache_error)) => {
                warn!(error = %cache_error, "Schema cache rebuild failed after DDL error");
                Err(e)
            }
        }
    }

    pub fn invalidate_schema(&self) -> Result<()> {
        let snapshot = self.cache.invalidate()?;
        info!(tables = snapshot.table_count(), "Schema invalidated on request");
        Ok(())
    }
}

fn mutation_filters(
    compiler: &QueryCompiler<'_>,
    table: &str,
    params: &RequestParams,
) -> Result<Vec<Predicate>> {
    let table = compiler.validator().validate_table(table)?;
    parse_filters(compiler.validator(), &Scope::table(&table), params)
}

fn returning(compiler: &QueryCompiler<'_>, table: &str, params: &RequestParams) -> Result<Returning> {
    let table = compiler.validator().validate_table(table)?;
    Returning::parse(compiler.validator(), &table, params.select())
}
