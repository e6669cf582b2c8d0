//! One logical operation against a connection, optionally inside a
//! transaction.
//!
//! Mapped operations render their SQL from the type's [`ColumnCollection`]
//! and run it as a cached statement. Events carry the invocation label, which
//! defaults to `<table>_<operation>`; the statement is cached under
//! [`statement_id`], which also names the mapped type, so two types mapped
//! onto one table never share a statement. Every executed statement emits one
//! [`QueryEvent`](crate::QueryEvent) to the connection's observer.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::collection::{self, ColumnCollection};
use crate::connection::Connection;
use crate::driver::{Driver, SessionOf};
use crate::error::{DbError, DbResult};
use crate::event::EventKind;
use crate::meta::{Mapped, columns, table_name_of};
use crate::row::Row;
use crate::sql;
use crate::statement::Prepared;
use crate::transaction::Transaction;
use crate::value::Value;

/// The statement cache id of a mapped operation on `T` labelled `label`.
pub fn statement_id<T: Mapped>(label: &str) -> String {
    format!("{}/{}", std::any::type_name::<T>(), label)
}

/// A configured operation. Build one with [`Connection::invoke`] or
/// [`Connection::in_tx`], then call exactly one operation on it.
pub struct Invocation<'a, D: Driver> {
    conn: &'a Connection<D>,
    tx: Option<&'a Transaction<SessionOf<D>>>,
    label: Option<String>,
    timeout: Option<Duration>,
}

impl<'a, D: Driver> Invocation<'a, D> {
    pub(crate) fn new(conn: &'a Connection<D>, tx: Option<&'a Transaction<SessionOf<D>>>) -> Self {
        Self {
            conn,
            tx,
            label: None,
            timeout: None,
        }
    }

    /// Label reported in events.
    ///
    /// A label also names the cached statement, so on raw SQL it must
    /// identify one SQL text. Raw [`exec`](Self::exec) and
    /// [`query`](Self::query) calls are only cached when labelled. Mapped
    /// operations cache under [`statement_id`] of their type and label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Bound the whole operation by `timeout`.
    ///
    /// On expiry the in-flight statement is dropped and its session returns
    /// to the pool.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The label, if one was set.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn label_for(&self, table: &str, operation: &str) -> String {
        match self.label {
            Some(ref label) => label.clone(),
            None => format!("{}_{}", table, operation),
        }
    }

    async fn bounded<R>(&self, fut: impl Future<Output = DbResult<R>>) -> DbResult<R> {
        match self.timeout {
            None => fut.await,
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                DbError::execution(format!("operation timed out after {:?}", limit))
            })?,
        }
    }

    async fn prepare(&self, cache_id: Option<&str>, sql: &str) -> DbResult<Prepared<'a, SessionOf<D>>> {
        match cache_id {
            Some(id) => self.conn.prepare_cached(id, sql, self.tx).await,
            None => self.conn.prepare(sql, self.tx).await,
        }
    }

    /// Forget a cached statement that failed. A connection error moves the
    /// whole cache to a fresh session instead.
    async fn discard(&self, cache_id: Option<&str>, generation: Option<u64>, err: &DbError) {
        let Some(generation) = generation else {
            return;
        };
        if err.is_connection() {
            self.conn.replace_cache_session(generation).await;
        } else if let (Some(id), Some(cache)) = (cache_id, self.conn.statement_cache()) {
            cache.invalidate(id);
        }
    }

    async fn run_exec(
        &self,
        cache_id: Option<&str>,
        label: &str,
        sql: &str,
        params: &[Value],
    ) -> DbResult<u64> {
        let start = Instant::now();
        let result = async {
            let prepared = self.prepare(cache_id, sql).await?;
            debug!(label, sql, params = params.len(), "executing statement");
            let result = prepared.execute(params).await;
            if let Err(ref e) = result {
                let generation = prepared.generation();
                drop(prepared);
                self.discard(cache_id, generation, e).await;
            }
            result
        }
        .await
        .map_err(|e| e.with_sql(sql));

        self.conn
            .fire_event(EventKind::Exec, sql, label, start.elapsed(), result.as_ref().err());
        result
    }

    async fn run_query(
        &self,
        cache_id: Option<&str>,
        label: &str,
        sql: &str,
        params: &[Value],
    ) -> DbResult<Vec<Row>> {
        let start = Instant::now();
        let result = async {
            let prepared = self.prepare(cache_id, sql).await?;
            debug!(label, sql, params = params.len(), "running query");
            let result = prepared.query(params).await;
            if let Err(ref e) = result {
                let generation = prepared.generation();
                drop(prepared);
                self.discard(cache_id, generation, e).await;
            }
            result
        }
        .await
        .map_err(|e| e.with_sql(sql));

        self.conn
            .fire_event(EventKind::Query, sql, label, start.elapsed(), result.as_ref().err());
        result
    }

    /// Run a statement for its effect. Returns the affected row count.
    pub async fn exec(self, sql: &str, params: &[Value]) -> DbResult<u64> {
        let label = self.label.clone().unwrap_or_default();
        let cache_id = self.label.as_deref();
        self.bounded(self.run_exec(cache_id, &label, sql, params))
            .await
            .map_err(|e| e.with_operation("exec"))
    }

    /// Run a statement and collect its rows.
    pub async fn query(self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        let label = self.label.clone().unwrap_or_default();
        let cache_id = self.label.as_deref();
        self.bounded(self.run_query(cache_id, &label, sql, params))
            .await
            .map_err(|e| e.with_operation("query"))
    }

    /// Run a statement and map every row into a new `T`, matching row
    /// columns to mapped columns by name.
    pub async fn query_as<T: Mapped + Default>(self, sql: &str, params: &[Value]) -> DbResult<Vec<T>> {
        let op = async {
            let cols = columns::<T>();
            let label = self.label.clone().unwrap_or_default();
            let rows = self
                .run_query(self.label.as_deref(), &label, sql, params)
                .await?;
            rows.iter()
                .map(|row| {
                    let mut object = T::default();
                    populate_by_name(&cols, &mut object, row)?;
                    Ok(object)
                })
                .collect()
        };
        self.bounded(op).await.map_err(context::<T>("query_as"))
    }

    /// Run a statement and map its first row into `object`. Returns whether a
    /// row came back.
    pub async fn query_first<T: Mapped>(
        self,
        object: &mut T,
        sql: &str,
        params: &[Value],
    ) -> DbResult<bool> {
        let op = async {
            let cols = columns::<T>();
            let label = self.label.clone().unwrap_or_default();
            let rows = self
                .run_query(self.label.as_deref(), &label, sql, params)
                .await?;
            match rows.first() {
                Some(row) => populate_by_name(&cols, object, row).map(|_| true),
                None => Ok(false),
            }
        };
        self.bounded(op).await.map_err(context::<T>("query_first"))
    }

    /// Load `object` by primary key.
    ///
    /// `ids` are given in primary key declaration order. A missing row
    /// returns `false` and leaves `object` untouched.
    pub async fn get<T: Mapped>(self, object: &mut T, ids: &[Value]) -> DbResult<bool> {
        let op = async {
            let cols = columns::<T>();
            let pks = cols.primary_keys();
            if pks.is_empty() {
                return Err(DbError::mapping("type has no primary key columns"));
            }
            if ids.len() != pks.len() {
                return Err(DbError::mapping(format!(
                    "expected {} primary key values, got {}",
                    pks.len(),
                    ids.len()
                )));
            }

            let table = table_name_of::<T>();
            let label = self.label_for(&table, "get");
            let id = statement_id::<T>(&label);
            let sql = sql::select_by_keys(&table, &cols);
            let rows = self.run_query(Some(&id), &label, &sql, ids).await?;
            match rows.into_iter().next() {
                Some(row) => populate(&cols, object, row).map(|_| true),
                None => Ok(false),
            }
        };
        self.bounded(op).await.map_err(context::<T>("get"))
    }

    /// Load every row of `T`'s table.
    pub async fn get_all<T: Mapped + Default>(self) -> DbResult<Vec<T>> {
        let op = async {
            let cols = columns::<T>();
            let table = table_name_of::<T>();
            let label = self.label_for(&table, "get_all");
            let id = statement_id::<T>(&label);
            let sql = sql::select_all(&table, &cols);
            let rows = self.run_query(Some(&id), &label, &sql, &[]).await?;
            rows.into_iter()
                .map(|row| {
                    let mut object = T::default();
                    populate(&cols, &mut object, row)?;
                    Ok(object)
                })
                .collect()
        };
        self.bounded(op).await.map_err(context::<T>("get_all"))
    }

    /// Insert `object`'s write columns.
    ///
    /// Generated columns are read back into `object` when the insert
    /// succeeds.
    pub async fn create<T: Mapped>(self, object: &mut T) -> DbResult<()> {
        let op = async {
            let cols = columns::<T>();
            let table = table_name_of::<T>();
            let label = self.label_for(&table, "create");
            let id = statement_id::<T>(&label);
            let sql = sql::insert(&table, &cols, 1);
            let params = cols.write_columns().column_values(object)?;

            let autos = cols.autos();
            if autos.is_empty() {
                self.run_exec(Some(&id), &label, &sql, &params).await?;
                return Ok(());
            }

            let rows = self.run_query(Some(&id), &label, &sql, &params).await?;
            let row = rows
                .into_iter()
                .next()
                .ok_or_else(|| DbError::execution("insert returned no generated values"))?;
            autos.set_values(object, row.into_values())
        };
        self.bounded(op).await.map_err(context::<T>("create"))
    }

    /// Insert `objects` with a single statement.
    ///
    /// Generated values are assigned in input order. They are all converted
    /// before any object is written, so a mapping failure leaves every
    /// object untouched.
    pub async fn create_many<T: Mapped>(self, objects: &mut [T]) -> DbResult<()> {
        let op = async {
            if objects.is_empty() {
                return Ok(());
            }
            let cols = columns::<T>();
            let write = cols.write_columns();
            if write.is_empty() {
                return Err(DbError::mapping(
                    "type has no write columns to insert in bulk",
                ));
            }

            let table = table_name_of::<T>();
            let label = format!("{}_{}", self.label_for(&table, "create_many"), objects.len());
            let id = statement_id::<T>(&label);
            let sql = sql::insert(&table, &cols, objects.len());
            let mut params = Vec::with_capacity(write.len() * objects.len());
            for object in objects.iter() {
                params.extend(write.column_values(object)?);
            }

            let autos = cols.autos();
            if autos.is_empty() {
                self.run_exec(Some(&id), &label, &sql, &params).await?;
                return Ok(());
            }

            let rows = self.run_query(Some(&id), &label, &sql, &params).await?;
            if rows.len() != objects.len() {
                return Err(DbError::execution(format!(
                    "insert returned {} rows for {} objects",
                    rows.len(),
                    objects.len()
                )));
            }
            let assignments = rows
                .into_iter()
                .map(|row| autos.prepare_values(row.into_values()))
                .collect::<DbResult<Vec<_>>>()?;
            for (object, assignments) in objects.iter_mut().zip(assignments) {
                collection::apply(object, assignments);
            }
            Ok(())
        };
        self.bounded(op).await.map_err(context::<T>("create_many"))
    }

    /// Insert `object` unless a row with its primary key exists. Returns
    /// whether a row was inserted.
    pub async fn create_if_not_exists<T: Mapped>(self, object: &mut T) -> DbResult<bool> {
        let op = async {
            let cols = columns::<T>();
            let table = table_name_of::<T>();
            let label = self.label_for(&table, "create_if_not_exists");
            let id = statement_id::<T>(&label);
            let sql = sql::insert_if_not_exists(&table, &cols);
            let params = cols.write_columns().column_values(object)?;

            let autos = cols.autos();
            if autos.is_empty() {
                let affected = self.run_exec(Some(&id), &label, &sql, &params).await?;
                return Ok(affected > 0);
            }

            let rows = self.run_query(Some(&id), &label, &sql, &params).await?;
            match rows.into_iter().next() {
                Some(row) => autos.set_values(object, row.into_values()).map(|_| true),
                None => Ok(false),
            }
        };
        self.bounded(op).await.map_err(context::<T>("create_if_not_exists"))
    }

    /// Update `object`'s write columns by primary key. Returns the affected
    /// row count.
    pub async fn update<T: Mapped>(self, object: &T) -> DbResult<u64> {
        let op = async {
            let cols = columns::<T>();
            if cols.primary_keys().is_empty() {
                return Err(DbError::mapping("type has no primary key columns"));
            }
            if cols.write_columns().is_empty() {
                return Err(DbError::mapping("type has no write columns to update"));
            }

            let table = table_name_of::<T>();
            let label = self.label_for(&table, "update");
            let id = statement_id::<T>(&label);
            let sql = sql::update(&table, &cols);
            let mut params = cols.write_columns().column_values(object)?;
            params.extend(cols.primary_keys().column_values(object)?);
            self.run_exec(Some(&id), &label, &sql, &params).await
        };
        self.bounded(op).await.map_err(context::<T>("update"))
    }

    /// Insert `object`, or overwrite the existing row with the same primary
    /// key.
    ///
    /// Generated columns returned by the statement are read back into
    /// `object`.
    pub async fn upsert<T: Mapped>(self, object: &mut T) -> DbResult<()> {
        let op = async {
            let cols = columns::<T>();
            if cols.primary_keys().is_empty() {
                return Err(DbError::mapping("type has no primary key columns"));
            }

            let table = table_name_of::<T>();
            let label = self.label_for(&table, "upsert");
            let id = statement_id::<T>(&label);
            let sql = sql::upsert(self.conn.upsert_strategy(), &table, &cols);
            let params = cols.update_columns().column_values(object)?;

            let autos = cols.autos();
            if autos.is_empty() {
                self.run_exec(Some(&id), &label, &sql, &params).await?;
                return Ok(());
            }

            let rows = self.run_query(Some(&id), &label, &sql, &params).await?;
            match rows.into_iter().next() {
                Some(row) => autos.set_values(object, row.into_values()),
                None => Ok(()),
            }
        };
        self.bounded(op).await.map_err(context::<T>("upsert"))
    }

    /// Delete `object` by primary key. Returns the affected row count.
    pub async fn delete<T: Mapped>(self, object: &T) -> DbResult<u64> {
        let op = async {
            let cols = columns::<T>();
            if cols.primary_keys().is_empty() {
                return Err(DbError::mapping("type has no primary key columns"));
            }

            let table = table_name_of::<T>();
            let label = self.label_for(&table, "delete");
            let id = statement_id::<T>(&label);
            let sql = sql::delete(&table, &cols);
            let params = cols.primary_keys().column_values(object)?;
            self.run_exec(Some(&id), &label, &sql, &params).await
        };
        self.bounded(op).await.map_err(context::<T>("delete"))
    }

    /// Check whether a row with `object`'s primary key exists.
    pub async fn exists<T: Mapped>(self, object: &T) -> DbResult<bool> {
        let op = async {
            let cols = columns::<T>();
            if cols.primary_keys().is_empty() {
                return Err(DbError::mapping("type has no primary key columns"));
            }

            let table = table_name_of::<T>();
            let label = self.label_for(&table, "exists");
            let id = statement_id::<T>(&label);
            let sql = sql::exists(&table, &cols);
            let params = cols.primary_keys().column_values(object)?;
            let rows = self.run_query(Some(&id), &label, &sql, &params).await?;
            Ok(!rows.is_empty())
        };
        self.bounded(op).await.map_err(context::<T>("exists"))
    }

    /// Remove every row of `T`'s table.
    pub async fn truncate<T: Mapped>(self) -> DbResult<()> {
        let op = async {
            let table = table_name_of::<T>();
            let label = self.label_for(&table, "truncate");
            let sql = sql::truncate(&table);

            let start = Instant::now();
            let result = self
                .conn
                .batch_execute(&sql, self.tx)
                .await
                .map_err(|e| e.with_sql(&sql));
            self.conn
                .fire_event(EventKind::Exec, &sql, &label, start.elapsed(), result.as_ref().err());
            result
        };
        self.bounded(op).await.map_err(context::<T>("truncate"))
    }
}

fn context<T: Mapped>(operation: &'static str) -> impl FnOnce(DbError) -> DbError {
    move |e| e.with_operation(operation).with_model(table_name_of::<T>())
}

/// Fill `object` from a row holding every column in collection order.
fn populate<T: Mapped>(cols: &ColumnCollection<T>, object: &mut T, row: Row) -> DbResult<()> {
    if let Some(result) = object.hydrate(&row) {
        return result;
    }
    cols.set_values(object, row.into_values())
}

/// Fill `object` from a row of arbitrary shape.
fn populate_by_name<T: Mapped>(cols: &ColumnCollection<T>, object: &mut T, row: &Row) -> DbResult<()> {
    if let Some(result) = object.hydrate(row) {
        return result;
    }
    cols.set_by_name(object, row)
}
