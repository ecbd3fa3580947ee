//! In-process table store.
//!
//! Behaves like the hosted store closely enough to exercise the services:
//! generated ids and timestamps, the one-row-per-(scope, product) unique
//! constraints on cart and wishlist rows, the product foreign key, embedded
//! joins, and the `place_order` procedure, which writes the order header and
//! its lines under one lock so either both land or neither does.
//!
//! Every call is logged and faults can be injected per operation, which is
//! what the service tests use to check "no remote call issued" and
//! "failure leaves the snapshot unchanged".

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use bazaar_core::{Category, Email, Product, UserId};

use super::query::Embed;
use super::{
    Connector, Filter, Identity, PLACE_ORDER, Query, RemoteError, RemoteStore, Row, Table,
};

/// Kind of store operation, as recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
    Upsert,
    Rpc,
    CurrentUser,
    SignIn,
    SignOut,
}

/// One logged store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Call {
    pub operation: Operation,
    pub table: Option<Table>,
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    operation: Operation,
    table: Option<Table>,
}

struct Account {
    identity: Identity,
    password: String,
}

#[derive(Default)]
struct State {
    tables: HashMap<Table, Vec<Row>>,
    accounts: Vec<Account>,
    calls: Vec<Call>,
    faults: Vec<Fault>,
    offline: bool,
}

impl State {
    /// Log the call, then fail it if a fault is armed for it.
    fn enter(&mut self, operation: Operation, table: Option<Table>) -> Result<(), RemoteError> {
        self.calls.push(Call { operation, table });

        if self.offline {
            return Err(unavailable("store offline"));
        }

        let armed = self.faults.iter().position(|f| {
            f.operation == operation && (f.table.is_none() || f.table == table)
        });
        if let Some(index) = armed {
            self.faults.remove(index);
            return Err(unavailable("injected fault"));
        }
        Ok(())
    }

    fn table(&self, table: Table) -> &[Row] {
        self.tables.get(&table).map_or(&[], Vec::as_slice)
    }

    fn table_mut(&mut self, table: Table) -> &mut Vec<Row> {
        self.tables.entry(table).or_default()
    }

    fn has_id(&self, table: Table, id: &Value) -> bool {
        self.table(table)
            .iter()
            .any(|r| r.get("id").is_some_and(|v| values_equal(v, id)))
    }

    /// Fill generated columns and enforce constraints, then append.
    fn insert_row(&mut self, table: Table, mut row: Row) -> Result<Row, RemoteError> {
        let now = Value::String(Utc::now().to_rfc3339());
        row.entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        row.entry("created_at").or_insert_with(|| now.clone());
        if matches!(table, Table::CartItems | Table::WishlistItems) {
            row.entry("updated_at").or_insert(now);
        }

        self.check_constraints(table, &row, None)?;
        self.table_mut(table).push(row.clone());
        Ok(row)
    }

    /// Unique `(scope, product)` keys and the product foreign key.
    fn check_constraints(
        &self,
        table: Table,
        row: &Row,
        skip_index: Option<usize>,
    ) -> Result<(), RemoteError> {
        if !matches!(table, Table::CartItems | Table::WishlistItems) {
            return Ok(());
        }

        let product = row.get("product_id").cloned().unwrap_or(Value::Null);
        if !self.has_id(Table::Products, &product) {
            return Err(RemoteError::Conflict(format!(
                "{table}.product_id violates foreign key constraint"
            )));
        }

        for scope_column in ["user_id", "session_id"] {
            let key = [scope_column, "product_id"];
            if !has_non_null(row, &key) {
                continue;
            }
            let duplicate = self
                .table(table)
                .iter()
                .enumerate()
                .any(|(i, other)| Some(i) != skip_index && same_key(row, other, &key));
            if duplicate {
                return Err(RemoteError::Conflict(format!(
                    "duplicate key value violates unique constraint on {table}({scope_column}, product_id)"
                )));
            }
        }
        Ok(())
    }

    fn embed(&self, rows: &mut [Row], embed: &Embed) {
        for row in rows {
            let key = row.get(&embed.foreign_key).cloned().unwrap_or(Value::Null);
            let joined = self
                .table(embed.table)
                .iter()
                .find(|r| r.get("id").is_some_and(|v| values_equal(v, &key)))
                .map_or(Value::Null, |r| Value::Object(r.clone()));
            row.insert(embed.alias.clone(), joined);
        }
    }

    /// The order's `user_id` must be the signed-in caller.
    fn place_order(&mut self, args: &Value, caller: Option<&Identity>) -> Result<Value, RemoteError> {
        let order = args
            .get("p_order")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| bad_request("p_order must be an object"))?;

        let owner = order.get("user_id").unwrap_or(&Value::Null);
        if !caller.is_some_and(|identity| values_equal(owner, &json_id(identity))) {
            return Err(RemoteError::Unauthorized(
                "order user does not match the caller".to_owned(),
            ));
        }
        let items = args
            .get("p_items")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| bad_request("p_items must be an array"))?;

        if items.is_empty() {
            return Err(bad_request("an order needs at least one item"));
        }

        // Validate everything before the first write.
        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            let line = item
                .as_object()
                .cloned()
                .ok_or_else(|| bad_request("order item must be an object"))?;
            let product = line.get("product_id").cloned().unwrap_or(Value::Null);
            if !self.has_id(Table::Products, &product) {
                return Err(RemoteError::Conflict(
                    "order_items.product_id violates foreign key constraint".to_owned(),
                ));
            }
            lines.push(line);
        }

        let order = self.insert_row(Table::Orders, order)?;
        let order_id = order.get("id").cloned().unwrap_or(Value::Null);
        for mut line in lines {
            line.insert("order_id".to_owned(), order_id.clone());
            self.insert_row(Table::OrderItems, line)?;
        }
        Ok(order_id)
    }
}

fn unavailable(reason: &str) -> RemoteError {
    RemoteError::Api {
        status: 503,
        message: reason.to_owned(),
    }
}

fn json_id(identity: &Identity) -> Value {
    Value::String(identity.id.to_string())
}

fn bad_request(reason: &str) -> RemoteError {
    RemoteError::Api {
        status: 400,
        message: reason.to_owned(),
    }
}

fn has_non_null(row: &Row, columns: &[&str]) -> bool {
    columns
        .iter()
        .all(|c| row.get(*c).is_some_and(|v| !v.is_null()))
}

fn same_key(a: &Row, b: &Row, columns: &[&str]) -> bool {
    columns.iter().all(|c| match (a.get(*c), b.get(*c)) {
        (Some(x), Some(y)) => !x.is_null() && values_equal(x, y),
        _ => false,
    })
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), _) | (_, Value::Number(_)) => {
            matches!((as_number(a), as_number(b)), (Some(x), Some(y)) if (x - y).abs() < f64::EPSILON)
        }
        _ => a == b,
    }
}

/// Nulls last; numbers (including numeric strings) numerically; else text.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        (false, false) => {}
    }
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// Case-insensitive LIKE with `%` wildcards.
fn like_match(value: &str, pattern: &str) -> bool {
    let value = value.to_lowercase();
    let pattern = pattern.to_lowercase();
    let parts: Vec<&str> = pattern.split('%').collect();

    let (Some(first), Some(last)) = (parts.first(), parts.last()) else {
        return false;
    };
    if parts.len() == 1 {
        return value == pattern;
    }

    let Some(mut rest) = value.strip_prefix(first) else {
        return false;
    };
    for middle in parts.iter().skip(1).take(parts.len() - 2) {
        match rest.find(middle) {
            Some(at) => rest = rest.get(at + middle.len()..).unwrap_or_default(),
            None => return false,
        }
    }
    rest.ends_with(last)
}

fn matches(filter: &Filter, row: &Row) -> bool {
    match filter {
        Filter::Eq(column, expected) => row
            .get(column)
            .is_some_and(|actual| values_equal(actual, expected)),
        Filter::ILike(column, pattern) => row
            .get(column)
            .and_then(Value::as_str)
            .is_some_and(|actual| like_match(actual, pattern)),
        Filter::AnyOf(filters) => filters.iter().any(|f| matches(f, row)),
    }
}

fn matches_all(filters: &[Filter], row: &Row) -> bool {
    filters.iter().all(|f| matches(f, row))
}

fn to_row<T: serde::Serialize>(value: &T) -> Result<Row, RemoteError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(bad_request("record did not serialize to an object")),
    }
}

/// Shared tables behind every [`MemoryStore`] session.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert rows directly, bypassing the call log and faults.
    ///
    /// # Errors
    ///
    /// Returns a constraint error exactly as a regular insert would.
    pub async fn seed(&self, table: Table, rows: Vec<Row>) -> Result<(), RemoteError> {
        let mut state = self.state.lock().await;
        for row in rows {
            state.insert_row(table, row)?;
        }
        Ok(())
    }

    /// Seed the `products` table.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Parse` if a product fails to serialize.
    pub async fn seed_products(&self, products: &[Product]) -> Result<(), RemoteError> {
        let rows = products.iter().map(to_row).collect::<Result<Vec<_>, _>>()?;
        self.seed(Table::Products, rows).await
    }

    /// Seed the `categories` table.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Parse` if a category fails to serialize.
    pub async fn seed_categories(&self, categories: &[Category]) -> Result<(), RemoteError> {
        let rows = categories.iter().map(to_row).collect::<Result<Vec<_>, _>>()?;
        self.seed(Table::Categories, rows).await
    }

    /// Current contents of a table.
    pub async fn rows(&self, table: Table) -> Vec<Row> {
        self.state.lock().await.table(table).to_vec()
    }

    /// Create an account that [`RemoteStore::sign_in`] accepts.
    pub async fn register_user(&self, email: &Email, password: &str) -> Identity {
        let identity = Identity {
            id: UserId::random(),
            email: email.clone(),
        };
        self.state.lock().await.accounts.push(Account {
            identity: identity.clone(),
            password: password.to_owned(),
        });
        identity
    }

    /// Make the next matching call fail. `table: None` matches any table.
    pub async fn fail_next(&self, operation: Operation, table: Option<Table>) {
        self.state
            .lock()
            .await
            .faults
            .push(Fault { operation, table });
    }

    /// Fail every call until switched back.
    pub async fn set_offline(&self, offline: bool) {
        self.state.lock().await.offline = offline;
    }

    /// Every call made so far, in order.
    pub async fn calls(&self) -> Vec<Call> {
        self.state.lock().await.calls.clone()
    }

    /// Forget the call log.
    pub async fn reset_calls(&self) {
        self.state.lock().await.calls.clear();
    }
}

impl Connector for MemoryBackend {
    fn connect(&self) -> Arc<dyn RemoteStore> {
        Arc::new(MemoryStore {
            state: Arc::clone(&self.state),
            user: RwLock::new(None),
        })
    }
}

/// One session's view of a [`MemoryBackend`].
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    user: RwLock<Option<Identity>>,
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Row>, RemoteError> {
        // Suspend like a network call would.
        tokio::task::yield_now().await;
        let mut state = self.state.lock().await;
        state.enter(Operation::Select, Some(table))?;

        let mut rows: Vec<Row> = state
            .table(table)
            .iter()
            .filter(|r| matches_all(&query.filters, r))
            .cloned()
            .collect();

        rows.sort_by(|a, b| {
            query
                .order
                .iter()
                .map(|o| {
                    let x = a.get(&o.column).unwrap_or(&Value::Null);
                    let y = b.get(&o.column).unwrap_or(&Value::Null);
                    let ordering = compare_values(x, y);
                    // Nulls stay last when descending.
                    if o.ascending || x.is_null() || y.is_null() {
                        ordering
                    } else {
                        ordering.reverse()
                    }
                })
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        if let Some(embed) = &query.embed {
            state.embed(&mut rows, embed);
        }
        Ok(rows)
    }

    async fn insert(&self, table: Table, rows: Vec<Row>) -> Result<Vec<Row>, RemoteError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().await;
        state.enter(Operation::Insert, Some(table))?;

        // All-or-nothing, like a single INSERT statement.
        let snapshot = state.table(table).to_vec();
        let mut inserted = Vec::with_capacity(rows.len());
        for row in rows {
            match state.insert_row(table, row) {
                Ok(row) => inserted.push(row),
                Err(e) => {
                    *state.table_mut(table) = snapshot;
                    return Err(e);
                }
            }
        }
        Ok(inserted)
    }

    async fn update(
        &self,
        table: Table,
        filters: &[Filter],
        patch: Row,
    ) -> Result<(), RemoteError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().await;
        state.enter(Operation::Update, Some(table))?;
        if filters.is_empty() {
            return Err(bad_request("refusing unfiltered update"));
        }

        let now = Value::String(Utc::now().to_rfc3339());
        for row in state.table_mut(table).iter_mut() {
            if matches_all(filters, row) {
                row.extend(patch.clone());
                if row.contains_key("updated_at") {
                    row.insert("updated_at".to_owned(), now.clone());
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, table: Table, filters: &[Filter]) -> Result<(), RemoteError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().await;
        state.enter(Operation::Delete, Some(table))?;
        if filters.is_empty() {
            return Err(bad_request("refusing unfiltered delete"));
        }

        state.table_mut(table).retain(|row| !matches_all(filters, row));
        Ok(())
    }

    async fn upsert(&self, table: Table, row: Row, conflict: &[&str]) -> Result<(), RemoteError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().await;
        state.enter(Operation::Upsert, Some(table))?;

        let existing = state
            .table(table)
            .iter()
            .position(|other| same_key(&row, other, conflict));

        match existing {
            Some(index) => {
                let mut merged = state
                    .table(table)
                    .get(index)
                    .cloned()
                    .unwrap_or_default();
                merged.extend(row);
                merged.insert(
                    "updated_at".to_owned(),
                    Value::String(Utc::now().to_rfc3339()),
                );
                state.check_constraints(table, &merged, Some(index))?;
                if let Some(slot) = state.table_mut(table).get_mut(index) {
                    *slot = merged;
                }
                Ok(())
            }
            None => state.insert_row(table, row).map(|_| ()),
        }
    }

    async fn rpc(&self, function: &str, args: Value) -> Result<Value, RemoteError> {
        tokio::task::yield_now().await;
        let caller = self.user.read().await.clone();
        let mut state = self.state.lock().await;
        state.enter(Operation::Rpc, None)?;

        match function {
            PLACE_ORDER => state.place_order(&args, caller.as_ref()),
            other => Err(RemoteError::NotFound(format!("function {other}"))),
        }
    }

    async fn current_user(&self) -> Result<Option<Identity>, RemoteError> {
        self.state
            .lock()
            .await
            .enter(Operation::CurrentUser, None)?;
        Ok(self.user.read().await.clone())
    }

    async fn sign_in(&self, email: &Email, password: &str) -> Result<Identity, RemoteError> {
        let identity = {
            let mut state = self.state.lock().await;
            state.enter(Operation::SignIn, None)?;
            state
                .accounts
                .iter()
                .find(|a| a.identity.email == *email && a.password == password)
                .map(|a| a.identity.clone())
                .ok_or_else(|| RemoteError::Unauthorized("Invalid login credentials".to_owned()))?
        };
        *self.user.write().await = Some(identity.clone());
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), RemoteError> {
        self.state.lock().await.enter(Operation::SignOut, None)?;
        *self.user.write().await = None;
        Ok(())
    }
}
