//! Select queries and row filters.
//!
//! A [`Query`] describes what the services want (equality, pattern and
//! OR-group filters, ordering, a limit, one embedded foreign row); each
//! adapter turns it into its own wire form. [`Query::to_params`] renders the
//! PostgREST query string.

use serde_json::Value;
use uuid::Uuid;

use super::Table;

/// A row predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column = value`
    Eq(String, Value),
    /// Case-insensitive `LIKE`; `%` matches any run of characters.
    ILike(String, String),
    /// Any of the inner filters holds.
    AnyOf(Vec<Filter>),
}

impl Filter {
    /// Equality on a scalar column.
    #[must_use]
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self::Eq(column.to_owned(), value.into())
    }

    /// Equality on a UUID column.
    #[must_use]
    pub fn eq_id(column: &str, id: impl Into<Uuid>) -> Self {
        Self::Eq(column.to_owned(), Value::String(id.into().to_string()))
    }

    /// Case-insensitive pattern match.
    #[must_use]
    pub fn ilike(column: &str, pattern: impl Into<String>) -> Self {
        Self::ILike(column.to_owned(), pattern.into())
    }

    /// OR-group.
    #[must_use]
    pub const fn any_of(filters: Vec<Self>) -> Self {
        Self::AnyOf(filters)
    }

    /// PostgREST `(key, value)` query parameter for this filter.
    #[must_use]
    pub fn to_param(&self) -> (String, String) {
        match self {
            Self::Eq(column, value) => (column.clone(), format!("eq.{}", render_value(value))),
            Self::ILike(column, pattern) => (column.clone(), format!("ilike.{}", wildcard(pattern))),
            Self::AnyOf(filters) => ("or".to_owned(), format!("({})", render_group(filters))),
        }
    }

    /// Inline form used inside an `or=(...)` group.
    fn to_inline(&self) -> String {
        match self {
            Self::Eq(column, value) => format!("{column}.eq.{}", quote(&render_value(value))),
            Self::ILike(column, pattern) => format!("{column}.ilike.{}", quote(&wildcard(pattern))),
            Self::AnyOf(filters) => format!("or({})", render_group(filters)),
        }
    }
}

fn render_group(filters: &[Filter]) -> String {
    filters
        .iter()
        .map(Filter::to_inline)
        .collect::<Vec<_>>()
        .join(",")
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_owned(),
        other => other.to_string(),
    }
}

/// PostgREST accepts `*` as the LIKE wildcard in URLs.
fn wildcard(pattern: &str) -> String {
    pattern.replace('%', "*")
}

/// Double-quote values that would break the `or=(...)` grammar.
fn quote(value: &str) -> String {
    if value.contains([',', '(', ')', '"', '\\', ':']) {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_owned()
    }
}

/// Sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// One embedded foreign row, e.g. the product behind a cart line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Embed {
    /// Key under which the joined row appears in the result.
    pub alias: String,
    /// Table the foreign key points at.
    pub table: Table,
    /// Column on the selected table holding the foreign `id`.
    pub foreign_key: String,
}

/// A select query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub limit: Option<usize>,
    pub embed: Option<Embed>,
}

impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.to_owned(),
            ascending,
        });
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Join the row referenced by `foreign_key` and expose it as `alias`.
    #[must_use]
    pub fn embed(mut self, alias: &str, table: Table, foreign_key: &str) -> Self {
        self.embed = Some(Embed {
            alias: alias.to_owned(),
            table,
            foreign_key: foreign_key.to_owned(),
        });
        self
    }

    /// The `select=` clause: all columns plus the embedded row if any.
    #[must_use]
    pub fn select_clause(&self) -> String {
        self.embed.as_ref().map_or_else(
            || "*".to_owned(),
            |embed| format!("*,{}:{}(*)", embed.alias, embed.foreign_key),
        )
    }

    /// Render as PostgREST query parameters.
    ///
    /// Nulls sort last in both directions.
    #[must_use]
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_owned(), self.select_clause())];
        params.extend(self.filters.iter().map(Filter::to_param));

        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|o| {
                    let direction = if o.ascending { "asc" } else { "desc" };
                    format!("{}.{direction}.nullslast", o.column)
                })
                .collect::<Vec<_>>()
                .join(",");
            params.push(("order".to_owned(), order));
        }

        if let Some(limit) = self.limit {
            params.push(("limit".to_owned(), limit.to_string()));
        }

        params
    }
}

/// Render bare filters (for update/delete) as PostgREST parameters.
#[must_use]
pub fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters.iter().map(Filter::to_param).collect()
}
