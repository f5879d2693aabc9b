//! Change record types.
//!
//! A change record carries one row's pending mutation for a single logical
//! table, together with the bookkeeping the gateway needs to apply it:
//! which columns actually changed, whether the row has ever been applied
//! remotely, and the delete marker.
//!
//! Each table gets its own typed record shape. The closed [`RecordChange`]
//! enum and the shared [`Change`] trait replace string-keyed per-table
//! branching, so a table gaining or losing a column is a compile-time event.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of logical tables the pipeline reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Lists,
    Todos,
    Goals,
}

impl TableKind {
    /// All tables, in referential order (parents before todos).
    pub const ALL: [TableKind; 3] = [TableKind::Lists, TableKind::Goals, TableKind::Todos];

    /// The table's SQL name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Lists => "lists",
            TableKind::Todos => "todos",
            TableKind::Goals => "goals",
        }
    }

    /// Parse a table name.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "lists" => Ok(TableKind::Lists),
            "todos" => Ok(TableKind::Todos),
            "goals" => Ok(TableKind::Goals),
            other => Err(Error::UnknownTable(other.to_string())),
        }
    }
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of a column. Null binds must carry this: SQLite does not
/// care, but Postgres types every placeholder and rejects a text-typed
/// null against an integer or timestamp column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Bool,
    Int,
    Timestamp,
}

/// A typed column value, extracted from a change record for SQL binding.
///
/// The variants cover exactly the types the wire format carries: strings,
/// booleans, integers, and ISO-8601 timestamps. There is no implicit
/// coercion between them.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Text(String),
    Bool(bool),
    Int(i64),
    Timestamp(DateTime<Utc>),
    Null(ColumnType),
}

impl ColumnValue {
    fn from_text(value: &Option<String>) -> Self {
        value.as_ref().map_or(ColumnValue::Null(ColumnType::Text), |v| {
            ColumnValue::Text(v.clone())
        })
    }

    fn from_bool(value: &Option<bool>) -> Self {
        value.map_or(ColumnValue::Null(ColumnType::Bool), ColumnValue::Bool)
    }

    fn from_int(value: &Option<i64>) -> Self {
        value.map_or(ColumnValue::Null(ColumnType::Int), ColumnValue::Int)
    }

    fn from_timestamp(value: &Option<DateTime<Utc>>) -> Self {
        value.map_or(
            ColumnValue::Null(ColumnType::Timestamp),
            ColumnValue::Timestamp,
        )
    }
}

/// Common access to a change record regardless of table.
pub trait Change {
    /// Which table this record targets.
    fn table(&self) -> TableKind;

    /// The row's stable, client-generated identity.
    fn id(&self) -> &str;

    /// Whether this id has never been successfully applied remotely.
    fn is_new(&self) -> bool;

    /// The delete marker. Only todos carry one; list and goal deletion is
    /// expressed structurally.
    fn is_deleted(&self) -> bool;

    /// Column names changed since the last successful sync, in order.
    fn modified_columns(&self) -> &[String];

    /// Typed value of a known column. `None` means the column does not
    /// exist on this table; a null cell is `Some(ColumnValue::Null(_))`.
    fn column(&self, name: &str) -> Option<ColumnValue>;
}

/// Pending mutation of one `lists` row.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListChange {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub sort_order: Option<i64>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_columns: Vec<String>,
    #[serde(default)]
    pub new: bool,
}

impl Change for ListChange {
    fn table(&self) -> TableKind {
        TableKind::Lists
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn is_new(&self) -> bool {
        self.new
    }

    fn is_deleted(&self) -> bool {
        false
    }

    fn modified_columns(&self) -> &[String] {
        &self.modified_columns
    }

    fn column(&self, name: &str) -> Option<ColumnValue> {
        match name {
            "id" => Some(ColumnValue::Text(self.id.clone())),
            "name" => Some(ColumnValue::from_text(&self.name)),
            "color" => Some(ColumnValue::from_text(&self.color)),
            "sort_order" => Some(ColumnValue::from_int(&self.sort_order)),
            "created" => Some(ColumnValue::from_timestamp(&self.created)),
            "modified" => Some(ColumnValue::from_timestamp(&self.modified)),
            _ => None,
        }
    }
}

/// Pending mutation of one `todos` row.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoChange {
    pub id: String,
    #[serde(default)]
    pub list_id: Option<String>,
    #[serde(default)]
    pub goal_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub completed: Option<bool>,
    /// Soft/hard delete marker; see [`crate::disposition`].
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_columns: Vec<String>,
    #[serde(default)]
    pub new: bool,
}

impl Change for TodoChange {
    fn table(&self) -> TableKind {
        TableKind::Todos
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn is_new(&self) -> bool {
        self.new
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn modified_columns(&self) -> &[String] {
        &self.modified_columns
    }

    fn column(&self, name: &str) -> Option<ColumnValue> {
        match name {
            "id" => Some(ColumnValue::Text(self.id.clone())),
            "list_id" => Some(ColumnValue::from_text(&self.list_id)),
            "goal_id" => Some(ColumnValue::from_text(&self.goal_id)),
            "title" => Some(ColumnValue::from_text(&self.title)),
            "completed" => Some(ColumnValue::from_bool(&self.completed)),
            "deleted" => Some(ColumnValue::Bool(self.deleted)),
            "created" => Some(ColumnValue::from_timestamp(&self.created)),
            "modified" => Some(ColumnValue::from_timestamp(&self.modified)),
            _ => None,
        }
    }
}

/// Pending mutation of one `goals` row.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalChange {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub target_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_columns: Vec<String>,
    #[serde(default)]
    pub new: bool,
}

impl Change for GoalChange {
    fn table(&self) -> TableKind {
        TableKind::Goals
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn is_new(&self) -> bool {
        self.new
    }

    fn is_deleted(&self) -> bool {
        false
    }

    fn modified_columns(&self) -> &[String] {
        &self.modified_columns
    }

    fn column(&self, name: &str) -> Option<ColumnValue> {
        match name {
            "id" => Some(ColumnValue::Text(self.id.clone())),
            "title" => Some(ColumnValue::from_text(&self.title)),
            "description" => Some(ColumnValue::from_text(&self.description)),
            "target_date" => Some(ColumnValue::from_timestamp(&self.target_date)),
            "created" => Some(ColumnValue::from_timestamp(&self.created)),
            "modified" => Some(ColumnValue::from_timestamp(&self.modified)),
            _ => None,
        }
    }
}

/// A change record for any of the known tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", rename_all = "lowercase")]
pub enum RecordChange {
    Lists(ListChange),
    Todos(TodoChange),
    Goals(GoalChange),
}

impl RecordChange {
    /// Deserialize a record for a known table from its JSON payload, as
    /// stored in the outbox.
    pub fn from_json(table: TableKind, payload: &str) -> Result<Self> {
        let parse = |e: serde_json::Error| Error::InvalidPayload(e.to_string());
        match table {
            TableKind::Lists => serde_json::from_str(payload)
                .map(RecordChange::Lists)
                .map_err(parse),
            TableKind::Todos => serde_json::from_str(payload)
                .map(RecordChange::Todos)
                .map_err(parse),
            TableKind::Goals => serde_json::from_str(payload)
                .map(RecordChange::Goals)
                .map_err(parse),
        }
    }

    /// Serialize the bare record (without the table tag) for outbox storage.
    pub fn to_json(&self) -> Result<String> {
        let json = match self {
            RecordChange::Lists(c) => serde_json::to_string(c),
            RecordChange::Todos(c) => serde_json::to_string(c),
            RecordChange::Goals(c) => serde_json::to_string(c),
        };
        json.map_err(|e| Error::InvalidPayload(e.to_string()))
    }
}

impl Change for RecordChange {
    fn table(&self) -> TableKind {
        match self {
            RecordChange::Lists(c) => c.table(),
            RecordChange::Todos(c) => c.table(),
            RecordChange::Goals(c) => c.table(),
        }
    }

    fn id(&self) -> &str {
        match self {
            RecordChange::Lists(c) => c.id(),
            RecordChange::Todos(c) => c.id(),
            RecordChange::Goals(c) => c.id(),
        }
    }

    fn is_new(&self) -> bool {
        match self {
            RecordChange::Lists(c) => c.is_new(),
            RecordChange::Todos(c) => c.is_new(),
            RecordChange::Goals(c) => c.is_new(),
        }
    }

    fn is_deleted(&self) -> bool {
        match self {
            RecordChange::Lists(c) => c.is_deleted(),
            RecordChange::Todos(c) => c.is_deleted(),
            RecordChange::Goals(c) => c.is_deleted(),
        }
    }

    fn modified_columns(&self) -> &[String] {
        match self {
            RecordChange::Lists(c) => c.modified_columns(),
            RecordChange::Todos(c) => c.modified_columns(),
            RecordChange::Goals(c) => c.modified_columns(),
        }
    }

    fn column(&self, name: &str) -> Option<ColumnValue> {
        match self {
            RecordChange::Lists(c) => c.column(name),
            RecordChange::Todos(c) => c.column(name),
            RecordChange::Goals(c) => c.column(name),
        }
    }
}

/// A batch of change records grouped per table, the unit the gateway
/// applies in one transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Changeset {
    #[serde(default)]
    pub lists: Vec<ListChange>,
    #[serde(default)]
    pub todos: Vec<TodoChange>,
    #[serde(default)]
    pub goals: Vec<GoalChange>,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record, preserving per-table insertion order.
    pub fn push(&mut self, change: RecordChange) {
        match change {
            RecordChange::Lists(c) => self.lists.push(c),
            RecordChange::Todos(c) => self.todos.push(c),
            RecordChange::Goals(c) => self.goals.push(c),
        }
    }

    /// Total number of records across all tables.
    pub fn len(&self) -> usize {
        self.lists.len() + self.todos.len() + self.goals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whether a string is a well-formed row identifier (UUID-shaped).
///
/// Foreign-key references that fail this check are substituted with null
/// before they reach the authoritative store, so a garbled reference never
/// trips its referential-integrity constraints.
pub fn well_formed_id(value: &str) -> bool {
    uuid::Uuid::parse_str(value).is_ok()
}

/// A foreign-key reference the gateway nulled out because it was malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefSubstitution {
    pub table: TableKind,
    pub record_id: String,
    pub column: &'static str,
    pub value: String,
}

impl TodoChange {
    /// Null out malformed foreign-key references, returning what was
    /// substituted so the caller can log each one.
    pub fn sanitize_references(&mut self) -> Vec<RefSubstitution> {
        let mut substituted = Vec::new();
        let id = self.id.clone();
        for (column, slot) in [("list_id", &mut self.list_id), ("goal_id", &mut self.goal_id)] {
            if let Some(value) = slot.as_deref() {
                if !well_formed_id(value) {
                    substituted.push(RefSubstitution {
                        table: TableKind::Todos,
                        record_id: id.clone(),
                        column,
                        value: value.to_string(),
                    });
                    *slot = None;
                }
            }
        }
        substituted
    }
}

impl RecordChange {
    /// Null out malformed foreign-key references. Only todos carry
    /// references; other tables pass through unchanged.
    pub fn sanitize_references(&mut self) -> Vec<RefSubstitution> {
        match self {
            RecordChange::Todos(todo) => todo.sanitize_references(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn todo(id: &str) -> TodoChange {
        TodoChange {
            id: id.to_string(),
            title: Some("Buy milk".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn table_kind_roundtrip() {
        for table in TableKind::ALL {
            assert_eq!(TableKind::parse(table.as_str()).unwrap(), table);
        }
        assert!(matches!(
            TableKind::parse("notes"),
            Err(Error::UnknownTable(t)) if t == "notes"
        ));
    }

    #[test]
    fn column_lookup_typed() {
        let mut change = todo("t1");
        change.completed = Some(true);

        assert_eq!(
            change.column("title"),
            Some(ColumnValue::Text("Buy milk".to_string()))
        );
        assert_eq!(change.column("completed"), Some(ColumnValue::Bool(true)));
        assert_eq!(
            change.column("list_id"),
            Some(ColumnValue::Null(ColumnType::Text))
        );
        assert_eq!(change.column("priority"), None);
    }

    #[test]
    fn lists_have_no_delete_marker() {
        let list = ListChange {
            id: "l1".to_string(),
            ..Default::default()
        };
        assert!(!list.is_deleted());
        assert_eq!(list.column("deleted"), None);
    }

    #[test]
    fn serialization_is_stable() {
        let created = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let change = TodoChange {
            id: "t1".to_string(),
            title: Some("Buy milk".to_string()),
            completed: Some(false),
            created: Some(created),
            modified_columns: vec!["title".to_string()],
            new: true,
            ..Default::default()
        };

        let json = serde_json::to_string(&change).unwrap();
        assert!(json.contains("\"modifiedColumns\":[\"title\"]"));
        assert!(json.contains("2024-05-01T12:00:00Z"));

        let parsed: TodoChange = serde_json::from_str(&json).unwrap();
        assert_eq!(change, parsed);
    }

    #[test]
    fn outbox_payload_roundtrip() {
        let change = RecordChange::Todos(todo("t1"));
        let json = change.to_json().unwrap();
        let parsed = RecordChange::from_json(TableKind::Todos, &json).unwrap();
        assert_eq!(change, parsed);
    }

    #[test]
    fn from_json_rejects_garbage() {
        let result = RecordChange::from_json(TableKind::Lists, "not json");
        assert!(matches!(result, Err(Error::InvalidPayload(_))));
    }

    #[test]
    fn changeset_push_groups_by_table() {
        let mut changeset = Changeset::new();
        changeset.push(RecordChange::Todos(todo("t1")));
        changeset.push(RecordChange::Lists(ListChange {
            id: "l1".to_string(),
            ..Default::default()
        }));
        changeset.push(RecordChange::Todos(todo("t2")));

        assert_eq!(changeset.todos.len(), 2);
        assert_eq!(changeset.lists.len(), 1);
        assert_eq!(changeset.len(), 3);
        // Per-table insertion order is preserved
        assert_eq!(changeset.todos[0].id, "t1");
        assert_eq!(changeset.todos[1].id, "t2");
    }

    #[test]
    fn well_formed_id_is_uuid_shaped() {
        assert!(well_formed_id("c2d7a1e0-51b3-4cf1-9f2e-8a6a3d1b2c4d"));
        assert!(!well_formed_id("not-a-uuid"));
        assert!(!well_formed_id(""));
    }

    #[test]
    fn sanitize_nulls_malformed_references() {
        let mut change = RecordChange::Todos(TodoChange {
            id: "c2d7a1e0-51b3-4cf1-9f2e-8a6a3d1b2c4d".to_string(),
            list_id: Some("<deleted>".to_string()),
            goal_id: Some("9b2f6c1a-0d3e-4b5a-8c7d-6e5f4a3b2c1d".to_string()),
            ..Default::default()
        });

        let subs = change.sanitize_references();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].column, "list_id");
        assert_eq!(subs[0].value, "<deleted>");

        let RecordChange::Todos(todo) = change else {
            unreachable!()
        };
        assert_eq!(todo.list_id, None);
        assert!(todo.goal_id.is_some());
    }
}
