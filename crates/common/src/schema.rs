use crate::{DbError, DbResult};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use types::SqlType;

/// Describes one column of a table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: SqlType,
    /// Declared length for VARCHAR(n); 0 for other types.
    pub declared_len: u32,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: SqlType) -> Self {
        Self {
            name: name.into(),
            ty,
            declared_len: 0,
            nullable: true,
            primary_key: false,
            unique: false,
        }
    }

    pub fn with_len(mut self, declared_len: u32) -> Self {
        self.declared_len = declared_len;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.unique = true;
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Ordered column list with case-insensitive name lookup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
    #[serde(skip)]
    #[serde(default)]
    ordinals: HashMap<String, usize>,
}

impl Schema {
    pub fn try_new(columns: Vec<Column>) -> DbResult<Self> {
        if columns.is_empty() {
            return Err(DbError::Semantic(
                "table must contain at least one column".into(),
            ));
        }
        if columns.len() > u16::MAX as usize {
            return Err(DbError::Semantic("too many columns".into()));
        }
        let mut schema = Self {
            columns,
            ordinals: HashMap::new(),
        };
        schema.rebuild_ordinals()?;
        Ok(schema)
    }

    /// Rebuilds the lookup map; needed after deserialization since the map
    /// is not persisted.
    pub fn rebuild_ordinals(&mut self) -> DbResult<()> {
        self.ordinals.clear();
        for (idx, column) in self.columns.iter().enumerate() {
            if self
                .ordinals
                .insert(column.name.to_ascii_lowercase(), idx)
                .is_some()
            {
                return Err(DbError::Semantic(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
        }
        Ok(())
    }

    /// Zero-based ordinal for a column name, matched case-insensitively.
    pub fn column_index(&self, name: &str) -> DbResult<usize> {
        self.ordinals
            .get(&name.to_ascii_lowercase())
            .copied()
            .ok_or_else(|| DbError::Semantic(format!("unknown column '{name}'")))
    }

    pub fn column(&self, ordinal: usize) -> DbResult<&Column> {
        self.columns
            .get(ordinal)
            .ok_or_else(|| DbError::Internal(format!("column ordinal {ordinal} out of range")))
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Ordinals of the primary-key columns, in declaration order.
    pub fn primary_key(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
    }
}

impl Eq for Schema {}
