//! Static table layout per record kind: columns for the SQL builder, rules for the validator.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Checks the structure of a value stored in a jsonb column.
pub type ShapeCheck = fn(&Value) -> Result<(), String>;

/// One column of a record table.
#[derive(Clone, Copy, Debug)]
pub struct ColumnInfo {
    pub name: &'static str,
    /// PostgreSQL type used for parameter casts (e.g. `$1::int8`).
    pub pg_type: &'static str,
    pub nullable: bool,
    /// Whether the store fills the column when the record omits it (e.g. `gen_random_uuid()`).
    pub has_default: bool,
    /// Structure a jsonb value must have so the record still decodes.
    pub shape: Option<ShapeCheck>,
}

impl ColumnInfo {
    pub const fn new(name: &'static str, pg_type: &'static str) -> Self {
        ColumnInfo {
            name,
            pg_type,
            nullable: false,
            has_default: false,
            shape: None,
        }
    }

    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub const fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }

    pub const fn shaped(mut self, check: ShapeCheck) -> Self {
        self.shape = Some(check);
        self
    }
}

/// Shape check accepting exactly the values that deserialize as `T`.
pub fn decodes_as<T: DeserializeOwned>(v: &Value) -> Result<(), String> {
    <T as serde::Deserialize>::deserialize(v)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

/// Field constraints checked before a record reaches the store.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidationRule {
    pub required: bool,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<&'static str>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

impl ValidationRule {
    pub const fn new() -> Self {
        ValidationRule {
            required: false,
            min_length: None,
            max_length: None,
            pattern: None,
            minimum: None,
            maximum: None,
        }
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn min_length(mut self, n: usize) -> Self {
        self.min_length = Some(n);
        self
    }

    pub const fn max_length(mut self, n: usize) -> Self {
        self.max_length = Some(n);
        self
    }

    pub const fn pattern(mut self, re: &'static str) -> Self {
        self.pattern = Some(re);
        self
    }

    pub const fn minimum(mut self, n: f64) -> Self {
        self.minimum = Some(n);
        self
    }

    pub const fn maximum(mut self, n: f64) -> Self {
        self.maximum = Some(n);
        self
    }
}

/// The name rule shared by every record kind.
pub const NAME_RULE: ValidationRule = ValidationRule::new().required().min_length(3);

#[derive(Debug)]
pub struct EntitySchema {
    pub table_name: &'static str,
    /// URL segment the routes are mounted under.
    pub path_segment: &'static str,
    pub pk_column: &'static str,
    pub columns: &'static [ColumnInfo],
    pub validation: &'static [(&'static str, ValidationRule)],
}

impl EntitySchema {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }
}
