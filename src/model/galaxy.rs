use super::{ColumnInfo, EntitySchema, Record, NAME_RULE};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

static GALAXY_SCHEMA: EntitySchema = EntitySchema {
    table_name: "galaxies",
    path_segment: "galaxies",
    pk_column: "id",
    columns: &[
        ColumnInfo::new("id", "uuid").with_default(),
        ColumnInfo::new("name", "text"),
        ColumnInfo::new("age", "int8").nullable(),
        ColumnInfo::new("distance", "int8").nullable(),
    ],
    validation: &[("name", NAME_RULE)],
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Galaxy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub age: Option<i64>,
    #[serde(default)]
    pub distance: Option<i64>,
}

impl Galaxy {
    pub fn new(name: impl Into<String>) -> Self {
        Galaxy {
            id: None,
            name: name.into(),
            age: None,
            distance: None,
        }
    }
}

impl Record for Galaxy {
    fn schema() -> &'static EntitySchema {
        &GALAXY_SCHEMA
    }

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}
