use super::{decodes_as, ColumnInfo, EntitySchema, Record, NAME_RULE};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

static PLANET_SCHEMA: EntitySchema = EntitySchema {
    table_name: "planets",
    path_segment: "planets",
    pk_column: "id",
    columns: &[
        ColumnInfo::new("id", "uuid").with_default(),
        ColumnInfo::new("name", "text"),
        ColumnInfo::new("type", "jsonb").shaped(decodes_as::<PlanetType>),
    ],
    validation: &[("name", NAME_RULE)],
};

/// Classification attached to a planet, stored as a JSON object column.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanetType {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Planet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PlanetType,
}

impl Planet {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Planet {
            id: None,
            name: name.into(),
            kind: PlanetType { name: kind.into() },
        }
    }
}

impl Record for Planet {
    fn schema() -> &'static EntitySchema {
        &PLANET_SCHEMA
    }

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}
