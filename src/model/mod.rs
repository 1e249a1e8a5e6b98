//! Record kinds and their table layout.

mod galaxy;
mod planet;
mod schema;

pub use galaxy::Galaxy;
pub use planet::{Planet, PlanetType};
pub use schema::{decodes_as, ColumnInfo, EntitySchema, ShapeCheck, ValidationRule, NAME_RULE};

use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

/// A record kind persisted in its own table. Records carry no persistence behaviour;
/// the query module and the store do the I/O.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn schema() -> &'static EntitySchema;

    fn id(&self) -> Option<Uuid>;

    fn name(&self) -> &str;

    /// Persisted records have a store-assigned id; transient ones do not.
    fn is_persisted(&self) -> bool {
        self.id().is_some()
    }
}
