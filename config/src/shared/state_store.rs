use serde::{Deserialize, Serialize};

/// Where migration progress is persisted for resumption.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateStoreConfig {
    /// Progress lives in memory and is lost on restart.
    #[default]
    Memory,

    /// Progress is written to a changelog table next to the migrated table.
    Mysql,
}
