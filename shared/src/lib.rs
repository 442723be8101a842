use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Outcome of reducing a ranked label list. Serialized with the names the
/// HTTP API has always used.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
pub enum Category {
    #[serde(rename = "gato")]
    #[strum(serialize = "gato")]
    Cat,
    #[serde(rename = "perro")]
    #[strum(serialize = "perro")]
    Dog,
    #[serde(rename = "desconocido")]
    #[strum(serialize = "desconocido")]
    Unknown,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ClassificationResponse {
    #[serde(rename = "resultado")]
    pub category: Category,
    #[serde(rename = "detalles")]
    pub details: Vec<(String, f64)>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HealthResponse {
    #[serde(rename = "estado")]
    pub status: String,
    #[serde(rename = "actuador")]
    pub actuator_enabled: bool,
}
