//! Equipment inventory model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

/// Equipment category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EquipmentCategory {
    Sports,
    Lab,
    Electronics,
    Musical,
    Other,
}

impl std::fmt::Display for EquipmentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            EquipmentCategory::Sports => "sports",
            EquipmentCategory::Lab => "lab",
            EquipmentCategory::Electronics => "electronics",
            EquipmentCategory::Musical => "musical",
            EquipmentCategory::Other => "other",
        };
        write!(f, "{}", label)
    }
}

/// Physical condition of an equipment item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EquipmentCondition {
    Excellent,
    Good,
    Fair,
    Poor,
}

/// Equipment record
///
/// `available` is mutated exclusively through the reservation protocol and
/// the consistency reconciler; the invariant `0 <= available <= quantity`
/// holds at rest.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Equipment {
    pub id: i32,
    /// Equipment name / description
    pub name: String,
    pub category: EquipmentCategory,
    pub condition: EquipmentCondition,
    /// Total units owned
    pub quantity: i32,
    /// Units currently free to borrow
    pub available: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Create equipment request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateEquipment {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub category: EquipmentCategory,
    pub condition: EquipmentCondition,
    #[validate(range(min = 0))]
    pub quantity: i32,
}

/// Update equipment request
///
/// A quantity change shifts `available` by the same delta so that units
/// currently on loan stay accounted for.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateEquipment {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    pub category: Option<EquipmentCategory>,
    pub condition: Option<EquipmentCondition>,
    #[validate(range(min = 0))]
    pub quantity: Option<i32>,
}
