//! Data models for Lendkit

pub mod equipment;
pub mod request;
pub mod user;

// Re-export commonly used types
pub use equipment::{Equipment, EquipmentCategory, EquipmentCondition};
pub use request::{
    derive_overall_status, BorrowRequest, LineItem, LineItemStatus, RequestDetails,
    RequestStatus, StatusHistoryEntry,
};
pub use user::{Role, UserClaims};
