//! OpenAPI documentation

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{equipment, health, requests};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Lendkit API",
        version = "0.9.0",
        description = "Equipment Lending Platform REST API",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Requests
        requests::create_request,
        requests::update_request_status,
        requests::list_requests,
        requests::list_overdue_requests,
        requests::get_request,
        requests::delete_request,
        requests::run_reminders,
        // Equipment
        equipment::list_equipment,
        equipment::get_equipment,
        equipment::create_equipment,
        equipment::update_equipment,
        equipment::delete_equipment,
    ),
    components(
        schemas(
            // Requests
            requests::RequestedItemBody,
            requests::CreateRequestBody,
            requests::StatusActionBody,
            requests::UpdateStatusBody,
            requests::CreateRequestResponse,
            requests::RequestResponse,
            requests::MessageResponse,
            requests::ReminderRunResponse,
            crate::models::request::RequestDetails,
            crate::models::request::BorrowRequest,
            crate::models::request::LineItem,
            crate::models::request::StatusHistoryEntry,
            crate::models::request::RequestStatus,
            crate::models::request::LineItemStatus,
            // Equipment
            crate::models::equipment::Equipment,
            crate::models::equipment::CreateEquipment,
            crate::models::equipment::UpdateEquipment,
            crate::models::equipment::EquipmentCategory,
            crate::models::equipment::EquipmentCondition,
            // Misc
            health::HealthResponse,
            crate::error::ErrorResponse,
        )
    ),
    tags(
        (name = "requests", description = "Borrow request lifecycle"),
        (name = "equipment", description = "Equipment inventory"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;

/// Create the Swagger UI router
pub fn create_openapi_router() -> Router {
    Router::new().merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
