//! `OpenAPI` specification for the `/api/v1` surface.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// `OpenAPI` documentation for the causa REST API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Causa API",
        description = "Case-folder subscription ledger"
    ),
    paths(
        crate::routes::subscriptions::associate_folder,
        crate::routes::subscriptions::dissociate_folder,
        crate::routes::subscriptions::find_by_folder,
        crate::routes::subscriptions::update_status,
        crate::routes::subscriptions::update_by_subscriptions,
        crate::routes::subscriptions::migrate_array_fields,
        crate::routes::cases::get_case,
        crate::routes::cases::list_cases,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            crate::routes::subscriptions::AssociateFolderRequest,
            crate::routes::subscriptions::AssociateFolderResponse,
            crate::routes::subscriptions::CaseSummaryView,
            crate::routes::subscriptions::DissociateFolderRequest,
            crate::routes::subscriptions::DissociateFolderResponse,
            crate::routes::subscriptions::FindByFolderResponse,
            crate::routes::subscriptions::UpdateStatusRequest,
            crate::routes::subscriptions::UpdateBySubscriptionsRequest,
            crate::routes::subscriptions::PartitionCount,
            crate::routes::subscriptions::BulkResponse,
            crate::routes::cases::CaseView,
            crate::routes::cases::SubscriptionEntryView,
            crate::routes::cases::ListCasesResponse,
        )
    ),
    tags(
        (name = "subscriptions", description = "Folder subscriptions"),
        (name = "causas", description = "Case records"),
        (name = "maintenance", description = "Administrative repairs"),
    ),
    modifiers(&SecurityAddon),
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearerAuth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// Returns the generated `OpenAPI` spec.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Returns the generated `OpenAPI` spec serialized as pretty JSON.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn openapi_json() -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_route_is_documented() {
        let spec = openapi();
        let paths: Vec<&str> = spec.paths.paths.keys().map(String::as_str).collect();
        for expected in [
            "/api/v1/associate-folder",
            "/api/v1/dissociate-folder",
            "/api/v1/find-by-folder/{causaType}/{folderId}",
            "/api/v1/update-status",
            "/api/v1/update-by-subscriptions",
            "/api/v1/migrate-array-fields/{causaType}",
            "/api/v1/causas/{causaType}",
            "/api/v1/causas/{causaType}/{causaId}",
        ] {
            assert!(paths.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn test_bearer_scheme_registered() {
        let json = openapi_json().unwrap();
        assert!(json.contains("bearerAuth"));
    }
}
