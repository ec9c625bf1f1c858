//! OpenAPI/Utoipa configuration.

use crate::api::{health::MISC_TAG, token::OAUTH2_TAG};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, OAuth2, Password, Scopes, SecurityScheme},
};

/// Security addon for OpenAPI documentation.
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    #[tracing::instrument(skip(self, openapi))]
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            // Client credentials on the token endpoint
            let basic = HttpBuilder::new()
                .scheme(HttpAuthScheme::Basic)
                .description(Some("Registered `client_id` and `client_secret`."))
                .build();
            components.add_security_scheme("ClientBasic", SecurityScheme::Http(basic));

            let oauth2 = OAuth2::new([utoipa::openapi::security::Flow::Password(Password::new(
                "/token",
                Scopes::from_iter([
                    ("openid", "OpenID Connect scope, adds an ID token"),
                    ("email", "Email claims in the ID token"),
                    ("profile", "Profile claims in the ID token"),
                ]),
            ))]);
            components.add_security_scheme("OAuth2", SecurityScheme::OAuth2(oauth2));
        }
    }
}

/// OpenAPI documentation configuration.
#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "OAuth Server API",
        version = "0.1.0",
        description = "Token issuance for an OAuth2/OpenID Connect provider with federated login."
    ),
    tags(
        (name = MISC_TAG, description = "Miscellaneous endpoints"),
        (name = OAUTH2_TAG, description = "OAuth2 token and key endpoints")
    )
)]
pub struct ApiDoc;
