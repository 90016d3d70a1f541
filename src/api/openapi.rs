use super::handlers::{admin, auth, health, types, user};
use crate::{
    db::{
        admins::{Admin, AdminRole},
        users::{SortOrder, User, UserStatus},
    },
    token::Audience,
};
use utoipa::{
    openapi::{
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
        Contact, License,
    },
    Modify, OpenApi,
};

/// Documented routes. Add new handlers to `paths(...)` so they appear in the
/// generated document; `/` and the Swagger UI itself are not documented.
#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::request_otp,
        auth::verify_otp,
        auth::admin_login,
        user::get_profile,
        user::update_profile,
        admin::profile,
        admin::list_users,
        admin::get_user,
        admin::update_user_status,
    ),
    components(schemas(
        health::Health,
        types::RequestOtpRequest,
        types::RequestOtpResponse,
        types::VerifyOtpRequest,
        types::AdminLoginRequest,
        types::AccessTokenResponse,
        types::UpdateProfileRequest,
        types::UpdateUserStatusRequest,
        types::UserListResponse,
        User,
        UserStatus,
        SortOrder,
        Admin,
        AdminRole,
        Audience,
    )),
    modifiers(&CargoInfo, &BearerAuth),
    tags(
        (name = "auth", description = "One-time code and admin login"),
        (name = "user", description = "Profile of the authenticated user"),
        (name = "admin", description = "User management"),
        (name = "health", description = "Liveness and dependency checks"),
    )
)]
pub struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// Fill title, version, contact and license from Cargo metadata.
struct CargoInfo;

impl Modify for CargoInfo {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let info = &mut openapi.info;
        info.title = env!("CARGO_PKG_NAME").to_string();
        info.version = env!("CARGO_PKG_VERSION").to_string();
        info.description = optional_str(env!("CARGO_PKG_DESCRIPTION")).map(str::to_string);
        info.contact = cargo_contact();
        info.license = cargo_license();
    }
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let primary = env!("CARGO_PKG_AUTHORS").split(';').next().map(str::trim)?;
    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &str) -> Option<&str> {
    Some(value.trim()).filter(|value| !value.is_empty())
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.split_once('<') {
        Some((name, email)) => (
            optional_str(name),
            optional_str(email.trim_end_matches('>')),
        ),
        None => (optional_str(author), None),
    }
}
