pub mod cors;
pub mod identity;
pub mod validation;

pub use cors::create_cors_layer;
pub use identity::CurrentUser;
pub use validation::ValidatedJson;
