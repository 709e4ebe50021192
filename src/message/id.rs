use uuid::Uuid;

/// Generate a message or client identifier.
///
/// Identifiers are lowercase UUIDv4 strings wrapped in braces, e.g.
/// `{1c4e3f6a-...}`.
pub fn generate_id() -> String {
    format!("{{{}}}", Uuid::new_v4())
}
