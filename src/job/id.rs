use uuid::Uuid;

/// Source of job identifiers.
///
/// Implementations are called concurrently from every `create` and must never
/// return the same id twice.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Random v4 UUIDs. Needs no coordination between callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}
