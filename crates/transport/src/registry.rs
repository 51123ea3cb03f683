use crate::binder::Handle;

/// Name lookup for long-lived services.
pub trait ServiceRegistry: Send + Sync {
    /// The handle registered under `name`, if any. The handle may already be
    /// dead; callers probe it before relying on it.
    fn get_service(&self, name: &str) -> Option<Handle>;
}
