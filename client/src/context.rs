//! Per-call context: who is acting and on which course.

/// Supplies the identity of the signed-in user, if any.
pub trait PrincipalSource: Send + Sync {
    fn current_principal_id(&self) -> Option<String>;
}

/// A principal source that always reports the same identity.
#[derive(Debug, Clone, Default)]
pub struct FixedPrincipal(pub Option<String>);

impl PrincipalSource for FixedPrincipal {
    fn current_principal_id(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Explicit context passed to repository writes and reconciliation passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncContext {
    /// Stamped as `createdBy` when a record is first replayed
    pub principal_id: Option<String>,
    /// Course new records attach to when they name none
    pub course_scope: Option<String>,
}

impl SyncContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for whoever `source` reports as signed in.
    pub fn for_principal(source: &dyn PrincipalSource) -> Self {
        Self {
            principal_id: source.current_principal_id(),
            course_scope: None,
        }
    }

    pub fn with_principal(mut self, principal_id: impl Into<String>) -> Self {
        self.principal_id = Some(principal_id.into());
        self
    }

    /// Scope writes to a course, by local or remote ID.
    pub fn with_course(mut self, course: impl Into<String>) -> Self {
        self.course_scope = Some(course.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_from_principal_source() {
        let source = FixedPrincipal(Some("user-7".into()));
        let ctx = SyncContext::for_principal(&source).with_course("C-100");
        assert_eq!(ctx.principal_id.as_deref(), Some("user-7"));
        assert_eq!(ctx.course_scope.as_deref(), Some("C-100"));

        let anonymous = SyncContext::for_principal(&FixedPrincipal::default());
        assert_eq!(anonymous, SyncContext::new());
    }
}
