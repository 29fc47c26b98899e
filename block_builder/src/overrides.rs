//! Tenant-specific configuration overrides consumed when building a block.

use std::fmt::Debug;

/// Per-tenant schema extensions passed through into block creation.
///
/// A small capability interface, trivially mockable in tests: most callers only need a
/// constant answer per tenant.
pub trait Overrides: Debug + Send + Sync + 'static {
    /// Column names this tenant has opted to store as dedicated (non-shared) columns.
    fn dedicated_columns(&self, tenant: &[u8]) -> Vec<String>;
}

/// An [`Overrides`] implementation returning no dedicated columns for any tenant.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOverrides;

impl Overrides for NoOverrides {
    fn dedicated_columns(&self, _tenant: &[u8]) -> Vec<String> {
        Vec::new()
    }
}
