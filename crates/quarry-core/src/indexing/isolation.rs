//! Tenant isolation: mapping tenants onto dense-store collections.

use crate::config::SystemSettings;
use crate::model::{IsolationStrategy, Tenant};

/// The dense collection a tenant's points live in.
///
/// `shared` tenants write into the base collection and rely on payload
/// filtering; `per_tenant` tenants get a suffixed collection. Under `auto`
/// the tenant stays shared until operations flip `dedicated_collection`,
/// a one-way promotion that does not migrate existing data.
#[must_use]
pub fn collection_for_tenant(settings: &SystemSettings, tenant: &Tenant) -> String {
    let dedicated = match tenant.isolation {
        IsolationStrategy::Shared => false,
        IsolationStrategy::PerTenant => true,
        IsolationStrategy::Auto => tenant.dedicated_collection,
    };
    if dedicated {
        format!("{}__{}", settings.base_collection, tenant.id)
    } else {
        settings.base_collection.clone()
    }
}

/// Whether an `auto` tenant has grown past the promotion threshold.
#[must_use]
pub fn should_promote(settings: &SystemSettings, chunk_count: usize) -> bool {
    chunk_count >= settings.auto_isolation_threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TenantStatus;
    use chrono::Utc;

    fn tenant(isolation: IsolationStrategy, dedicated: bool) -> Tenant {
        Tenant {
            id: "acme".to_string(),
            status: TenantStatus::Active,
            isolation,
            dedicated_collection: dedicated,
            default_models: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_collection_names() {
        let settings = SystemSettings::default();
        assert_eq!(
            collection_for_tenant(&settings, &tenant(IsolationStrategy::Shared, false)),
            "quarry_chunks"
        );
        assert_eq!(
            collection_for_tenant(&settings, &tenant(IsolationStrategy::PerTenant, false)),
            "quarry_chunks__acme"
        );
        assert_eq!(
            collection_for_tenant(&settings, &tenant(IsolationStrategy::Auto, false)),
            "quarry_chunks"
        );
        assert_eq!(
            collection_for_tenant(&settings, &tenant(IsolationStrategy::Auto, true)),
            "quarry_chunks__acme"
        );
    }

    #[test]
    fn test_promotion_threshold() {
        let mut settings = SystemSettings::default();
        settings.auto_isolation_threshold = 10;
        assert!(!should_promote(&settings, 9));
        assert!(should_promote(&settings, 10));
    }
}
