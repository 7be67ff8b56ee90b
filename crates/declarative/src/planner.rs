//! Execution planner - ordered resource plans

use crate::resource::{BoxedResource, Resource, ResourceExt};
use crate::types::ResourceKind;

/// An ordered plan of resources.
///
/// Resources are kept sorted by [`ResourceKind`] rank; within one kind,
/// insertion order is preserved. The order is therefore correct no matter
/// in which order the caller pushes.
#[derive(Default)]
pub struct Plan {
    resources: Vec<BoxedResource>,
}

impl Plan {
    /// Create a new empty plan
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource after every resource of the same or an earlier kind
    pub fn push(&mut self, resource: BoxedResource) {
        let rank = resource.kind().rank();
        let at = self
            .resources
            .iter()
            .position(|r| r.kind().rank() > rank)
            .unwrap_or(self.resources.len());
        self.resources.insert(at, resource);
    }

    /// Builder-style push
    pub fn with(mut self, resource: BoxedResource) -> Self {
        self.push(resource);
        self
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &(dyn Resource + 'static)> {
        self.resources.iter().map(|r| r.as_ref())
    }

    /// Filter plan to only include resources matching a predicate
    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&dyn Resource) -> bool,
    {
        Self {
            resources: self
                .resources
                .into_iter()
                .filter(|r| predicate(r.as_ref()))
                .collect(),
        }
    }

    /// Keep only resources of the given kinds
    pub fn of_kinds(self, kinds: &[ResourceKind]) -> Self {
        self.filter(|r| kinds.contains(&r.kind()))
    }

    /// Filter plan to only include resources matching a target pattern
    ///
    /// Target format: "kind" or "kind.name"
    pub fn filter_by_target(self, target: Option<&str>) -> Self {
        match target {
            None => self,
            Some(t) => {
                let (kind, name) = parse_target(t);
                self.filter(|r| matches_filter(r, kind.as_deref(), name.as_deref()))
            }
        }
    }

    /// Kinds in plan order, one entry per resource
    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.resources.iter().map(|r| r.kind()).collect()
    }

    /// Identity keys in plan order
    pub fn identity_keys(&self) -> Vec<String> {
        self.resources
            .iter()
            .map(|r| r.identity_key().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Whether the plan order respects the kind ranking
    pub fn is_ordered(&self) -> bool {
        self.resources
            .windows(2)
            .all(|w| w[0].kind().rank() <= w[1].kind().rank())
    }
}

impl std::fmt::Debug for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.resources.iter().map(|r| r.spec().to_string()))
            .finish()
    }
}

/// Parse a target string like "kind.name" into (kind, name)
fn parse_target(target: &str) -> (Option<String>, Option<String>) {
    match target.split_once('.') {
        None => (Some(target.to_string()), None),
        Some((kind, name)) if !kind.is_empty() => (Some(kind.to_string()), Some(name.to_string())),
        Some(_) => (None, Some(target.to_string())),
    }
}

/// Check if a resource matches the filter criteria
fn matches_filter(resource: &dyn Resource, kind: Option<&str>, name: Option<&str>) -> bool {
    if let Some(k) = kind {
        // Allow common aliases
        let matches_kind = match k {
            "packages" | "apt" => resource.kind() == ResourceKind::Package,
            "services" | "units" => resource.kind() == ResourceKind::ServiceUnit,
            "sites" | "proxy" => resource.kind() == ResourceKind::ProxySite,
            "database" | "db" => matches!(
                resource.kind(),
                ResourceKind::Database | ResourceKind::DatabaseRole
            ),
            _ => resource.kind().label() == k,
        };
        if !matches_kind {
            return false;
        }
    }

    if let Some(n) = name
        && !resource.identity_key().contains(n)
    {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContext;
    use crate::error::ConvergeError;
    use crate::types::{ProbeResult, ResourceSpec};

    #[derive(Debug)]
    struct Stub(ResourceSpec);

    impl Resource for Stub {
        fn spec(&self) -> &ResourceSpec {
            &self.0
        }

        fn description(&self) -> String {
            self.0.to_string()
        }

        fn probe(&self, _ctx: &RunContext) -> Result<ProbeResult, ConvergeError> {
            Ok(ProbeResult::absent())
        }

        fn apply(
            &self,
            _ctx: &mut RunContext,
            _current: &ProbeResult,
        ) -> Result<(), ConvergeError> {
            Ok(())
        }
    }

    fn stub(kind: ResourceKind, key: &str) -> BoxedResource {
        Box::new(Stub(ResourceSpec::new(kind, key)))
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target("services"), (Some("services".to_string()), None));
        assert_eq!(
            parse_target("services.web"),
            (Some("services".to_string()), Some("web".to_string()))
        );
        assert_eq!(
            parse_target("service_unit.app.web"),
            (Some("service_unit".to_string()), Some("app.web".to_string()))
        );
        assert_eq!(parse_target(".web"), (None, Some(".web".to_string())));
    }

    #[test]
    fn push_keeps_kind_order() {
        let plan = Plan::new()
            .with(stub(ResourceKind::ProxySite, "site"))
            .with(stub(ResourceKind::ServiceUnit, "web"))
            .with(stub(ResourceKind::Database, "db"))
            .with(stub(ResourceKind::Directory, "/srv/app"))
            .with(stub(ResourceKind::DatabaseRole, "role"))
            .with(stub(ResourceKind::Package, "nginx"));

        assert!(plan.is_ordered());
        assert_eq!(
            plan.identity_keys(),
            vec!["nginx", "/srv/app", "role", "db", "web", "site"]
        );
    }

    #[test]
    fn service_unit_never_precedes_its_directory() {
        let plan = Plan::new()
            .with(stub(ResourceKind::ServiceUnit, "web"))
            .with(stub(ResourceKind::Directory, "/srv/app"));
        let keys = plan.identity_keys();
        let dir = keys.iter().position(|k| k == "/srv/app").unwrap();
        let unit = keys.iter().position(|k| k == "web").unwrap();
        assert!(dir < unit);
    }

    #[test]
    fn push_is_stable_within_a_kind() {
        let plan = Plan::new()
            .with(stub(ResourceKind::Package, "b"))
            .with(stub(ResourceKind::ServiceUnit, "web"))
            .with(stub(ResourceKind::Package, "a"));
        assert_eq!(plan.identity_keys(), vec!["b", "a", "web"]);
    }

    #[test]
    fn filter_by_target_uses_aliases() {
        let plan = Plan::new()
            .with(stub(ResourceKind::Package, "nginx"))
            .with(stub(ResourceKind::ServiceUnit, "app_gunicorn"))
            .with(stub(ResourceKind::ServiceUnit, "app_enforcer"))
            .with(stub(ResourceKind::ProxySite, "app"));

        let services = Plan::new()
            .with(stub(ResourceKind::ServiceUnit, "app_gunicorn"))
            .with(stub(ResourceKind::ServiceUnit, "app_enforcer"))
            .filter_by_target(Some("services.enforcer"));
        assert_eq!(services.identity_keys(), vec!["app_enforcer"]);

        let sites = plan.filter_by_target(Some("sites"));
        assert_eq!(sites.identity_keys(), vec!["app"]);
    }

    #[test]
    fn of_kinds_keeps_order() {
        let plan = Plan::new()
            .with(stub(ResourceKind::ProxySite, "site"))
            .with(stub(ResourceKind::Package, "nginx"))
            .with(stub(ResourceKind::Directory, "/srv"))
            .of_kinds(&[ResourceKind::ProxySite, ResourceKind::Package]);
        assert_eq!(plan.identity_keys(), vec!["nginx", "site"]);
    }
}
