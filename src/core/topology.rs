//! Expansion of services x tenants x system aliases into a routing table.
//!
//! The table is built once at startup and never mutated afterwards. Every hostname maps to
//! exactly one route; a second claim on the same hostname is a fatal configuration error,
//! whatever the declaration order.
use std::{
    collections::{BTreeMap, HashMap, hash_map::Entry},
    sync::Arc,
};

use crate::{
    config::{ConfigError, ResolvedConfig, ServiceSpec, TenantSpec},
    core::{
        forwarder::{Forwarder, ForwarderFactory},
        naming::qualified_host,
    },
    ports::overlay::OverlayTransport,
};

/// What a hostname resolves to.
#[derive(Clone)]
pub struct Route {
    /// Service that serves the traffic, after tenant overrides.
    pub service: String,
    /// Service whose host fragment produced the hostname.
    pub declared: String,
    pub tenant: String,
    pub forwarder: Arc<Forwarder>,
}

impl Route {
    fn describe(&self) -> String {
        format!("service '{}' of tenant '{}'", self.declared, self.tenant)
    }
}

/// Exact hostname to route lookup.
#[derive(Clone, Default)]
pub struct RoutingTable {
    routes: HashMap<String, Route>,
}

impl RoutingTable {
    pub fn get(&self, host: &str) -> Option<&Route> {
        self.routes.get(host)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Hostnames in sorted order.
    pub fn hosts(&self) -> Vec<&str> {
        let mut hosts: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        hosts.sort_unstable();
        hosts
    }

    /// Sorted `host -> (service, tenant)` view, for comparisons and reporting.
    pub fn snapshot(&self) -> BTreeMap<String, (String, String)> {
        self.routes
            .iter()
            .map(|(host, route)| (host.clone(), (route.service.clone(), route.tenant.clone())))
            .collect()
    }

    fn insert(&mut self, host: String, route: Route) -> Result<(), ConfigError> {
        match self.routes.entry(host) {
            Entry::Occupied(existing) => Err(ConfigError::HostCollision {
                host: existing.key().clone(),
                existing: existing.get().describe(),
                incoming: route.describe(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(route);
                Ok(())
            }
        }
    }
}

/// An overlay name the server must bind, with the forwarder answering on it.
#[derive(Clone)]
pub struct OverlayBinding {
    pub host: String,
    pub forwarder: Arc<Forwarder>,
}

/// The routing table plus the overlay bindings derived from it.
#[derive(Clone)]
pub struct Topology {
    pub routes: RoutingTable,
    /// One per routing-table entry, sorted by host.
    pub bindings: Vec<OverlayBinding>,
    pub forwarders: BTreeMap<String, Arc<Forwarder>>,
}

impl Topology {
    /// Build the topology for a validated configuration.
    pub fn from_config(
        config: &ResolvedConfig,
        overlay: Arc<dyn OverlayTransport>,
    ) -> Result<Self, ConfigError> {
        let factory = ForwarderFactory::from_config(overlay, config);
        build_topology(&config.services, &config.tenants, &factory)
    }
}

/// Expand every (tenant, service, fragment, alias) combination into a hostname.
///
/// Each service gets exactly one forwarder, shared by all of its hostnames and by every
/// tenant override that targets it.
pub fn build_topology(
    services: &[ServiceSpec],
    tenants: &[TenantSpec],
    factory: &ForwarderFactory,
) -> Result<Topology, ConfigError> {
    let mut forwarders: BTreeMap<String, Arc<Forwarder>> = BTreeMap::new();
    for service in services {
        if forwarders.contains_key(&service.name) {
            return Err(ConfigError::DuplicateService {
                service: service.name.clone(),
            });
        }
        forwarders.insert(service.name.clone(), Arc::new(factory.build(service)?));
    }

    for tenant in tenants {
        let mut sources: Vec<&String> = tenant.overrides.keys().collect();
        sources.sort();
        for source in sources {
            if !forwarders.contains_key(source) {
                return Err(ConfigError::UnknownOverrideSource {
                    tenant: tenant.name.clone(),
                    service: source.clone(),
                });
            }
            let target = &tenant.overrides[source];
            if !forwarders.contains_key(target) {
                return Err(ConfigError::UnknownOverrideTarget {
                    tenant: tenant.name.clone(),
                    service: source.clone(),
                    target: target.clone(),
                });
            }
        }
    }

    let mut routes = RoutingTable::default();
    for tenant in tenants {
        for service in services {
            let effective = tenant
                .overrides
                .get(&service.name)
                .unwrap_or(&service.name);
            let forwarder = forwarders[effective].clone();

            for fragment in &service.virtual_hosts {
                for alias in factory.system_hosts() {
                    let host = qualified_host(fragment, &tenant.id, alias);
                    routes.insert(
                        host,
                        Route {
                            service: effective.clone(),
                            declared: service.name.clone(),
                            tenant: tenant.name.clone(),
                            forwarder: forwarder.clone(),
                        },
                    )?;
                }
            }
        }
    }

    let mut bindings: Vec<OverlayBinding> = routes
        .routes
        .iter()
        .map(|(host, route)| OverlayBinding {
            host: host.clone(),
            forwarder: route.forwarder.clone(),
        })
        .collect();
    bindings.sort_by(|a, b| a.host.cmp(&b.host));

    tracing::info!(
        hosts = routes.len(),
        services = forwarders.len(),
        tenants = tenants.len(),
        "Built routing table"
    );

    Ok(Topology {
        routes,
        bindings,
        forwarders,
    })
}

#[cfg(test)]
mod tests {
    use rand::seq::SliceRandom;

    use super::*;
    use crate::{adapters::local_overlay::LocalOverlay, config::Upstream};

    fn factory(aliases: &[&str]) -> ForwarderFactory {
        ForwarderFactory::new(
            Arc::new(LocalOverlay::new()),
            aliases.iter().map(|a| a.to_string()).collect(),
            "",
            8080,
        )
    }

    fn service(name: &str, fragments: &[&str]) -> ServiceSpec {
        ServiceSpec::new(
            name,
            Upstream::parse(name, &format!("overlay://{name}-backend")).unwrap(),
            fragments,
        )
    }

    fn entry(service: &str, tenant: &str) -> (String, String) {
        (service.to_string(), tenant.to_string())
    }

    #[test]
    fn test_expands_common_tenant_and_aliases() {
        let topology = build_topology(
            &[service("api", &["api"])],
            &[TenantSpec::common()],
            &factory(&["example.com", "example.net"]),
        )
        .unwrap();

        assert_eq!(
            topology.routes.hosts(),
            vec!["api.example.com", "api.example.net"]
        );
        assert_eq!(topology.bindings.len(), 2);
        assert_eq!(topology.bindings[0].host, "api.example.com");
    }

    #[test]
    fn test_tenant_override_reuses_target_forwarder() {
        let topology = build_topology(
            &[service("api", &["api"]), service("api-v2", &["apiv2"])],
            &[
                TenantSpec::common(),
                TenantSpec::new("t1", "t1").with_override("api", "api-v2"),
            ],
            &factory(&["example.com"]),
        )
        .unwrap();

        let snapshot = topology.routes.snapshot();
        assert_eq!(snapshot["api.example.com"], entry("api", "common"));
        assert_eq!(snapshot["api.t1.example.com"], entry("api-v2", "t1"));
        assert_eq!(snapshot["apiv2.t1.example.com"], entry("api-v2", "t1"));
        assert_eq!(snapshot.len(), 4);

        let overridden = topology.routes.get("api.t1.example.com").unwrap();
        assert_eq!(overridden.declared, "api");
        assert!(Arc::ptr_eq(
            &overridden.forwarder,
            &topology.forwarders["api-v2"]
        ));
    }

    #[test]
    fn test_empty_fragment_serves_the_tenant_root() {
        let topology = build_topology(
            &[service("portal", &[""])],
            &[TenantSpec::common(), TenantSpec::new("acme", "acme")],
            &factory(&["example.com"]),
        )
        .unwrap();
        assert_eq!(
            topology.routes.hosts(),
            vec!["acme.example.com", "example.com"]
        );
    }

    #[test]
    fn test_host_collision_is_fatal() {
        let err = build_topology(
            &[service("a", &["x"]), service("b", &["x"])],
            &[TenantSpec::common()],
            &factory(&["example.com"]),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ConfigError::HostCollision { host, .. } if host == "x.example.com"));
    }

    #[test]
    fn test_cross_tenant_collision_is_fatal() {
        // Fragment "api.t1" of the common tenant equals fragment "api" of tenant t1.
        let err = build_topology(
            &[service("a", &["api"]), service("b", &["api.t1"])],
            &[TenantSpec::common(), TenantSpec::new("t1", "t1")],
            &factory(&["example.com"]),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ConfigError::HostCollision { .. }));
    }

    #[test]
    fn test_unknown_override_target_is_fatal() {
        let err = build_topology(
            &[service("api", &["api"])],
            &[TenantSpec::new("t1", "t1").with_override("api", "ghost")],
            &factory(&["example.com"]),
        )
        .err()
        .unwrap();
        assert_eq!(
            err,
            ConfigError::UnknownOverrideTarget {
                tenant: "t1".to_string(),
                service: "api".to_string(),
                target: "ghost".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_override_source_is_fatal() {
        let err = build_topology(
            &[service("api", &["api"])],
            &[TenantSpec::new("t1", "t1").with_override("ghost", "api")],
            &factory(&["example.com"]),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ConfigError::UnknownOverrideSource { .. }));
    }

    #[test]
    fn test_duplicate_service_is_fatal() {
        let err = build_topology(
            &[service("api", &["a"]), service("api", &["b"])],
            &[TenantSpec::common()],
            &factory(&["example.com"]),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ConfigError::DuplicateService { .. }));
    }

    #[test]
    fn test_result_is_independent_of_declaration_order() {
        let mut services = vec![
            service("api", &["api", "rest"]),
            service("api-v2", &["apiv2"]),
            service("web", &["www", ""]),
            service("admin", &["admin"]),
        ];
        let mut tenants = vec![
            TenantSpec::common(),
            TenantSpec::new("t1", "t1").with_override("api", "api-v2"),
            TenantSpec::new("t2", "t2").with_override("web", "admin"),
        ];
        let factory = factory(&["example.com", "example.org"]);
        let expected = build_topology(&services, &tenants, &factory)
            .unwrap()
            .routes
            .snapshot();

        let mut rng = rand::rng();
        for _ in 0..16 {
            services.shuffle(&mut rng);
            tenants.shuffle(&mut rng);
            let actual = build_topology(&services, &tenants, &factory)
                .unwrap()
                .routes
                .snapshot();
            assert_eq!(actual, expected);
        }
    }

    #[test]
    fn test_collision_is_detected_in_every_order() {
        let mut services = vec![
            service("a", &["x"]),
            service("b", &["y"]),
            service("c", &["x"]),
        ];
        let tenants = vec![TenantSpec::common()];
        let factory = factory(&["example.com"]);

        let mut rng = rand::rng();
        for _ in 0..16 {
            services.shuffle(&mut rng);
            assert!(build_topology(&services, &tenants, &factory).is_err());
        }
    }
}
