//! NAT rule synthesis for one tenant namespace

use proxy_core::{EndpointInfo, ProxyState, ServiceInfo, ServicePortName};
use std::fmt::Write;

/// Custom NAT chain programmed in every router namespace
pub const STACKUBE_PREROUTING_CHAIN: &str = "STACKUBE-PREROUTING";

/// Network namespace prefix the provider's L3 agent uses for routers
const ROUTER_NETNS_PREFIX: &str = "qrouter-";

/// Network namespace hosting a router
pub fn router_netns_name(router_id: &str) -> String {
    format!("{}{}", ROUTER_NETNS_PREFIX, router_id)
}

/// Arguments of the PREROUTING rule that jumps into the custom chain
pub fn link_rule_args() -> Vec<String> {
    vec![
        "-m".to_string(),
        "comment".to_string(),
        "--comment".to_string(),
        "stackube service portals".to_string(),
        "-j".to_string(),
        STACKUBE_PREROUTING_CHAIN.to_string(),
    ]
}

/// Probability for the `i`-th of `n` endpoints, formatted for iptables.
///
/// Rule `i` only sees packets rules `0..i` did not take, so `1/(n-i)` gives
/// each endpoint an overall share of `1/n`.
pub fn endpoint_probability(n: usize, i: usize) -> String {
    format!("{:.5}", 1.0 / (n - i) as f64)
}

/// An `iptables-restore` script for the custom chain of one namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatScript {
    pub data: String,
    pub rules: usize,
}

/// Build the replacement script for `namespace`'s chain.
///
/// Only ClusterIP services with at least one endpoint produce rules; the
/// script still flushes the chain when nothing qualifies.
pub fn build_nat_script(state: &ProxyState, namespace: &str) -> NatScript {
    let mut data = String::new();
    let mut rules = 0;

    data.push_str("*nat\n");
    // Declaring the chain in a restore transaction flushes it.
    let _ = writeln!(data, ":{} - [0:0]", STACKUBE_PREROUTING_CHAIN);

    for (name, service) in state.services_in(namespace).into_iter().flatten() {
        if !service.is_cluster_ip() {
            continue;
        }
        let endpoints = state.endpoints_for(name);
        rules += write_service_rules(&mut data, name, service, endpoints);
    }

    data.push_str("COMMIT\n");
    NatScript { data, rules }
}

fn write_service_rules(
    data: &mut String,
    name: &ServicePortName,
    service: &ServiceInfo,
    endpoints: &[EndpointInfo],
) -> usize {
    let n = endpoints.len();
    for (i, endpoint) in endpoints.iter().enumerate() {
        let _ = write!(
            data,
            "-A {} -m comment --comment \"{}\" -d {}/32 -p {} -m {} --dport {}",
            STACKUBE_PREROUTING_CHAIN,
            name,
            service.cluster_ip,
            service.protocol,
            service.protocol,
            service.port,
        );
        if i < n - 1 {
            let _ = write!(
                data,
                " -m statistic --mode random --probability {}",
                endpoint_probability(n, i)
            );
        }
        let _ = writeln!(data, " -j DNAT --to-destination {}", endpoint.endpoint);
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxy_core::{Change, Changes, EndpointsMap, ServiceMap, ServiceType};
    use std::sync::Arc;

    fn service(cluster_ip: &str, port: u16, service_type: ServiceType) -> Arc<ServiceInfo> {
        Arc::new(ServiceInfo {
            cluster_ip: cluster_ip.to_string(),
            port,
            protocol: "tcp".to_string(),
            service_type,
            session_affinity: false,
            service_chain_name: "KUBE-SVC-X".to_string(),
            firewall_chain_name: "KUBE-FW-X".to_string(),
        })
    }

    fn state_with(
        services: Vec<(ServicePortName, Arc<ServiceInfo>)>,
        endpoints: Vec<(ServicePortName, Vec<EndpointInfo>)>,
    ) -> ProxyState {
        let mut state = ProxyState::new();
        let mut svc_changes = Changes::new();
        svc_changes.insert(
            "all".to_string(),
            Change {
                previous: ServiceMap::new(),
                current: services.into_iter().collect(),
            },
        );
        state.apply_service_changes(svc_changes);

        let mut ep_changes = Changes::new();
        ep_changes.insert(
            "all".to_string(),
            Change {
                previous: EndpointsMap::new(),
                current: endpoints.into_iter().collect(),
            },
        );
        state.apply_endpoints_changes(ep_changes);
        state
    }

    #[test]
    fn test_router_netns_name() {
        assert_eq!(router_netns_name("123"), "qrouter-123");
    }

    #[test]
    fn test_probabilities_spread_uniformly() {
        let probs: Vec<String> = (0..3).map(|i| endpoint_probability(4, i)).collect();
        assert_eq!(probs, vec!["0.25000", "0.33333", "0.50000"]);
    }

    #[test]
    fn test_single_endpoint_has_no_probability() {
        let name = ServicePortName::new("ns1", "web", "http");
        let state = state_with(
            vec![(name.clone(), service("10.0.0.10", 80, ServiceType::ClusterIP))],
            vec![(name, vec![EndpointInfo::new("192.168.0.1", 80, false)])],
        );

        let script = build_nat_script(&state, "ns1");
        assert_eq!(script.rules, 1);
        assert_eq!(
            script.data,
            "*nat\n\
             :STACKUBE-PREROUTING - [0:0]\n\
             -A STACKUBE-PREROUTING -m comment --comment \"ns1/web:http\" -d 10.0.0.10/32 -p tcp -m tcp --dport 80 -j DNAT --to-destination 192.168.0.1:80\n\
             COMMIT\n"
        );
    }

    #[test]
    fn test_three_endpoints_get_decreasing_odds() {
        let name = ServicePortName::new("ns1", "web", "http");
        let state = state_with(
            vec![(name.clone(), service("10.0.0.10", 80, ServiceType::ClusterIP))],
            vec![(
                name,
                vec![
                    EndpointInfo::new("192.168.0.1", 8080, false),
                    EndpointInfo::new("192.168.0.2", 8080, false),
                    EndpointInfo::new("192.168.0.3", 8080, false),
                ],
            )],
        );

        let script = build_nat_script(&state, "ns1");
        let rules: Vec<&str> = script.data.lines().filter(|l| l.starts_with("-A")).collect();
        assert_eq!(rules.len(), 3);
        assert!(rules[0].contains("--probability 0.33333 -j DNAT --to-destination 192.168.0.1:8080"));
        assert!(rules[1].contains("--probability 0.50000 -j DNAT --to-destination 192.168.0.2:8080"));
        assert!(!rules[2].contains("--probability"));
        assert!(rules[2].ends_with("--to-destination 192.168.0.3:8080"));
    }

    #[test]
    fn test_service_without_endpoints_emits_nothing() {
        let name = ServicePortName::new("ns1", "web", "http");
        let state = state_with(
            vec![(name, service("10.0.0.10", 80, ServiceType::ClusterIP))],
            vec![],
        );

        let script = build_nat_script(&state, "ns1");
        assert_eq!(script.rules, 0);
        assert_eq!(script.data, "*nat\n:STACKUBE-PREROUTING - [0:0]\nCOMMIT\n");
    }

    #[test]
    fn test_non_cluster_ip_types_emit_nothing() {
        let mut services = Vec::new();
        let mut endpoints = Vec::new();
        for (svc, service_type) in [
            ("np", ServiceType::NodePort),
            ("lb", ServiceType::LoadBalancer),
            ("ext", ServiceType::ExternalName),
        ] {
            let name = ServicePortName::new("ns1", svc, "http");
            services.push((name.clone(), service("10.0.0.20", 80, service_type)));
            endpoints.push((name, vec![EndpointInfo::new("192.168.0.9", 80, false)]));
        }
        let state = state_with(services, endpoints);

        assert_eq!(build_nat_script(&state, "ns1").rules, 0);
    }

    #[test]
    fn test_only_own_namespace_is_rendered() {
        let ns1 = ServicePortName::new("ns1", "web", "http");
        let ns2 = ServicePortName::new("ns2", "web", "http");
        let state = state_with(
            vec![
                (ns1.clone(), service("10.0.0.10", 80, ServiceType::ClusterIP)),
                (ns2.clone(), service("10.0.0.11", 80, ServiceType::ClusterIP)),
            ],
            vec![
                (ns1, vec![EndpointInfo::new("192.168.0.1", 80, false)]),
                (ns2, vec![EndpointInfo::new("192.168.1.1", 80, false)]),
            ],
        );

        let script = build_nat_script(&state, "ns1");
        assert_eq!(script.rules, 1);
        assert!(script.data.contains("192.168.0.1:80"));
        assert!(!script.data.contains("192.168.1.1:80"));
    }

    #[test]
    fn test_script_is_deterministic() {
        let a = ServicePortName::new("ns1", "a", "http");
        let b = ServicePortName::new("ns1", "b", "http");
        let state = state_with(
            vec![
                (b.clone(), service("10.0.0.12", 80, ServiceType::ClusterIP)),
                (a.clone(), service("10.0.0.11", 80, ServiceType::ClusterIP)),
            ],
            vec![
                (a, vec![EndpointInfo::new("192.168.0.1", 80, false)]),
                (b, vec![EndpointInfo::new("192.168.0.2", 80, false)]),
            ],
        );

        let first = build_nat_script(&state, "ns1");
        assert_eq!(first, build_nat_script(&state, "ns1"));
        let a_pos = first.data.find("ns1/a:http").unwrap();
        let b_pos = first.data.find("ns1/b:http").unwrap();
        assert!(a_pos < b_pos);
    }
}
