// tests/resolution.rs

//! Resolver behavior against registry fixtures

mod common;

use common::{add_package, scenario_a_registry};
use llamapkg::registry::MemoryRegistry;
use llamapkg::resolver::{PreferInstalled, PreferLatest, Resolver, RootRequest};
use llamapkg::version::{Constraint, Version};
use llamapkg::Error;
use std::collections::{BTreeMap, BTreeSet};

fn request(text: &str) -> RootRequest {
    RootRequest::parse(text).unwrap()
}

fn versions(graph: &llamapkg::ResolvedGraph) -> Vec<(String, String)> {
    graph
        .packages()
        .map(|p| (p.name.clone(), p.version.to_string()))
        .collect()
}

/// web -> {http, tls}, http -> {tls, log}, tls -> log
fn diamond_registry() -> MemoryRegistry {
    let registry = MemoryRegistry::new();
    add_package(&registry, "web", "2.0.0", &[("http", "^0.9"), ("tls", ">=1.1")]);
    add_package(&registry, "web", "2.1.0", &[("http", "^1.0"), ("tls", ">=1.2")]);
    add_package(&registry, "http", "0.9.4", &[("tls", "^1"), ("log", "~0.4")]);
    add_package(&registry, "http", "1.0.0", &[("tls", "^1.2"), ("log", "^0.4.2")]);
    add_package(&registry, "http", "1.1.0", &[("tls", "^2"), ("log", "^0.4.2")]);
    add_package(&registry, "tls", "1.1.0", &[("log", "^0.4")]);
    add_package(&registry, "tls", "1.2.3", &[("log", "^0.4")]);
    add_package(&registry, "tls", "2.0.0", &[("log", "^0.5")]);
    for version in ["0.4.0", "0.4.2", "0.4.9", "0.5.1"] {
        add_package(&registry, "log", version, &[]);
    }
    registry
}

#[test]
fn test_scenario_a_picks_newest_compatible() {
    let registry = scenario_a_registry();
    let graph = Resolver::new()
        .resolve(&[request("app@>=1.0.0, <2.0.0")], &BTreeMap::new(), &registry)
        .unwrap();

    assert_eq!(graph.version("app"), Some(&Version::new(1, 2, 0)));
    let lib = graph.version("lib").unwrap();
    assert_eq!((lib.major, lib.minor), (1, 4));
    assert_eq!(lib, &Version::new(1, 4, 2));
}

#[test]
fn test_scenario_b_conflict_names_both_requesters() {
    let registry = MemoryRegistry::new();
    add_package(&registry, "a", "1.0.0", &[("lib", "^1.0.0")]);
    add_package(&registry, "b", "1.0.0", &[("lib", "^2.0.0")]);
    add_package(&registry, "lib", "1.6.0", &[]);
    add_package(&registry, "lib", "2.3.0", &[]);

    let err = Resolver::new()
        .resolve(&[request("a"), request("b")], &BTreeMap::new(), &registry)
        .unwrap_err();

    let Error::Conflict(conflict) = err else {
        panic!("expected a conflict, got {err:?}");
    };
    assert_eq!(conflict.package, "lib");
    let requesters: BTreeSet<&str> = conflict.requesters().into_iter().collect();
    assert_eq!(requesters, BTreeSet::from(["a", "b"]));
    assert!(conflict.to_string().contains("lib"));
}

#[test]
fn test_resolution_is_deterministic() {
    let registry = diamond_registry();
    let requests = [request("web")];

    let first = Resolver::new()
        .resolve(&requests, &BTreeMap::new(), &registry)
        .unwrap();
    for _ in 0..5 {
        let again = Resolver::new()
            .resolve(&requests, &BTreeMap::new(), &registry)
            .unwrap();
        assert_eq!(versions(&again), versions(&first));
        assert_eq!(again.install_order().unwrap(), first.install_order().unwrap());
    }
}

#[test]
fn test_every_edge_is_satisfied() {
    let registry = diamond_registry();
    let graph = Resolver::new()
        .resolve(&[request("web")], &BTreeMap::new(), &registry)
        .unwrap();

    // http 1.1.0 wants tls ^2, which web 2.1.0 cannot share; backtrack to 1.0.0
    assert_eq!(graph.version("web"), Some(&Version::new(2, 1, 0)));
    assert_eq!(graph.version("http"), Some(&Version::new(1, 0, 0)));
    assert_eq!(graph.version("tls"), Some(&Version::new(1, 2, 3)));
    assert_eq!(graph.version("log"), Some(&Version::new(0, 4, 9)));

    let mut edges = 0;
    for edge in graph.graph().edges() {
        let chosen = graph.version(&edge.to).unwrap();
        assert!(
            edge.constraint.satisfies(chosen),
            "{} -> {} {} not satisfied by {}",
            edge.from,
            edge.to,
            edge.constraint,
            chosen
        );
        edges += 1;
    }
    assert!(edges >= 5);
    assert!(graph.graph().unsatisfied_edges().is_empty());
}

#[test]
fn test_no_duplicate_names() {
    let registry = diamond_registry();
    let graph = Resolver::new()
        .resolve(&[request("web"), request("http")], &BTreeMap::new(), &registry)
        .unwrap();

    let names: Vec<&str> = graph.nodes().map(|n| n.name.as_str()).collect();
    let unique: BTreeSet<&str> = names.iter().copied().collect();
    assert_eq!(names.len(), unique.len());
    assert_eq!(graph.len(), 4);
}

#[test]
fn test_install_order_is_leaves_first() {
    let registry = diamond_registry();
    let graph = Resolver::new()
        .resolve(&[request("web")], &BTreeMap::new(), &registry)
        .unwrap();

    let order = graph.install_order().unwrap();
    let position = |name: &str| order.iter().position(|n| n == name).unwrap();
    assert!(position("log") < position("tls"));
    assert!(position("tls") < position("http"));
    assert!(position("http") < position("web"));
}

#[test]
fn test_policies_differ_only_in_preference() {
    let registry = scenario_a_registry();
    let installed = BTreeMap::from([("lib".to_string(), Version::new(1, 3, 0))]);
    let requests = [request("app")];

    let keep = Resolver::new()
        .with_policy(PreferInstalled)
        .resolve(&requests, &installed, &registry)
        .unwrap();
    assert_eq!(keep.version("lib"), Some(&Version::new(1, 3, 0)));

    let fresh = Resolver::new()
        .with_policy(PreferLatest)
        .resolve(&requests, &installed, &registry)
        .unwrap();
    assert_eq!(fresh.version("lib"), Some(&Version::new(1, 4, 2)));
}

#[test]
fn test_unknown_root_is_not_found() {
    let registry = scenario_a_registry();
    let err = Resolver::new()
        .resolve(&[request("ghost")], &BTreeMap::new(), &registry)
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn test_unsatisfiable_root_constraint() {
    let registry = scenario_a_registry();
    let requests = [RootRequest::new("lib", Constraint::parse(">=3.0").unwrap())];
    let err = Resolver::new()
        .resolve(&requests, &BTreeMap::new(), &registry)
        .unwrap_err();

    let Error::Conflict(conflict) = err else {
        panic!("expected a conflict, got {err:?}");
    };
    assert_eq!(conflict.package, "lib");
}
