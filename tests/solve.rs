// SPDX-License-Identifier: MPL-2.0

use anchorage::{
    Binding, BoundVersion, CancellationToken, Constraint, DependencyResolver,
    OfflineContainerProvider, PackageRef, Pin, PinState, PinsMap, ProductFilter, ResolveConfig,
    ResolverError, ToolsVersion, Version, VersionSet,
};

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn remote(name: &str) -> PackageRef {
    PackageRef::remote(&format!("https://example.com/pkg/{name}"))
}

fn requires(package: &PackageRef, low: (u64, u64, u64), high: (u64, u64, u64)) -> Constraint {
    Constraint::versioned(
        package.clone(),
        VersionSet::range(low, high),
        ProductFilter::Everything,
    )
}

fn resolver(provider: OfflineContainerProvider) -> DependencyResolver<OfflineContainerProvider> {
    DependencyResolver::new(provider, PinsMap::default(), ResolveConfig::default())
}

/// (identity, bound version) pairs, in output order.
fn bound(bindings: &[Binding]) -> Vec<(String, String)> {
    bindings
        .iter()
        .map(|binding| {
            (
                binding.package.identity().to_string(),
                binding.bound_version.to_string(),
            )
        })
        .collect()
}

#[tokio::test]
async fn trivial_resolution() {
    init_log();
    let a = remote("a");
    let mut provider = OfflineContainerProvider::new();
    provider.add_version(&a, (1, 2, 0), []);
    provider.add_version(&a, (1, 1, 0), []);
    provider.add_version(&a, (1, 0, 0), []);

    let bindings = resolver(provider)
        .resolve(vec![requires(&a, (1, 0, 0), (2, 0, 0))])
        .await
        .unwrap();

    assert_eq!(bound(&bindings), vec![("a".into(), "1.2.0".into())]);
}

#[tokio::test]
async fn transitive_dependency() {
    init_log();
    let a = remote("a");
    let b = remote("b");
    let mut provider = OfflineContainerProvider::new();
    provider.add_version(&a, (1, 0, 0), [requires(&b, (1, 0, 0), (2, 0, 0))]);
    provider.add_version(&b, (1, 0, 0), []);
    provider.add_version(&b, (1, 1, 0), []);

    let bindings = resolver(provider)
        .resolve(vec![requires(&a, (1, 0, 0), (2, 0, 0))])
        .await
        .unwrap();

    assert_eq!(
        bound(&bindings),
        vec![("a".into(), "1.0.0".into()), ("b".into(), "1.1.0".into())]
    );
}

#[tokio::test]
async fn backtracks_to_an_older_version() {
    init_log();
    let a = remote("a");
    let c = remote("c");
    let mut provider = OfflineContainerProvider::new();
    provider.add_version(&a, (2, 0, 0), [requires(&c, (2, 0, 0), (3, 0, 0))]);
    provider.add_version(&a, (1, 0, 0), [requires(&c, (1, 0, 0), (2, 0, 0))]);
    provider.add_version(&c, (1, 5, 0), []);

    let bindings = resolver(provider)
        .resolve(vec![requires(&a, (1, 0, 0), (3, 0, 0))])
        .await
        .unwrap();

    assert_eq!(
        bound(&bindings),
        vec![("a".into(), "1.0.0".into()), ("c".into(), "1.5.0".into())]
    );
}

#[tokio::test]
async fn conflicting_requirements_produce_a_diagnostic() {
    init_log();
    let a = remote("a");
    let b = remote("b");
    let c = remote("c");
    let mut provider = OfflineContainerProvider::new();
    provider.add_version(&a, (1, 0, 0), [requires(&c, (1, 0, 0), (2, 0, 0))]);
    provider.add_version(&b, (1, 0, 0), [requires(&c, (2, 0, 0), (3, 0, 0))]);
    provider.add_version(&c, (1, 5, 0), []);
    provider.add_version(&c, (2, 5, 0), []);

    let error = resolver(provider)
        .resolve(vec![
            requires(&a, (1, 0, 0), (2, 0, 0)),
            requires(&b, (1, 0, 0), (2, 0, 0)),
        ])
        .await
        .unwrap_err();

    let ResolverError::Unresolvable(diagnostic) = error else {
        panic!("expected an unresolvable diagnostic, got {error}");
    };
    let report = diagnostic.to_string();
    assert!(report.contains("'a'"), "missing depender a: {report}");
    assert!(report.contains("'b'"), "missing depender b: {report}");
    assert!(report.contains("depends on 'c'"), "missing edges: {report}");
    assert!(
        report.contains("dependencies could not be resolved"),
        "missing conclusion: {report}"
    );
}

#[tokio::test]
async fn revision_override_takes_the_package_out_of_version_solving() {
    init_log();
    let a = remote("a");
    let b = remote("b");
    let mut provider = OfflineContainerProvider::new();
    provider.add_revision(&a, "main", [requires(&b, (1, 0, 0), (2, 0, 0))]);
    provider.add_version(&b, (1, 0, 0), []);

    let bindings = resolver(provider)
        .resolve(vec![
            Constraint::revision(a.clone(), "main", ProductFilter::Everything),
            requires(&b, (1, 0, 0), (2, 0, 0)),
        ])
        .await
        .unwrap();

    // Overridden packages come last.
    assert_eq!(
        bound(&bindings),
        vec![("b".into(), "1.0.0".into()), ("a".into(), "main".into())]
    );
    assert_eq!(
        bindings[1].bound_version,
        BoundVersion::Revision("main".into())
    );
}

#[tokio::test]
async fn pinned_version_is_preferred_on_the_fast_path() {
    init_log();
    let a = remote("a");
    let mut provider = OfflineContainerProvider::new();
    provider.add_version(&a, (1, 0, 0), []);
    provider.add_version(&a, (1, 1, 0), []);

    let mut pins = PinsMap::default();
    pins.insert(
        a.identity().clone(),
        Pin {
            package: a.clone(),
            state: PinState::Version(Version::new(1, 0, 0)),
        },
    );
    let resolver = DependencyResolver::new(provider, pins, ResolveConfig::default());
    let bindings = resolver
        .resolve(vec![requires(&a, (1, 0, 0), (2, 0, 0))])
        .await
        .unwrap();

    // 1.1.0 is available but the pin satisfies the constraint.
    assert_eq!(bound(&bindings), vec![("a".into(), "1.0.0".into())]);
}

#[tokio::test]
async fn empty_constraints_resolve_to_nothing() {
    init_log();
    let bindings = resolver(OfflineContainerProvider::new())
        .resolve(Vec::new())
        .await
        .unwrap();
    assert!(bindings.is_empty());
}

#[tokio::test]
async fn unversioned_chain_is_fully_overridden() {
    init_log();
    let a = remote("a");
    let b = remote("b");
    let mut provider = OfflineContainerProvider::new();
    provider.set_unversioned_dependencies(
        &a,
        [Constraint::unversioned(b.clone(), ProductFilter::Everything)],
    );
    provider.set_unversioned_dependencies(&b, []);

    let bindings = resolver(provider)
        .resolve(vec![Constraint::unversioned(
            a.clone(),
            ProductFilter::Everything,
        )])
        .await
        .unwrap();

    assert_eq!(
        bound(&bindings),
        vec![
            ("a".into(), "unversioned".into()),
            ("b".into(), "unversioned".into())
        ]
    );
}

#[tokio::test]
async fn no_matching_version_is_reported() {
    init_log();
    let a = remote("a");
    let mut provider = OfflineContainerProvider::new();
    provider.add_version(&a, (0, 9, 0), []);

    let error = resolver(provider)
        .resolve(vec![requires(&a, (1, 0, 0), (2, 0, 0))])
        .await
        .unwrap_err();

    let ResolverError::Unresolvable(diagnostic) = error else {
        panic!("expected an unresolvable diagnostic, got {error}");
    };
    assert!(
        diagnostic.as_str().contains("no versions of 'a'"),
        "unexpected report: {diagnostic}"
    );
}

#[tokio::test]
async fn two_revisions_of_the_same_package_are_structural() {
    init_log();
    let a = remote("a");
    let mut provider = OfflineContainerProvider::new();
    provider.add_revision(&a, "main", []);
    provider.add_revision(&a, "develop", []);

    let error = resolver(provider)
        .resolve(vec![
            Constraint::revision(a.clone(), "main", ProductFilter::Everything),
            Constraint::revision(a.clone(), "develop", ProductFilter::Everything),
        ])
        .await
        .unwrap_err();

    assert!(
        matches!(error, ResolverError::ConflictingRevisions { ref first, ref second, .. }
            if first == "main" && second == "develop"),
        "unexpected error: {error}"
    );
}

#[tokio::test]
async fn revision_dependency_on_a_local_package_is_structural() {
    init_log();
    let a = remote("a");
    let b = remote("b");
    let mut provider = OfflineContainerProvider::new();
    provider.add_revision(
        &a,
        "main",
        [Constraint::unversioned(b.clone(), ProductFilter::Everything)],
    );

    let error = resolver(provider)
        .resolve(vec![Constraint::revision(
            a.clone(),
            "main",
            ProductFilter::Everything,
        )])
        .await
        .unwrap_err();

    assert!(
        matches!(error, ResolverError::RevisionDependencyContainsLocalPackage { .. }),
        "unexpected error: {error}"
    );
}

#[tokio::test]
async fn pinned_branch_resolves_dependencies_at_the_pinned_commit() {
    init_log();
    let a = remote("a");
    let b = remote("b");
    let mut provider = OfflineContainerProvider::new();
    // The branch head depends on nothing; only the pinned commit pulls b.
    provider.add_revision(&a, "main", []);
    provider.add_revision(&a, "abc123", [requires(&b, (1, 0, 0), (2, 0, 0))]);
    provider.add_version(&b, (1, 0, 0), []);

    let mut pins = PinsMap::default();
    pins.insert(
        a.identity().clone(),
        Pin {
            package: a.clone(),
            state: PinState::Branch {
                name: "main".into(),
                revision: "abc123".into(),
            },
        },
    );
    let resolver = DependencyResolver::new(provider, pins, ResolveConfig::default());
    let bindings = resolver
        .resolve(vec![Constraint::revision(
            a.clone(),
            "main",
            ProductFilter::Everything,
        )])
        .await
        .unwrap();

    // b was found through the pinned commit's manifest; a reports the
    // branch it was requested at.
    assert_eq!(
        bound(&bindings),
        vec![("b".into(), "1.0.0".into()), ("a".into(), "main".into())]
    );
}

#[tokio::test]
async fn tools_incompatible_versions_are_avoided() {
    init_log();
    let a = remote("a");
    let mut provider = OfflineContainerProvider::new();
    provider.add_version(&a, (1, 0, 0), []);
    provider.add_version(&a, (1, 1, 0), []);
    provider.set_incompatible_tools_version(&a, (1, 1, 0), ToolsVersion::new(9, 0, 0));

    let bindings = resolver(provider)
        .resolve(vec![requires(&a, (1, 0, 0), (2, 0, 0))])
        .await
        .unwrap();

    assert_eq!(bound(&bindings), vec![("a".into(), "1.0.0".into())]);
}

#[tokio::test]
async fn all_versions_tools_incompatible_is_reported() {
    init_log();
    let a = remote("a");
    let mut provider = OfflineContainerProvider::new();
    provider.add_version(&a, (1, 0, 0), []);
    provider.set_incompatible_tools_version(&a, (1, 0, 0), ToolsVersion::new(9, 0, 0));

    let error = resolver(provider)
        .resolve(vec![requires(&a, (1, 0, 0), (2, 0, 0))])
        .await
        .unwrap_err();

    let ResolverError::Unresolvable(diagnostic) = error else {
        panic!("expected an unresolvable diagnostic, got {error}");
    };
    assert!(
        diagnostic
            .as_str()
            .contains("contains incompatible tools version (9.0.0)"),
        "unexpected report: {diagnostic}"
    );
}

#[tokio::test]
async fn resolution_is_deterministic_across_runs() {
    init_log();
    let build = || {
        let a = remote("a");
        let b = remote("b");
        let c = remote("c");
        let mut provider = OfflineContainerProvider::new();
        provider.add_version(&a, (1, 0, 0), [requires(&c, (1, 0, 0), (3, 0, 0))]);
        provider.add_version(&a, (1, 1, 0), [requires(&c, (1, 0, 0), (2, 0, 0))]);
        provider.add_version(&b, (1, 0, 0), [requires(&c, (1, 0, 0), (3, 0, 0))]);
        provider.add_version(&c, (1, 5, 0), []);
        provider.add_version(&c, (2, 5, 0), []);
        provider
    };
    let constraints = |a: &PackageRef, b: &PackageRef| {
        vec![
            requires(a, (1, 0, 0), (2, 0, 0)),
            requires(b, (1, 0, 0), (2, 0, 0)),
        ]
    };

    let a = remote("a");
    let b = remote("b");
    let first = resolver(build())
        .resolve(constraints(&a, &b))
        .await
        .unwrap();
    let second = resolver(build())
        .resolve(constraints(&a, &b))
        .await
        .unwrap();
    assert_eq!(bound(&first), bound(&second));

    // The same resolver instance re-solves identically too.
    let shared = resolver(build());
    let third = shared.resolve(constraints(&a, &b)).await.unwrap();
    let fourth = shared.resolve(constraints(&a, &b)).await.unwrap();
    assert_eq!(bound(&third), bound(&fourth));
    assert_eq!(bound(&first), bound(&third));
}

#[tokio::test]
async fn re_solving_with_exact_pins_of_the_result_is_stable() {
    init_log();
    let a = remote("a");
    let b = remote("b");
    let mut provider = OfflineContainerProvider::new();
    provider.add_version(&a, (1, 0, 0), [requires(&b, (1, 0, 0), (2, 0, 0))]);
    provider.add_version(&a, (1, 2, 0), [requires(&b, (1, 0, 0), (2, 0, 0))]);
    provider.add_version(&b, (1, 0, 0), []);
    provider.add_version(&b, (1, 4, 0), []);

    let constraints = vec![requires(&a, (1, 0, 0), (2, 0, 0))];
    let first = resolver(provider.clone())
        .resolve(constraints.clone())
        .await
        .unwrap();

    // Feed the result back as exact constraints alongside the input.
    let mut augmented = constraints;
    for binding in &first {
        let BoundVersion::Version(version) = &binding.bound_version else {
            continue;
        };
        augmented.push(Constraint::versioned(
            binding.package.clone(),
            VersionSet::exact(version.clone()),
            binding.products.clone(),
        ));
    }
    let second = resolver(provider).resolve(augmented).await.unwrap();
    assert_eq!(bound(&first), bound(&second));
}

#[tokio::test]
async fn output_is_sorted_by_identity() {
    init_log();
    let names = ["delta", "alpha", "charlie", "bravo"];
    let mut provider = OfflineContainerProvider::new();
    let mut constraints = Vec::new();
    for name in names {
        let package = remote(name);
        provider.add_version(&package, (1, 0, 0), []);
        constraints.push(requires(&package, (1, 0, 0), (2, 0, 0)));
    }

    let bindings = resolver(provider).resolve(constraints).await.unwrap();
    let identities: Vec<String> = bindings
        .iter()
        .map(|binding| binding.package.identity().to_string())
        .collect();
    assert_eq!(identities, vec!["alpha", "bravo", "charlie", "delta"]);
}

#[tokio::test]
async fn cancellation_aborts_the_resolve() {
    init_log();
    let a = remote("a");
    let mut provider = OfflineContainerProvider::new();
    provider.add_version(&a, (1, 0, 0), []);

    let token = CancellationToken::new();
    token.cancel();
    let resolver = DependencyResolver::new(provider, PinsMap::default(), ResolveConfig::default())
        .with_cancellation(token);

    let error = resolver
        .resolve(vec![requires(&a, (1, 0, 0), (2, 0, 0))])
        .await
        .unwrap_err();
    assert!(matches!(error, ResolverError::Cancelled));
}

#[tokio::test]
async fn provider_errors_propagate_unchanged() {
    init_log();
    let a = remote("a");
    let b = remote("missing");
    let mut provider = OfflineContainerProvider::new();
    provider.add_version(&a, (1, 0, 0), [requires(&b, (1, 0, 0), (2, 0, 0))]);

    let error = resolver(provider)
        .resolve(vec![requires(&a, (1, 0, 0), (2, 0, 0))])
        .await
        .unwrap_err();
    assert!(
        matches!(error, ResolverError::Provider(_)),
        "unexpected error: {error}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn wide_graphs_resolve_on_a_multi_thread_runtime() {
    init_log();
    let shared = remote("shared");
    let mut provider = OfflineContainerProvider::new();
    provider.add_version(&shared, (1, 0, 0), []);
    provider.add_version(&shared, (1, 9, 0), []);

    let mut constraints = Vec::new();
    for index in 0..24 {
        let package = remote(&format!("leaf{index:02}"));
        provider.add_version(&package, (1, 0, 0), [requires(&shared, (1, 0, 0), (2, 0, 0))]);
        constraints.push(requires(&package, (1, 0, 0), (2, 0, 0)));
    }

    let bindings = resolver(provider).resolve(constraints).await.unwrap();
    // 24 leaves plus the shared dependency, each decided exactly once.
    assert_eq!(bindings.len(), 25);
    let shared_binding = bindings
        .iter()
        .find(|binding| binding.package.identity().as_str() == "shared")
        .unwrap();
    assert_eq!(shared_binding.bound_version.to_string(), "1.9.0");
}
