//! Resolver scenario tests
//!
//! These tests drive the resolver end-to-end over small in-memory
//! registries and validate package ordering, conflict handling, variant
//! selection, conditions and context extraction.

use std::path::PathBuf;

use indexmap::IndexMap;

use super::resolver::{Resolver, ResolverContext, ResolveOptions};
use super::Graph;
use crate::context::resolve_context;
use crate::definition::tests::definition_from_json;
use crate::error::{ResolutionError, WizError};
use crate::registry::Index;
use wiz_version::Requirement;

/// Helper to build an index from definition JSON strings
fn index(contents: &[&str]) -> Index {
    let definitions = contents
        .iter()
        .map(|content| definition_from_json(content).unwrap())
        .collect::<Vec<_>>();
    Index::from_definitions(definitions, vec![PathBuf::from("/registry")])
}

/// Helper to resolve requests into package identifiers
fn resolve_identifiers(
    index: &Index,
    requests: &[&str],
    options: ResolveOptions,
) -> Result<Vec<String>, WizError> {
    let requests: Vec<String> = requests.iter().map(|request| request.to_string()).collect();
    let context = resolve_context(&requests, index, options, None)?;
    Ok(context
        .packages
        .iter()
        .map(|package| package.identifier().to_string())
        .collect())
}

fn environ(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[test]
fn test_single_definition() {
    let index = index(&[r#"{
        "identifier": "foo",
        "version": "0.1.0",
        "environ": {"PATH": "/a:${PATH}"},
        "command": {"foo": "foo-bin"}
    }"#]);

    let context = resolve_context(
        &["foo".to_string()],
        &index,
        ResolveOptions::default(),
        Some(environ(&[("PATH", "/usr/bin")])),
    )
    .unwrap();

    let identifiers: Vec<&str> = context
        .packages
        .iter()
        .map(|package| package.identifier())
        .collect();
    assert_eq!(identifiers, vec!["foo==0.1.0"]);
    assert_eq!(context.environ["PATH"], "/a:/usr/bin");
    assert_eq!(context.command["foo"], "foo-bin");
    assert!(context.environ.contains_key("WIZ_CONTEXT"));
}

#[test]
fn test_dependencies_ordered_by_distance() {
    let index = index(&[
        r#"{"identifier": "foo", "version": "0.1.0", "requirements": ["bim", "baz"]}"#,
        r#"{"identifier": "bar", "version": "0.1.0"}"#,
        r#"{"identifier": "bim", "version": "0.1.0"}"#,
        r#"{"identifier": "baz", "version": "0.1.0"}"#,
    ]);

    let identifiers =
        resolve_identifiers(&index, &["foo", "bar"], ResolveOptions::default()).unwrap();
    assert_eq!(
        identifiers,
        vec!["foo==0.1.0", "bar==0.1.0", "bim==0.1.0", "baz==0.1.0"]
    );
}

#[test]
fn test_conflict_keeps_matching_version() {
    let index = index(&[
        r#"{"identifier": "foo", "version": "0.1.0"}"#,
        r#"{"identifier": "foo", "version": "1.0.0"}"#,
    ]);

    let identifiers =
        resolve_identifiers(&index, &["foo", "foo ==0.1.0"], ResolveOptions::default()).unwrap();
    assert_eq!(identifiers, vec!["foo==0.1.0"]);
}

#[test]
fn test_conflict_with_downgrade() {
    let index = index(&[
        r#"{"identifier": "foo", "version": "1.0.0", "requirements": ["bar <2"]}"#,
        r#"{"identifier": "foo", "version": "0.5.0", "requirements": ["bar <3"]}"#,
        r#"{"identifier": "bar", "version": "1.5.0"}"#,
        r#"{"identifier": "bar", "version": "2.5.0"}"#,
    ]);

    let identifiers =
        resolve_identifiers(&index, &["foo", "bar ==2.5.0"], ResolveOptions::default()).unwrap();
    assert_eq!(identifiers, vec!["foo==0.5.0", "bar==2.5.0"]);
}

#[test]
fn test_downgrade_bounded_by_max_attempts() {
    let index = index(&[
        r#"{"identifier": "foo", "version": "1.0.0", "requirements": ["bar <2"]}"#,
        r#"{"identifier": "foo", "version": "0.5.0", "requirements": ["bar <3"]}"#,
        r#"{"identifier": "bar", "version": "1.5.0"}"#,
        r#"{"identifier": "bar", "version": "2.5.0"}"#,
    ]);

    let options = ResolveOptions {
        max_attempts: 0,
        ..Default::default()
    };
    assert!(resolve_identifiers(&index, &["foo", "bar ==2.5.0"], options).is_err());
}

fn numpy_registry() -> Index {
    index(&[
        r#"{
            "identifier": "numpy",
            "version": "1.16.6",
            "variants": [
                {"identifier": "3.7", "requirements": ["python >=3.7, <3.8"]},
                {"identifier": "2.7", "requirements": ["python >=2.7, <2.8"]}
            ]
        }"#,
        r#"{"identifier": "python", "version": "3.7.8"}"#,
        r#"{"identifier": "python", "version": "2.7.16"}"#,
    ])
}

#[test]
fn test_variant_selection_by_precedence() {
    let identifiers =
        resolve_identifiers(&numpy_registry(), &["numpy"], ResolveOptions::default()).unwrap();
    assert_eq!(identifiers, vec!["numpy[3.7]==1.16.6", "python==3.7.8"]);
}

#[test]
fn test_variant_pinned_by_request() {
    let identifiers =
        resolve_identifiers(&numpy_registry(), &["numpy[2.7]"], ResolveOptions::default())
            .unwrap();
    assert_eq!(identifiers, vec!["numpy[2.7]==1.16.6", "python==2.7.16"]);
}

#[test]
fn test_variant_conflict_reports_requirement_pair() {
    let error = resolve_identifiers(
        &numpy_registry(),
        &["numpy[2.7]", "python ==3.*"],
        ResolveOptions::default(),
    )
    .unwrap_err();

    let message = error.to_string();
    assert!(message.contains("Failed to resolve graph at combination #"));
    assert!(message.contains("python >=2.7, <2.8"));
    assert!(message.contains("python ==3.*"));
}

#[test]
fn test_variant_fallback_when_first_fails() {
    // The "3.7" variant requires a python version which is not available,
    // so the next combination selects "2.7".
    let index = index(&[
        r#"{
            "identifier": "numpy",
            "version": "1.16.6",
            "variants": [
                {"identifier": "3.7", "requirements": ["python >=3.7, <3.8"]},
                {"identifier": "2.7", "requirements": ["python >=2.7, <2.8"]}
            ]
        }"#,
        r#"{"identifier": "python", "version": "2.7.16"}"#,
    ]);

    let identifiers =
        resolve_identifiers(&index, &["numpy"], ResolveOptions::default()).unwrap();
    assert_eq!(identifiers, vec!["numpy[2.7]==1.16.6", "python==2.7.16"]);
}

fn condition_registry() -> Index {
    index(&[
        r#"{
            "identifier": "project",
            "version": "0.1.0",
            "auto-use": true,
            "conditions": ["maya"],
            "requirements": ["tdsvn", "maya ==2016.*"]
        }"#,
        r#"{"identifier": "maya", "version": "2016.1"}"#,
        r#"{"identifier": "maya", "version": "2018.0"}"#,
        r#"{"identifier": "tdsvn", "version": "0.1.0"}"#,
        r#"{"identifier": "noise", "version": "0.1.0"}"#,
    ])
}

#[test]
fn test_condition_unfulfilled() {
    let identifiers =
        resolve_identifiers(&condition_registry(), &["noise"], ResolveOptions::default())
            .unwrap();
    assert_eq!(identifiers, vec!["noise==0.1.0"]);
}

#[test]
fn test_condition_fulfilled() {
    let identifiers =
        resolve_identifiers(&condition_registry(), &["maya"], ResolveOptions::default()).unwrap();
    assert_eq!(
        identifiers,
        vec!["project==0.1.0", "maya==2016.1", "tdsvn==0.1.0"]
    );
}

#[test]
fn test_condition_trimmed_after_conflict_resolution() {
    // "gizmo" joins the graph while maya 2018 is present, then loses its
    // condition once the conflict settles on maya 2016.
    let index = index(&[
        r#"{
            "identifier": "gizmo",
            "version": "0.1.0",
            "auto-use": true,
            "conditions": ["maya >=2018"]
        }"#,
        r#"{"identifier": "app", "version": "1.0.0", "requirements": ["maya ==2016.*"]}"#,
        r#"{"identifier": "maya", "version": "2016.1"}"#,
        r#"{"identifier": "maya", "version": "2018.0"}"#,
    ]);

    let identifiers =
        resolve_identifiers(&index, &["maya", "app"], ResolveOptions::default()).unwrap();
    assert_eq!(identifiers, vec!["maya==2016.1", "app==1.0.0"]);
}

#[test]
fn test_implicit_packages_have_higher_priority() {
    let context = resolve_context(
        &["maya".to_string()],
        &condition_registry(),
        ResolveOptions::default(),
        None,
    )
    .unwrap();

    // The auto-use package is closest to the root.
    assert_eq!(context.packages[0].identifier(), "project==0.1.0");
}

#[test]
fn test_implicit_packages_ignored() {
    let options = ResolveOptions {
        include_implicit: false,
        ..Default::default()
    };
    let identifiers = resolve_identifiers(&condition_registry(), &["maya"], options).unwrap();
    assert_eq!(identifiers, vec!["maya==2018.0"]);
}

#[test]
fn test_implicit_environ_prepended() {
    let index = index(&[
        r#"{
            "identifier": "projX",
            "version": "0.1.0",
            "auto-use": true,
            "environ": {"SHADER_PATH": "/p:${SHADER_PATH}"}
        }"#,
        r#"{
            "identifier": "mtoa",
            "version": "0.1.0",
            "environ": {"SHADER_PATH": "/m:${SHADER_PATH}"}
        }"#,
    ]);

    let context =
        resolve_context(&["mtoa".to_string()], &index, ResolveOptions::default(), None).unwrap();
    assert_eq!(context.environ["SHADER_PATH"], "/p:/m:");
}

#[test]
fn test_namespace_disambiguation() {
    let index = index(&[
        r#"{"identifier": "massive", "namespace": "massive", "version": "1.0.0"}"#,
        r#"{"identifier": "massive", "namespace": "maya", "version": "1.0.0"}"#,
    ]);

    let identifiers =
        resolve_identifiers(&index, &["massive"], ResolveOptions::default()).unwrap();
    assert_eq!(identifiers, vec!["massive::massive==1.0.0"]);
}

#[test]
fn test_namespace_from_other_requests() {
    // Requesting "maya" alongside hints the "maya" namespace for "plugin".
    let index = index(&[
        r#"{"identifier": "maya", "version": "2020.0"}"#,
        r#"{"identifier": "plugin", "namespace": "maya", "version": "1.0.0"}"#,
    ]);

    let identifiers =
        resolve_identifiers(&index, &["maya", "plugin"], ResolveOptions::default()).unwrap();
    assert_eq!(identifiers, vec!["maya==2020.0", "maya::plugin==1.0.0"]);
}

#[test]
fn test_cyclic_requirements() {
    let index = index(&[
        r#"{"identifier": "a", "version": "1.0.0", "requirements": ["b"]}"#,
        r#"{"identifier": "b", "version": "1.0.0", "requirements": ["a"]}"#,
    ]);

    let identifiers = resolve_identifiers(&index, &["a"], ResolveOptions::default()).unwrap();
    assert_eq!(identifiers, vec!["a==1.0.0", "b==1.0.0"]);
}

#[test]
fn test_unknown_request_fails() {
    let index = index(&[r#"{"identifier": "foo", "version": "0.1.0"}"#]);
    let error =
        resolve_identifiers(&index, &["unknown"], ResolveOptions::default()).unwrap_err();
    assert!(matches!(error, WizError::GraphResolution(_)));
}

#[test]
fn test_combination_limit() {
    let options = ResolveOptions {
        max_combinations: 0,
        ..Default::default()
    };
    let error = resolve_identifiers(&numpy_registry(), &["numpy"], options).unwrap_err();
    assert!(matches!(
        error,
        WizError::GraphResolution(ResolutionError::Exhausted { .. })
    ));
}

#[test]
fn test_determinism() {
    let requests = vec!["numpy".to_string(), "python".to_string()];
    let index = numpy_registry();

    let reference = resolve_context(&requests, &index, ResolveOptions::default(), None).unwrap();
    for _ in 0..3 {
        let context =
            resolve_context(&requests, &index, ResolveOptions::default(), None).unwrap();

        let left: Vec<&str> = reference.packages.iter().map(|p| p.identifier()).collect();
        let right: Vec<&str> = context.packages.iter().map(|p| p.identifier()).collect();
        assert_eq!(left, right);
        assert_eq!(reference.environ, context.environ);
        assert_eq!(reference.command, context.command);
    }
}

#[test]
fn test_variant_uniqueness() {
    // Several packages pulling distinct variant sets still resolve to one
    // variant per definition.
    let index = index(&[
        r#"{
            "identifier": "lib",
            "version": "1.0.0",
            "variants": [
                {"identifier": "V2", "requirements": ["python >=3.7, <3.8"]},
                {"identifier": "V1", "requirements": ["python >=2.7, <2.8"]}
            ]
        }"#,
        r#"{"identifier": "tool", "version": "1.0.0", "requirements": ["lib"]}"#,
        r#"{"identifier": "python", "version": "3.7.8"}"#,
        r#"{"identifier": "python", "version": "2.7.16"}"#,
    ]);

    let identifiers =
        resolve_identifiers(&index, &["tool", "lib"], ResolveOptions::default()).unwrap();

    let variants: Vec<&String> = identifiers
        .iter()
        .filter(|identifier| identifier.starts_with("lib["))
        .collect();
    assert_eq!(variants.len(), 1);
}

#[test]
fn test_variant_groups_ordered_by_occurrences() {
    let registry = index(&[
        r#"{
            "identifier": "alpha",
            "version": "1.0.0",
            "variants": [{"identifier": "V1"}, {"identifier": "V2"}]
        }"#,
        r#"{
            "identifier": "beta",
            "version": "1.0.0",
            "variants": [{"identifier": "W1"}, {"identifier": "W2"}]
        }"#,
        r#"{"identifier": "tool", "version": "1.0.0", "requirements": ["beta"]}"#,
    ]);

    let context = ResolverContext::new(&registry, ResolveOptions::default());
    let mut graph = Graph::new(&context);
    graph.update_from_requirements(&[
        Requirement::parse("alpha").unwrap(),
        Requirement::parse("beta").unwrap(),
        Requirement::parse("tool").unwrap(),
    ]);

    let groups = graph.variant_groups();
    assert_eq!(groups.len(), 2);

    // "beta" is referenced twice, so its group comes first; identifiers
    // within a group follow the variant declaration order.
    assert_eq!(
        groups[0],
        vec!["beta[W1]==1.0.0".to_string(), "beta[W2]==1.0.0".to_string()]
    );
    assert_eq!(
        groups[1],
        vec!["alpha[V1]==1.0.0".to_string(), "alpha[V2]==1.0.0".to_string()]
    );
}

#[test]
fn test_requirement_satisfaction_in_resolved_graph() {
    let registry = index(&[
        r#"{"identifier": "foo", "version": "1.0.0", "requirements": ["bar <2"]}"#,
        r#"{"identifier": "bar", "version": "1.5.0"}"#,
    ]);

    let context = ResolverContext::new(&registry, ResolveOptions::default());
    let mut resolver = Resolver::new(&context);
    let packages = resolver
        .compute_packages(&[Requirement::parse("foo").unwrap()])
        .unwrap();

    let bar = packages
        .iter()
        .find(|package| package.name() == "bar")
        .unwrap();
    assert!(bar.satisfies(&Requirement::parse("bar <2").unwrap()));
}

#[test]
fn test_history_records_resolution() {
    use crate::history::Action;

    let registry = index(&[r#"{"identifier": "foo", "version": "0.1.0"}"#]);
    let context = ResolverContext::new(&registry, ResolveOptions::default()).with_history();
    let mut resolver = Resolver::new(&context);
    resolver
        .compute_packages(&[Requirement::parse("foo").unwrap()])
        .unwrap();

    let actions = context.history();
    assert!(actions
        .iter()
        .any(|action| matches!(action, Action::GraphCreation { .. })));
    assert!(actions.iter().any(
        |action| matches!(action, Action::NodeCreation { identifier } if identifier == "foo==0.1.0")
    ));
    assert!(actions
        .iter()
        .any(|action| matches!(action, Action::PackagesExtraction { .. })));
}
