//! End-to-end test: discover definitions from disk and resolve a context.

use std::fs;
use std::path::Path;

use wiz_core::{resolve_context, Index, ResolveOptions, System};
use wiz_version::Version;

fn write_definition(registry: &Path, name: &str, content: &str) {
    fs::write(registry.join(name), content).unwrap();
}

fn system() -> System {
    System::new("linux", "x86_64", "el", Version::parse("7.4").unwrap())
}

#[test]
fn test_discover_and_resolve() {
    let root = tempfile::tempdir().unwrap();
    let registry = root.path().join("registry");
    fs::create_dir_all(registry.join("apps")).unwrap();

    write_definition(
        &registry,
        "python-2.7.16.json",
        r#"{"identifier": "python", "version": "2.7.16"}"#,
    );
    write_definition(
        &registry,
        "python-3.7.8.json",
        r#"{"identifier": "python", "version": "3.7.8"}"#,
    );
    write_definition(
        &registry.join("apps"),
        "app.json",
        r#"{
            "identifier": "app",
            "version": "1.0.0",
            "environ": {"PATH": "${INSTALL_LOCATION}/bin:${PATH}"},
            "install-location": "/apps/app/1.0.0",
            "command": {"app": "AppExe"},
            "requirements": ["python >=3.7, <4"]
        }"#,
    );

    let paths = vec![registry.clone()];
    let index = Index::from_registries(&paths, &system());

    let context =
        resolve_context(&["app".to_string()], &index, ResolveOptions::default(), None).unwrap();

    let identifiers: Vec<&str> = context
        .packages
        .iter()
        .map(|package| package.identifier())
        .collect();
    assert_eq!(identifiers, vec!["app==1.0.0", "python==3.7.8"]);

    assert_eq!(context.environ["PATH"], "/apps/app/1.0.0/bin:");
    assert_eq!(context.command["app"], "AppExe");
    assert_eq!(context.registries, paths);

    // The encoded context round-trips.
    let (packages, registries) =
        wiz_core::decode_context(&context.environ["WIZ_CONTEXT"]).unwrap();
    assert_eq!(packages, vec!["app==1.0.0", "python==3.7.8"]);
    assert_eq!(registries, paths);
}

#[test]
fn test_discover_skips_disabled_and_incompatible() {
    let root = tempfile::tempdir().unwrap();
    let registry = root.path().to_path_buf();

    write_definition(
        &registry,
        "foo.json",
        r#"{"identifier": "foo", "version": "1.0.0"}"#,
    );
    write_definition(
        &registry,
        "foo-disabled.json",
        r#"{"identifier": "foo", "version": "2.0.0", "disabled": true}"#,
    );
    write_definition(
        &registry,
        "foo-windows.json",
        r#"{
            "identifier": "foo",
            "version": "3.0.0",
            "system": {"platform": "windows"}
        }"#,
    );
    write_definition(&registry, "invalid.json", "{ not json");
    write_definition(&registry, "ignored.txt", "not a definition");

    let index = Index::from_registries(&[registry], &system());
    let context =
        resolve_context(&["foo".to_string()], &index, ResolveOptions::default(), None).unwrap();

    assert_eq!(context.packages[0].identifier(), "foo==1.0.0");
}

#[test]
fn test_registry_priority() {
    // The same definition version in a later registry overrides earlier
    // ones.
    let root = tempfile::tempdir().unwrap();
    let primary = root.path().join("primary");
    let secondary = root.path().join("secondary");
    fs::create_dir_all(&primary).unwrap();
    fs::create_dir_all(&secondary).unwrap();

    write_definition(
        &primary,
        "foo.json",
        r#"{"identifier": "foo", "version": "1.0.0", "environ": {"KEY": "primary"}}"#,
    );
    write_definition(
        &secondary,
        "foo.json",
        r#"{"identifier": "foo", "version": "1.0.0", "environ": {"KEY": "secondary"}}"#,
    );

    let index = Index::from_registries(&[primary, secondary], &system());
    let context =
        resolve_context(&["foo".to_string()], &index, ResolveOptions::default(), None).unwrap();

    assert_eq!(context.environ["KEY"], "secondary");
}
