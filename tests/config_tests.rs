//! Integration tests for configuration-document loading.

mod helpers;

use helpers::TestEnv;
use serde_json::json;

use capsa::config::{BuildConfig, ConfigError};
use capsa::process;

#[test]
fn test_resolve_from_file_uses_document_directory_as_base() {
    let env = TestEnv::new();
    env.write("hello.sh", "#!/bin/sh\necho hi\n");
    env.write(
        "capsa.json",
        serde_json::to_string_pretty(&json!({
            "files": ["hello.sh"],
            "output": "out.capsule"
        }))
        .unwrap(),
    );

    let config = BuildConfig::resolve_file(&env.path("capsa.json")).expect("resolves");
    assert_eq!(config.base_path, env.base.canonicalize().unwrap());
    assert!(config.output_path.ends_with("out.capsule"));
}

#[test]
fn test_discovery_prefers_capsa_json_over_dist() {
    let env = TestEnv::new();
    env.write("capsa.dist.json", "{}");
    let found = BuildConfig::discover(&env.base).expect("dist found");
    assert!(found.ends_with("capsa.dist.json"));

    env.write("capsa.json", "{}");
    let found = BuildConfig::discover(&env.base).expect("primary found");
    assert!(found.ends_with("capsa.json"));
}

#[test]
fn test_discovery_fails_cleanly_when_absent() {
    let env = TestEnv::new();
    let err = BuildConfig::discover(&env.base).expect_err("nothing to discover");
    assert!(matches!(err, ConfigError::Missing(_)));
}

#[test]
fn test_malformed_json_is_a_schema_error() {
    let env = TestEnv::new();
    env.write("capsa.json", "{ not json");
    let err = BuildConfig::resolve_file(&env.path("capsa.json")).expect_err("must fail");
    assert!(matches!(err, ConfigError::Schema(_)));
}

#[test]
fn test_git_version_is_injected_from_working_tree() {
    if !process::exists("git") {
        // Toolchain hosts without git skip this scenario.
        return;
    }
    let env = TestEnv::new();
    env.write("hello.sh", "#!/bin/sh\necho hi\n");

    let git = |args: &[&str]| {
        process::run_in("git", args.iter().copied(), &env.base).expect("git invocation")
    };
    git(&["init", "-q"]);
    git(&["-c", "user.email=t@example.org", "-c", "user.name=t", "add", "."]);
    git(&[
        "-c",
        "user.email=t@example.org",
        "-c",
        "user.name=t",
        "commit",
        "-q",
        "-m",
        "initial",
    ]);

    let config = BuildConfig::resolve_value(
        json!({ "git-version": "rev", "files": ["hello.sh"] }),
        &env.base,
    )
    .expect("resolves with git version");

    let injected = config.replacements.get("rev").expect("token injected");
    let rev = injected.as_str().expect("string value");
    let short_rev = regex::Regex::new(r"^[0-9a-f]{4,40}$").unwrap();
    assert!(short_rev.is_match(rev), "unexpected revision string: {rev}");

    // Tag the commit; an exact tag wins over the short revision.
    git(&["tag", "v9.9.9"]);
    let config = BuildConfig::resolve_value(
        json!({ "git-version": "rev", "files": ["hello.sh"] }),
        &env.base,
    )
    .expect("resolves with tag");
    assert_eq!(
        config.replacements.get("rev").unwrap(),
        &json!("v9.9.9")
    );
}
