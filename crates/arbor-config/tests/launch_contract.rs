//! Parsing and rendering of the positional launch contract.

use arbor_config::{Ancestry, ConfigError, LaunchArgs, LogFormat, Scheme, Severity};
use clap::CommandFactory;
use rstest::rstest;

fn parse(args: &[&str]) -> Result<LaunchArgs, clap::Error> {
    LaunchArgs::parse_from_iter(std::iter::once("arbord").chain(args.iter().copied()))
}

#[test]
fn command_definition_is_consistent() {
    LaunchArgs::command().debug_assert();
}

#[test]
fn built_in_version_flag_stays_separate_from_vsn() {
    let error = parse(&["--version"]).expect_err("version flag short-circuits parsing");
    assert_eq!(error.kind(), clap::error::ErrorKind::DisplayVersion);
}

#[test]
fn six_positional_parameters_build_a_child_config() {
    let args = parse(&[
        "leaf",
        "branch",
        "127.0.0.1",
        "8101",
        "info",
        r#"[["root","http://127.0.0.1:8100"]]"#,
        "--vsn",
        "1.2.0",
    ])
    .expect("parse launch args");
    let config = args.into_config().expect("valid config");

    assert_eq!(config.name, "leaf");
    assert_eq!(config.app, "branch");
    assert_eq!(config.port, 8101);
    assert_eq!(config.severity, Severity::Info);
    assert_eq!(config.version, "1.2.0");
    assert_eq!(config.scheme(), Scheme::Http);
    assert_eq!(config.address(), "http://127.0.0.1:8101");
    assert_eq!(
        config.ancestry.parent().map(|a| a.address.as_str()),
        Some("http://127.0.0.1:8100")
    );
}

#[test]
fn trailing_positionals_default_to_root() {
    let args = parse(&["root", "spawner", "0.0.0.0", "8100"]).expect("parse launch args");
    let config = args.into_config().expect("valid config");
    assert!(config.is_root());
    assert_eq!(config.severity, Severity::Debug);
    assert_eq!(config.version, "undefined");
    assert_eq!(config.log_format, LogFormat::Compact);
}

#[rstest]
#[case(&["root", "spawner", "127.0.0.1"])]
#[case(&["root", "spawner", "127.0.0.1", "not-a-port"])]
#[case(&["root", "spawner", "127.0.0.1", "8100", "verbose"])]
fn malformed_arguments_are_rejected(#[case] args: &[&str]) {
    assert!(parse(args).is_err());
}

#[test]
fn security_without_key_material_fails() {
    let args = parse(&[
        "root",
        "spawner",
        "127.0.0.1",
        "8100",
        "--security",
        "--certfile",
        "cert.pem",
    ])
    .expect("parse launch args");
    assert!(matches!(
        args.into_config(),
        Err(ConfigError::MissingTlsFiles)
    ));
}

#[test]
fn malformed_ancestry_is_a_config_error() {
    let args = parse(&["leaf", "branch", "127.0.0.1", "8101", "debug", "{}"])
        .expect("parse launch args");
    assert!(matches!(
        args.into_config(),
        Err(ConfigError::Ancestry { .. })
    ));
}

#[test]
fn rendered_arguments_parse_back_to_the_same_contract() {
    let ancestry = Ancestry::root().extended("root", "https://10.0.0.1:8100");
    let original = parse(&[
        "leaf",
        "branch",
        "10.0.0.1",
        "8102",
        "warning",
        &ancestry.to_string(),
        "--security",
        "--certfile",
        "cert.pem",
        "--keyfile",
        "key.pem",
    ])
    .expect("parse launch args");

    let rendered = original.to_args();
    let reparsed = LaunchArgs::parse_from_iter(
        std::iter::once(String::from("arbord")).chain(rendered.into_iter()),
    )
    .expect("reparse rendered args");

    assert_eq!(reparsed, original);
    let config = reparsed.into_config().expect("valid config");
    assert_eq!(config.address(), "https://10.0.0.1:8102");
}
