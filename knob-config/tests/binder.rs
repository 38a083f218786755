use std::collections::HashMap;

use knob_config::{BindError, BinderOptions, Configuration, bind, get};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
enum Mode {
    #[default]
    Passive,
    Active,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct Endpoint {
    host: String,
    port: u16,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct ServiceOptions {
    name: String,
    max_retries: u32,
    ratio: f64,
    enabled: bool,
    initial: char,
    mode: Mode,
    timeout_ms: Option<u64>,
    tags: Vec<String>,
    endpoints: Vec<Endpoint>,
    primary: Endpoint,
    labels: HashMap<String, String>,
}

#[test]
fn test_bind_scalars() {
    let config = Configuration::from_pairs([
        ("Service:Name", "billing"),
        ("Service:MaxRetries", "5"),
        ("Service:Ratio", "0.25"),
        ("Service:Enabled", "TRUE"),
        ("Service:Initial", "b"),
        ("Service:Mode", "active"),
        ("Service:timeout_ms", "1500"),
    ]);
    let options: ServiceOptions =
        get(&config.section("Service"), &BinderOptions::default()).unwrap();
    assert_eq!(options.name, "billing");
    assert_eq!(options.max_retries, 5);
    assert_eq!(options.ratio, 0.25);
    assert!(options.enabled);
    assert_eq!(options.initial, 'b');
    assert_eq!(options.mode, Mode::Active);
    assert_eq!(options.timeout_ms, Some(1500));
}

#[test]
fn test_bind_collections_and_nested() {
    let config = Configuration::from_pairs([
        ("Service:Tags:0", "a"),
        ("Service:Tags:2", "c"),
        ("Service:Tags:1", "b"),
        ("Service:Endpoints:0:Host", "one"),
        ("Service:Endpoints:0:Port", "1"),
        ("Service:Endpoints:1:Host", "two"),
        ("Service:Primary:Host", "main"),
        ("Service:Labels:Team", "payments"),
    ]);
    let options: ServiceOptions =
        get(&config.section("Service"), &BinderOptions::default()).unwrap();
    assert_eq!(options.tags, vec!["a", "b", "c"]);
    assert_eq!(
        options.endpoints,
        vec![
            Endpoint {
                host: "one".to_string(),
                port: 1
            },
            Endpoint {
                host: "two".to_string(),
                port: 0
            },
        ]
    );
    assert_eq!(options.primary.host, "main");
    assert_eq!(options.labels.get("Team").map(String::as_str), Some("payments"));
}

#[test]
fn test_bind_keeps_unmentioned_fields() {
    let config = Configuration::from_pairs([("Service:Primary:Port", "443")]);
    let mut options = ServiceOptions {
        name: "kept".to_string(),
        primary: Endpoint {
            host: "kept.example".to_string(),
            port: 80,
        },
        ..Default::default()
    };
    bind(&config.section("Service"), &mut options, &BinderOptions::default()).unwrap();
    assert_eq!(options.name, "kept");
    assert_eq!(options.primary.host, "kept.example");
    assert_eq!(options.primary.port, 443);
}

#[test]
fn test_bind_missing_section() {
    let config = Configuration::from_pairs([("Other:Name", "x")]);
    let mut options = ServiceOptions {
        max_retries: 3,
        ..Default::default()
    };
    bind(&config.section("Service"), &mut options, &BinderOptions::default()).unwrap();
    assert_eq!(options.max_retries, 3);
}

#[test]
fn test_bind_empty_value_keeps_number() {
    let config = Configuration::from_pairs([("Service:MaxRetries", ""), ("Service:TimeoutMs", "")]);
    let mut options = ServiceOptions {
        max_retries: 3,
        ..Default::default()
    };
    bind(&config.section("Service"), &mut options, &BinderOptions::default()).unwrap();
    assert_eq!(options.max_retries, 3);
    assert_eq!(options.timeout_ms, None);
}

#[test]
fn test_bind_invalid_value() {
    let config = Configuration::from_pairs([("Service:MaxRetries", "many")]);
    let err = get::<ServiceOptions>(&config.section("Service"), &BinderOptions::default())
        .unwrap_err();
    match err {
        BindError::InvalidValue { path, value, .. } => {
            assert_eq!(path, "Service:MaxRetries");
            assert_eq!(value, "many");
        }
        err => panic!("unexpected error: {err}"),
    }
}

#[test]
fn test_bind_unknown_keys() {
    let config = Configuration::from_pairs([("Service:Name", "x"), ("Service:Colour", "blue")]);
    let options: ServiceOptions =
        get(&config.section("Service"), &BinderOptions::default()).unwrap();
    assert_eq!(options.name, "x");

    let strict = BinderOptions::default().with_error_on_unknown_configuration(true);
    let err = get::<ServiceOptions>(&config.section("Service"), &strict).unwrap_err();
    assert!(matches!(err, BindError::UnknownKey { ref path } if path == "Service:Colour"));
}

#[test]
fn test_binder_options_bindable() {
    let config = Configuration::from_pairs([("Binder:ErrorOnUnknownConfiguration", "true")]);
    let options: BinderOptions = get(&config.section("Binder"), &BinderOptions::default()).unwrap();
    assert!(options.error_on_unknown_configuration);
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct ListenerOptions {
    ports: Vec<u16>,
    tags: Vec<String>,
}

#[test]
fn test_bind_sparse_indices() {
    let config = Configuration::from_pairs([
        ("Listener:Ports:0", "80"),
        ("Listener:Ports:2", "443"),
        ("Listener:Tags:3", "x"),
    ]);
    let options: ListenerOptions =
        get(&config.section("Listener"), &BinderOptions::default()).unwrap();
    assert_eq!(options.ports, vec![80, 443]);
    assert_eq!(options.tags, vec!["x"]);
}

#[test]
fn test_bind_indices_overlay_existing_items() {
    let config = Configuration::from_pairs([
        ("Listener:Ports:1", "8443"),
        ("Listener:Ports:7", "9000"),
        ("Listener:Ports:5", "9001"),
    ]);
    let mut options = ListenerOptions {
        ports: vec![80, 443, 8080],
        ..Default::default()
    };
    bind(&config.section("Listener"), &mut options, &BinderOptions::default()).unwrap();
    assert_eq!(options.ports, vec![80, 8443, 8080, 9001, 9000]);
}

#[test]
fn test_bind_huge_indices() {
    let config = Configuration::from_pairs([
        ("Listener:Tags:18446744073709551615", "max"),
        ("Listener:Tags:4000000000", "far"),
    ]);
    let options: ListenerOptions =
        get(&config.section("Listener"), &BinderOptions::default()).unwrap();
    assert_eq!(options.tags, vec!["far", "max"]);

    let config = Configuration::from_pairs([("Listener:Tags:99999999999999999999999", "x")]);
    let err = get::<ListenerOptions>(&config.section("Listener"), &BinderOptions::default())
        .unwrap_err();
    assert!(matches!(err, BindError::InvalidValue { ref path, .. } if path == "Listener:Tags"));
}
