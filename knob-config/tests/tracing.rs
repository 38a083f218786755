use knob::Container;
use knob_config::{Configuration, LoggingOptions, RegisterOptionsExt as _, Tracing};
use tracing::Level;

// Installs the global subscriber, so this binary holds a single test.
#[tokio::test]
async fn test_tracing_follows_configuration() {
    let config = Configuration::from_pairs([
        ("Logging:Level", "info"),
        ("Logging:Directives:0", "hyper=warn"),
    ]);
    let container = Container::builder()
        .add_component(config.clone())
        .register_options::<LoggingOptions>()
        .unwrap()
        .build()
        .await
        .unwrap();

    let tracing = Tracing::init(&container).unwrap();
    assert_eq!(tracing.options().level, Level::INFO);
    assert_eq!(tracing.options().directives, vec!["hyper=warn"]);
    assert!(Tracing::init(&container).is_err());

    config.set("Logging:Level", "ERROR");
    config.reload().unwrap();
    assert_eq!(tracing.options().level, Level::ERROR);

    let options = LoggingOptions {
        level: Level::TRACE,
        directives: Vec::new(),
    };
    tracing.apply(&options).unwrap();
    assert_eq!(tracing.options(), options);

    let invalid = LoggingOptions {
        directives: vec!["hyper=loud".to_string()],
        ..LoggingOptions::default()
    };
    assert!(tracing.apply(&invalid).is_err());
    assert_eq!(tracing.options(), options);
}
