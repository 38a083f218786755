use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use knob::{
    ChangeToken, ChangeTokenSource, ChangeTrigger, ConfigureOptions, ConfigureOptionsExt as _,
    Container, DEFAULT_NAME, OptionsError, ServiceCollection, StdError,
};

#[derive(Default, Debug, Clone, PartialEq)]
struct ServerOptions {
    host: String,
    port: u16,
    steps: Vec<&'static str>,
}

#[tokio::test]
async fn test_defaults_without_registrations() {
    let container = Container::builder().build().await.unwrap();
    let options = container.options::<ServerOptions>().unwrap();
    assert_eq!(*options, ServerOptions::default());
}

#[tokio::test]
async fn test_callback_order() {
    let container = Container::builder()
        .post_configure_default(|_, o: &mut ServerOptions| o.steps.push("post"))
        .configure_default(|_, o: &mut ServerOptions| o.steps.push("first"))
        .configure_all(|_, o: &mut ServerOptions| o.steps.push("all"))
        .configure_default(|_, o: &mut ServerOptions| o.steps.push("second"))
        .build()
        .await
        .unwrap();
    let options = container.options::<ServerOptions>().unwrap();
    assert_eq!(options.steps, vec!["first", "all", "second", "post"]);
}

#[tokio::test]
async fn test_named_instances() {
    let container = Container::builder()
        .configure("public", |_, o: &mut ServerOptions| o.port = 80)
        .configure("admin", |_, o: &mut ServerOptions| o.port = 8080)
        .configure_all(|_, o: &mut ServerOptions| o.host = "localhost".to_string())
        .post_configure("admin", |_, o: &mut ServerOptions| o.host.push_str(":admin"))
        .build()
        .await
        .unwrap();
    let public = container.create_options::<ServerOptions>("public").unwrap();
    assert_eq!(public.port, 80);
    assert_eq!(public.host, "localhost");
    let admin = container.create_options::<ServerOptions>("admin").unwrap();
    assert_eq!(admin.port, 8080);
    assert_eq!(admin.host, "localhost:admin");
    let default = container.create_options::<ServerOptions>(DEFAULT_NAME).unwrap();
    assert_eq!(default.port, 0);
    assert_eq!(default.host, "localhost");
}

#[tokio::test]
async fn test_callbacks_see_container() {
    let container = Container::builder()
        .add_component(9000u16)
        .configure_default(|container, o: &mut ServerOptions| {
            o.port = container.get_component::<u16>().unwrap_or_default();
        })
        .build()
        .await
        .unwrap();
    assert_eq!(container.options::<ServerOptions>().unwrap().port, 9000);
}

#[tokio::test]
async fn test_options_computed_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let container = Container::builder()
        .configure_default(move |_, o: &mut ServerOptions| {
            o.port = counter.fetch_add(1, Ordering::SeqCst) as u16;
        })
        .build()
        .await
        .unwrap();
    let first = container.options::<ServerOptions>().unwrap();
    let second = container.clone().options::<ServerOptions>().unwrap();
    assert!(Arc::ptr_eq(&first.clone().into_inner(), &second.into_inner()));
    assert_eq!(first.value().port, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_snapshot_scope() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let container = Container::builder()
        .configure_all(move |_, o: &mut ServerOptions| {
            o.port = counter.fetch_add(1, Ordering::SeqCst) as u16;
        })
        .build()
        .await
        .unwrap();
    let snapshot = container.options_snapshot::<ServerOptions>();
    let first = snapshot.value().unwrap();
    assert!(Arc::ptr_eq(&first, &snapshot.value().unwrap()));
    assert_eq!(snapshot.get("other").unwrap().port, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let next = container.options_snapshot::<ServerOptions>();
    assert_eq!(next.value().unwrap().port, 2);
}

struct FailingConfigure;

impl ConfigureOptions<ServerOptions> for FailingConfigure {
    fn configure(
        &self,
        _container: &Container,
        name: &str,
        _options: &mut ServerOptions,
    ) -> Result<(), StdError> {
        Err(format!("cannot configure {name:?}").into())
    }
}

#[tokio::test]
async fn test_configure_failure() {
    let container = Container::builder()
        .populate(|services| {
            services.add_configure::<ServerOptions, _>(FailingConfigure);
        })
        .build()
        .await
        .unwrap();
    let err = container.options::<ServerOptions>().err().unwrap();
    assert!(matches!(
        err,
        OptionsError::Configure { ref name, .. } if name.is_empty()
    ));
}

#[test]
fn test_keyed_registrations_deduplicated() {
    let mut services = ServiceCollection::new();
    assert!(services.try_add_configure::<ServerOptions, _>("key", FailingConfigure));
    assert!(!services.try_add_configure::<ServerOptions, _>("key", FailingConfigure));
    assert!(services.try_add_post_configure::<ServerOptions, _>("key", FailingConfigure));
    assert_eq!(services.configure_count::<ServerOptions>(), 1);
    assert_eq!(services.post_configure_count::<ServerOptions>(), 1);

    let mut other = ServiceCollection::new();
    other.try_add_configure::<ServerOptions, _>("key", FailingConfigure);
    other.try_add_configure::<ServerOptions, _>("another", FailingConfigure);
    other.add_configure::<ServerOptions, _>(FailingConfigure);
    services.extend(other);
    assert_eq!(services.configure_count::<ServerOptions>(), 3);
    assert_eq!(services.len(), 1);
}

struct TriggerSource {
    name: String,
    trigger: Arc<Mutex<ChangeTrigger>>,
}

impl ChangeTokenSource for TriggerSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn change_token(&self) -> ChangeToken {
        self.trigger.lock().unwrap().token()
    }
}

fn fire(trigger: &Mutex<ChangeTrigger>) {
    let fired = std::mem::take(&mut *trigger.lock().unwrap());
    fired.fire();
}

#[tokio::test]
async fn test_monitor_reload() {
    let trigger = Arc::new(Mutex::new(ChangeTrigger::new()));
    let port = Arc::new(AtomicUsize::new(1));
    let source_trigger = trigger.clone();
    let current_port = port.clone();
    let container = Container::builder()
        .configure_default(move |_, o: &mut ServerOptions| {
            o.port = current_port.load(Ordering::SeqCst) as u16;
        })
        .populate(move |services| {
            services.add_change_token_source::<ServerOptions, _>(move |_| {
                let source: Arc<dyn ChangeTokenSource> = Arc::new(TriggerSource {
                    name: DEFAULT_NAME.to_string(),
                    trigger: source_trigger.clone(),
                });
                Ok(source)
            });
        })
        .build()
        .await
        .unwrap();
    assert_eq!(container.services().change_token_source_count::<ServerOptions>(), 1);

    let pinned = container.options::<ServerOptions>().unwrap();
    let monitor = container.options_monitor::<ServerOptions>().unwrap();
    assert_eq!(monitor.current_value().unwrap().port, 1);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let listener_seen = seen.clone();
    monitor.on_change(move |o: &ServerOptions, name| {
        listener_seen.lock().unwrap().push((o.port, name.to_string()));
    });

    port.store(2, Ordering::SeqCst);
    assert_eq!(monitor.current_value().unwrap().port, 1);
    fire(&trigger);
    assert_eq!(monitor.current_value().unwrap().port, 2);

    port.store(3, Ordering::SeqCst);
    fire(&trigger);
    let again = container.options_monitor::<ServerOptions>().unwrap();
    assert_eq!(again.current_value().unwrap().port, 3);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(2, String::new()), (3, String::new())]
    );

    // The singleton holder keeps its first value.
    assert_eq!(pinned.port, 1);
    assert_eq!(container.options::<ServerOptions>().unwrap().port, 1);
}

#[tokio::test]
async fn test_monitor_skips_value_computed_across_change() {
    let trigger = Arc::new(Mutex::new(ChangeTrigger::new()));
    let port = Arc::new(AtomicUsize::new(1));
    let source_trigger = trigger.clone();
    let callback_trigger = trigger.clone();
    let current_port = port.clone();
    let container = Container::builder()
        .configure_default(move |_, o: &mut ServerOptions| {
            o.port = current_port.load(Ordering::SeqCst) as u16;
            // The first computation races with a change.
            if current_port.compare_exchange(1, 2, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
                fire(&callback_trigger);
            }
        })
        .populate(move |services| {
            services.add_change_token_source::<ServerOptions, _>(move |_| {
                let source: Arc<dyn ChangeTokenSource> = Arc::new(TriggerSource {
                    name: DEFAULT_NAME.to_string(),
                    trigger: source_trigger.clone(),
                });
                Ok(source)
            });
        })
        .build()
        .await
        .unwrap();
    let monitor = container.options_monitor::<ServerOptions>().unwrap();
    assert_eq!(monitor.current_value().unwrap().port, 1);
    assert_eq!(monitor.current_value().unwrap().port, 2);
    assert!(Arc::ptr_eq(
        &monitor.current_value().unwrap(),
        &monitor.current_value().unwrap()
    ));
    assert_eq!(port.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_monitor_source_failure() {
    let container = Container::builder()
        .populate(|services| {
            services.add_change_token_source::<ServerOptions, _>(|_| Err("no source".into()));
        })
        .build()
        .await
        .unwrap();
    assert!(matches!(
        container.options_monitor::<ServerOptions>(),
        Err(OptionsError::ChangeTokenSource { .. })
    ));
}
