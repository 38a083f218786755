use knob::{
    ConfigureOptionsExt as _, Container, ContainerBuilder, ContainerError, Dependencies, Module,
    OptionsModule, StdError,
};

#[derive(Default)]
struct ModuleA;

impl Module for ModuleA {
    async fn build(&self, builder: &mut ContainerBuilder) -> Result<(), StdError> {
        builder.add_component(7u32);
        Ok(())
    }
}

struct ModuleB;

impl Module for ModuleB {
    async fn build(&self, builder: &mut ContainerBuilder) -> Result<(), StdError> {
        let value = builder
            .get_component::<u32>()
            .ok_or("ModuleA has not been built")?;
        builder.add_component(format!("value-{value}"));
        Ok(())
    }

    fn dependencies(&self) -> Dependencies {
        Dependencies::new().module::<ModuleA>()
    }
}

struct ModuleC;

impl Module for ModuleC {
    async fn build(&self, builder: &mut ContainerBuilder) -> Result<(), StdError> {
        builder.register_module::<ModuleA>();
        Ok(())
    }
}

#[tokio::test]
async fn test_modules() {
    let container = Container::builder()
        .add_module(ModuleB)
        .add_module(ModuleC)
        .build()
        .await
        .unwrap();
    assert_eq!(container.get_component::<u32>(), Some(7));
    assert_eq!(
        container.get_component_ref::<String>().map(String::as_str),
        Some("value-7")
    );
}

#[tokio::test]
#[should_panic]
async fn test_modules_duplicates() {
    Container::builder()
        .add_module(ModuleA)
        .add_module(ModuleB)
        .add_module(ModuleA)
        .build()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_register_module_idempotent() {
    let mut builder = Container::builder();
    builder
        .register_module::<ModuleA>()
        .register_module::<ModuleA>();
    assert!(builder.has_module::<ModuleA>());
    let container = builder.build().await.unwrap();
    assert_eq!(container.get_component::<u32>(), Some(7));
}

struct CycleModuleA;

impl Module for CycleModuleA {
    async fn build(&self, _builder: &mut ContainerBuilder) -> Result<(), StdError> {
        Ok(())
    }

    fn dependencies(&self) -> Dependencies {
        Dependencies::new().module::<CycleModuleC>()
    }
}

struct CycleModuleB;

impl Module for CycleModuleB {
    async fn build(&self, _builder: &mut ContainerBuilder) -> Result<(), StdError> {
        Ok(())
    }

    fn dependencies(&self) -> Dependencies {
        Dependencies::new().module::<CycleModuleA>()
    }
}

struct CycleModuleC;

impl Module for CycleModuleC {
    async fn build(&self, _builder: &mut ContainerBuilder) -> Result<(), StdError> {
        Ok(())
    }

    fn dependencies(&self) -> Dependencies {
        Dependencies::new().module::<CycleModuleB>()
    }
}

#[tokio::test]
async fn test_modules_circular() {
    assert!(matches!(
        Container::builder()
            .add_module(CycleModuleA)
            .add_module(CycleModuleB)
            .add_module(CycleModuleC)
            .build()
            .await,
        Err(ContainerError::CircularDependency),
    ));
}

#[tokio::test]
async fn test_modules_missing() {
    assert!(matches!(
        Container::builder().add_module(CycleModuleA).build().await,
        Err(ContainerError::MissingDependency)
    ));
}

struct BuildLog(Vec<&'static str>);

fn log_build(builder: &mut ContainerBuilder, name: &'static str) {
    if !builder.has_component::<BuildLog>() {
        builder.add_component(BuildLog(Vec::new()));
    }
    if let Some(log) = builder.get_component_mut::<BuildLog>() {
        log.0.push(name);
    }
}

struct BaseModule;

impl Module for BaseModule {
    async fn build(&self, builder: &mut ContainerBuilder) -> Result<(), StdError> {
        log_build(builder, "base");
        Ok(())
    }
}

struct LeftModule;

impl Module for LeftModule {
    async fn build(&self, builder: &mut ContainerBuilder) -> Result<(), StdError> {
        log_build(builder, "left");
        Ok(())
    }

    fn dependencies(&self) -> Dependencies {
        Dependencies::new().module::<BaseModule>()
    }
}

struct RightModule;

impl Module for RightModule {
    async fn build(&self, builder: &mut ContainerBuilder) -> Result<(), StdError> {
        log_build(builder, "right");
        Ok(())
    }

    fn dependencies(&self) -> Dependencies {
        Dependencies::new().module::<BaseModule>()
    }
}

struct TopModule;

impl Module for TopModule {
    async fn build(&self, builder: &mut ContainerBuilder) -> Result<(), StdError> {
        log_build(builder, "top");
        Ok(())
    }

    fn dependencies(&self) -> Dependencies {
        Dependencies::new()
            .module::<LeftModule>()
            .merge(Dependencies::new().module::<RightModule>())
    }
}

#[tokio::test]
async fn test_modules_shared_dependency_built_once() {
    let container = Container::builder()
        .add_module(TopModule)
        .add_module(RightModule)
        .add_module(LeftModule)
        .add_module(BaseModule)
        .build()
        .await
        .unwrap();
    let log = &container.get_component_ref::<BuildLog>().unwrap().0;
    assert_eq!(log.len(), 4);
    assert_eq!(log.first(), Some(&"base"));
    assert_eq!(log.last(), Some(&"top"));
    assert!(log.contains(&"left"));
    assert!(log.contains(&"right"));
}

struct BadModule;

impl Module for BadModule {
    async fn build(&self, _builder: &mut ContainerBuilder) -> Result<(), StdError> {
        Err("Bad module".into())
    }
}

#[tokio::test]
async fn test_modules_bad() {
    assert!(matches!(
        Container::builder().add_module(BadModule).build().await,
        Err(ContainerError::ModuleError(_))
    ));
}

#[tokio::test]
#[should_panic]
async fn test_components_duplicates() {
    Container::builder()
        .add_component(1u8)
        .add_component(2u8);
}

#[tokio::test]
async fn test_component_mut() {
    let mut builder = Container::builder();
    builder.add_component(vec![1, 2]);
    builder.get_component_mut::<Vec<i32>>().unwrap().push(3);
    let container = builder.build().await.unwrap();
    assert!(container.has_component::<Vec<i32>>());
    assert!(!container.has_component::<u64>());
    assert_eq!(container.get_component::<Vec<i32>>(), Some(vec![1, 2, 3]));
}

#[derive(Default)]
struct Limits {
    max: u32,
}

#[tokio::test]
async fn test_populate() {
    let mut builder = Container::builder();
    builder.populate(|services| {
        services.configure_default(|_, limits: &mut Limits| limits.max = 10);
    });
    assert_eq!(builder.services().configure_count::<Limits>(), 1);
    let container = builder.build().await.unwrap();
    assert_eq!(container.options::<Limits>().unwrap().max, 10);
}

#[tokio::test]
async fn test_try_populate_discards_on_error() {
    let mut builder = Container::builder();
    let result = builder.try_populate(|services| {
        services.configure_default(|_, limits: &mut Limits| limits.max = 10);
        Err("rejected")
    });
    assert!(matches!(result, Err("rejected")));
    assert!(builder.services().is_empty());
}

#[tokio::test]
async fn test_configure_registers_options_module() {
    let mut builder = Container::builder();
    builder
        .configure_default(|_, limits: &mut Limits| limits.max += 1)
        .configure_default(|_, limits: &mut Limits| limits.max += 1);
    assert!(builder.has_module::<OptionsModule>());
    let container = builder.build().await.unwrap();
    assert_eq!(container.services().configure_count::<Limits>(), 2);
    assert_eq!(container.options::<Limits>().unwrap().max, 2);
}
