use super::*;

fn feature_with(action: ActionDescriptor) -> FeatureDescriptor {
    FeatureDescriptor::new("service").with_action(action)
}

fn reason(err: CoreError) -> String {
    match err {
        CoreError::InvalidDescriptor { reason, .. } => reason,
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn builder_defaults() {
    let action = ActionDescriptor::builder("ping", Mode::Sync).build();
    assert_eq!(action.action_type(), ActionType::Function);
    assert_eq!(action.access(), Access::None);
    assert_eq!(action.normalize(), Normalize::Json);
    assert_eq!(action.multiplicity(), Multiplicity::Single);
    assert_eq!(action.resident(), ResidentType::None);
    assert_eq!(action.prompt_strategy(), PromptStrategy::FirstTime);
    assert!(action.permissions().is_empty());
    assert!(action.validate().is_ok());
}

#[test]
fn with_action_binds_feature_name() {
    let feature = feature_with(ActionDescriptor::builder("ping", Mode::Sync).build());
    assert_eq!(feature.actions()[0].feature(), "service");
}

#[test]
fn event_must_be_callback() {
    let feature = feature_with(
        ActionDescriptor::builder("onTick", Mode::Sync)
            .action_type(ActionType::Event)
            .build(),
    );
    let err = feature.validate().unwrap_err();
    assert!(reason(err).contains("CALLBACK"));

    let ok = feature_with(
        ActionDescriptor::builder("onTick", Mode::Callback)
            .action_type(ActionType::Event)
            .build(),
    );
    assert!(ok.validate().is_ok());
}

#[test]
fn function_cannot_have_access() {
    let feature = feature_with(
        ActionDescriptor::builder("ping", Mode::Sync)
            .access(Access::Read)
            .build(),
    );
    assert!(feature.validate().is_err());
}

#[test]
fn attribute_rules() {
    let valid = ActionDescriptor::builder("__getBrightness", Mode::Sync)
        .action_type(ActionType::Attribute)
        .access(Access::Read)
        .alias("brightness")
        .sub_attribute("level")
        .build();
    assert!(feature_with(valid).validate().is_ok());

    let async_attr = ActionDescriptor::builder("__getX", Mode::Async)
        .action_type(ActionType::Attribute)
        .access(Access::Read)
        .alias("x")
        .build();
    assert!(feature_with(async_attr).validate().is_err());

    let no_alias = ActionDescriptor::builder("__getX", Mode::Sync)
        .action_type(ActionType::Attribute)
        .access(Access::Read)
        .build();
    assert!(reason(feature_with(no_alias).validate().unwrap_err()).contains("alias"));

    let no_access = ActionDescriptor::builder("__getX", Mode::Sync)
        .action_type(ActionType::Attribute)
        .alias("x")
        .build();
    assert!(feature_with(no_access).validate().is_err());

    let with_permission = ActionDescriptor::builder("__getX", Mode::Sync)
        .action_type(ActionType::Attribute)
        .access(Access::Read)
        .alias("x")
        .permission("location")
        .build();
    assert!(feature_with(with_permission).validate().is_err());
}

#[test]
fn sub_attributes_only_on_attributes() {
    let feature = feature_with(
        ActionDescriptor::builder("ping", Mode::Sync)
            .sub_attribute("level")
            .build(),
    );
    assert!(reason(feature.validate().unwrap_err()).contains("sub-attributes"));
}

#[test]
fn constructor_must_be_sync_function() {
    let bad = feature_with(ActionDescriptor::builder(ACTION_INIT, Mode::Async).build());
    assert!(bad.validate().is_err());

    let good = feature_with(ActionDescriptor::builder(ACTION_INIT, Mode::Sync).build());
    assert!(good.validate().is_ok());
    assert!(good.is_instantiable());
}

#[test]
fn duplicate_names_and_aliases_are_rejected() {
    let feature = FeatureDescriptor::new("service")
        .with_action(ActionDescriptor::builder("ping", Mode::Sync).build())
        .with_action(ActionDescriptor::builder("ping", Mode::Async).build());
    assert!(feature.validate().is_err());

    let alias_clash = FeatureDescriptor::new("service")
        .with_action(ActionDescriptor::builder("ping", Mode::Sync).build())
        .with_action(
            ActionDescriptor::builder("pong", Mode::Sync)
                .alias("ping")
                .build(),
        );
    assert!(alias_clash.validate().is_err());
}

#[test]
fn lookup_by_alias() {
    let feature = FeatureDescriptor::new("service").with_action(
        ActionDescriptor::builder("echo", Mode::Sync)
            .alias("ping")
            .build(),
    );
    assert_eq!(feature.action("ping").unwrap().name(), "echo");
    assert_eq!(feature.action("echo").unwrap().name(), "echo");
    assert!(feature.action("nope").is_none());
}

#[test]
fn same_as_ignores_declaration_order() {
    let a = FeatureDescriptor::new("service")
        .with_action(ActionDescriptor::builder("ping", Mode::Sync).build())
        .with_action(ActionDescriptor::builder("longTask", Mode::Async).build());
    let b = FeatureDescriptor::new("service")
        .with_action(ActionDescriptor::builder("longTask", Mode::Async).build())
        .with_action(ActionDescriptor::builder("ping", Mode::Sync).build());
    assert!(a.same_as(&b));

    let c = FeatureDescriptor::new("service")
        .with_action(ActionDescriptor::builder("ping", Mode::Async).build())
        .with_action(ActionDescriptor::builder("longTask", Mode::Async).build());
    assert!(!a.same_as(&c));
}

#[test]
fn ordinals_follow_declaration_order() {
    assert_eq!(Mode::Sync.ordinal(), 0);
    assert_eq!(Mode::SyncCallback.ordinal(), 3);
    assert_eq!(ActionType::Event.ordinal(), 2);
    assert_eq!(Access::Write.ordinal(), 2);
    assert_eq!(Normalize::Raw.ordinal(), 0);
    assert_eq!(Multiplicity::Multi.ordinal(), 1);
}

#[test]
fn deserialized_feature_binds_on_request() {
    let feature: FeatureDescriptor = serde_json::from_value(serde_json::json!({
        "name": "system.location",
        "actions": [
            { "name": "readLocation", "mode": "async", "permissions": ["location"] },
            { "name": "onChange", "mode": "callback", "type": "event" }
        ]
    }))
    .unwrap();
    assert_eq!(feature.actions()[0].feature(), "");

    let feature = feature.bound();
    assert_eq!(feature.actions()[0].feature(), "system.location");
    assert_eq!(feature.actions()[0].permissions(), ["location".to_string()]);
    assert_eq!(feature.actions()[1].action_type(), ActionType::Event);
    assert!(feature.validate().is_ok());
}
