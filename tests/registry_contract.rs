//! Purpose: Contract tests for building class mappings through `Registry`.
//! Exports: None (integration test module).
//! Role: Validate memoization, inheritance, link sugar, and construction-time failures.
//! Invariants: Construction errors must appear before the resolver sees any request.

use linkmap::api::{
    Class, ErrorKind, ExtraProperties, FieldShape, MapResolver, Mapping, Registry, ResourceFetch,
};
use serde_json::json;
use std::sync::Arc;

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

#[test]
fn subclass_inherits_and_overrides_parent_fields() -> TestResult<()> {
    let registry = Registry::new();
    let animal = Class::new("Animal");
    let cat = Class::extends("Cat", &animal);
    registry.add_field(&animal, "name", FieldShape::Scalar, Mapping::string())?;
    registry.add_field(&animal, "legs", FieldShape::Scalar, Mapping::number())?;
    registry.set_extra_properties(&animal, ExtraProperties::Discard)?;
    registry.add_property(&cat, "legs", "paws", FieldShape::Scalar, Mapping::number())?;
    registry.add_field(&cat, "meow", FieldShape::Scalar, Mapping::string())?;

    let mapping = registry.build(&cat)?;
    let names: Vec<&str> = mapping.properties().keys().map(String::as_str).collect();
    assert_eq!(names, ["name", "legs", "meow"]);
    let legs = mapping.properties().get("legs").ok_or("legs")?;
    assert_eq!(legs.source(), "paws");
    assert_eq!(mapping.class(), &cat);
    assert_eq!(mapping.extra_properties(), Some(ExtraProperties::Discard));
    assert!(registry.is_built(&animal));
    Ok(())
}

#[test]
fn undeclared_subclass_reuses_parent_fields() -> TestResult<()> {
    let registry = Registry::new();
    let animal = Class::new("Animal");
    let dog = Class::extends("Dog", &animal);
    registry.add_field(&animal, "name", FieldShape::Scalar, Mapping::string())?;

    let mapping = registry.build(&dog)?;
    assert_eq!(mapping.class(), &dog);
    assert!(mapping.properties().contains_key("name"));
    Ok(())
}

#[test]
fn strategy_change_after_build_is_rejected() -> TestResult<()> {
    let registry = Registry::new();
    let person = Class::new("Person");
    registry.add_field(&person, "name", FieldShape::Scalar, Mapping::string())?;
    registry.build(&person)?;

    let err = registry
        .set_extra_properties(&person, ExtraProperties::Fail)
        .expect_err("already built");
    assert_eq!(err.kind(), ErrorKind::Construction);
    Ok(())
}

#[test]
fn classes_can_reference_each_other_before_declaration() -> TestResult<()> {
    let registry = Registry::new();
    let team = Class::new("Team");
    let person = Class::new("Person");
    // Team refers to Person before Person has any field.
    registry.add_field(
        &team,
        "members",
        FieldShape::Array,
        registry.array_of_links(&person),
    )?;
    registry.add_field(&person, "name", FieldShape::Scalar, Mapping::string())?;
    registry.add_field(&person, "team", FieldShape::Object, registry.link(&team))?;

    registry.build(&team)?;
    assert!(registry.is_built(&person));
    let person_mapping = registry.get_mapping(&person);
    assert_eq!(person_mapping.properties().len(), 2);
    Ok(())
}

#[test]
fn option_field_rejects_plain_mapping() -> TestResult<()> {
    let registry = Registry::new();
    let person = Class::new("Person");
    registry.add_field(&person, "nickname", FieldShape::Option, Mapping::string())?;

    let err = registry.build(&person).expect_err("option shape");
    assert_eq!(err.kind(), ErrorKind::Construction);
    let message = err.to_string();
    assert!(message.contains("property 'nickname' of Person"));
    assert!(message.contains("declared option but mapped as string"));
    Ok(())
}

#[test]
fn link_sugar_accepts_objects_choices_and_options() -> TestResult<()> {
    let registry = Registry::new();
    let person = Class::new("Person");
    let cat = Class::new("Cat");
    registry.add_field(&person, "name", FieldShape::Scalar, Mapping::string())?;
    registry.add_link(&person, "best", "best", registry.mapping(&person))?;
    registry.add_link(&person, "friend", "friend", registry.option_of(&person))?;
    let pet = linkmap::api::ChoiceMapping::new("Pet").when_key("meow", registry.mapping(&cat));
    registry.add_link(&person, "pet", "pet", pet)?;

    let mapping = registry.build(&person)?;
    let shape = |name: &str| -> TestResult<String> {
        let property = mapping.properties().get(name).ok_or(name.to_string())?;
        Ok(property.mapping().resolve()?.describe())
    };
    assert_eq!(shape("best")?, "link");
    assert_eq!(shape("friend")?, "option");
    assert_eq!(shape("pet")?, "link");
    Ok(())
}

#[tokio::test]
async fn invalid_link_fails_before_fetching() -> TestResult<()> {
    let registry = Registry::new();
    let person = Class::new("Person");
    registry.add_field(&person, "name", FieldShape::Scalar, Mapping::string())?;
    registry.add_link(&person, "tags", "tags", Mapping::array(Mapping::string()))?;
    let fixtures = MapResolver::new().with_document("/person/1", json!({"name": "pippo"}));
    let fetch = ResourceFetch::cached(Arc::new(fixtures.clone()));

    let err = fetch
        .fetch_resource(registry.mapping(&person))
        .from("/person/1")
        .await
        .expect_err("invalid link");
    assert_eq!(err.kind(), ErrorKind::Construction);
    assert!(err.to_string().contains("invalid link mapping array"));
    assert_eq!(fixtures.total_requests(), 0);
    Ok(())
}

#[test]
fn dropped_registry_reports_construction_error() {
    let person = Class::new("Person");
    let handle = {
        let registry = Registry::new();
        registry.mapping(&person)
    };
    let err = handle.resolve().expect_err("registry gone");
    assert_eq!(err.kind(), ErrorKind::Construction);
}
