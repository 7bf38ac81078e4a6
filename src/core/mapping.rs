//! Purpose: Define the declarative Mapping Description used to interpret JSON shapes.
//! Exports: `Mapping`, `MappingRef`, `RawValue`, `RawKind`, `Primitive`, `LinkMapping`,
//! `LinkTarget`, `ObjectMapping`, `ObjectMappingBuilder`, `PropertyMapping`,
//! `ChoiceMapping`, `Alternative`, `NotFoundPolicy`, `ExtraProperties`, `Predicate`.
//! Role: Immutable, cheaply cloned description tree; nested positions are lazy handles.
//! Invariants: Cardinality/optionality come only from `Array`/`Option` composition.
//! Invariants: A link target resolves to `Object` or `Choice`; anything else is a
//! construction error surfaced by `validate` or on first use.
//! Invariants: A `MappingRef` runs its thunk at most once per successful resolution.
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use super::class::Class;
use super::error::{Error, ErrorKind};
use super::mapped::Mapped;

type Thunk = Box<dyn Fn() -> Result<Mapping, Error> + Send + Sync>;
type Extract = Arc<dyn Fn(Primitive) -> Result<Mapped, Error> + Send + Sync>;
pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Deferred handle to a mapping, so descriptions can refer to each other before both exist.
#[derive(Clone)]
pub struct MappingRef {
    cell: Arc<Deferred>,
}

struct Deferred {
    thunk: Option<Thunk>,
    value: OnceLock<Mapping>,
}

impl MappingRef {
    pub fn lazy<F>(thunk: F) -> Self
    where
        F: Fn() -> Result<Mapping, Error> + Send + Sync + 'static,
    {
        Self {
            cell: Arc::new(Deferred {
                thunk: Some(Box::new(thunk)),
                value: OnceLock::new(),
            }),
        }
    }

    pub fn ready(mapping: Mapping) -> Self {
        let value = OnceLock::new();
        let _ = value.set(mapping);
        Self {
            cell: Arc::new(Deferred { thunk: None, value }),
        }
    }

    pub fn resolve(&self) -> Result<&Mapping, Error> {
        if let Some(mapping) = self.cell.value.get() {
            return Ok(mapping);
        }
        let thunk = self.cell.thunk.as_ref().ok_or_else(|| {
            Error::new(ErrorKind::Internal).with_message("mapping handle has no definition")
        })?;
        let mapping = thunk()?;
        Ok(self.cell.value.get_or_init(|| mapping))
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.cell) as usize
    }
}

impl From<Mapping> for MappingRef {
    fn from(mapping: Mapping) -> Self {
        MappingRef::ready(mapping)
    }
}

impl From<ObjectMapping> for MappingRef {
    fn from(mapping: ObjectMapping) -> Self {
        MappingRef::ready(Mapping::Object(mapping))
    }
}

impl From<ChoiceMapping> for MappingRef {
    fn from(mapping: ChoiceMapping) -> Self {
        MappingRef::ready(Mapping::Choice(mapping))
    }
}

impl fmt::Debug for MappingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.value.get() {
            Some(mapping) => write!(f, "MappingRef({})", mapping.describe()),
            None => f.write_str("MappingRef(<deferred>)"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RawKind {
    Boolean,
    Number,
    String,
    /// Synthetic leaf: the enclosing resource URL, no JSON consumed.
    Url,
}

impl RawKind {
    pub fn describe(self) -> &'static str {
        match self {
            RawKind::Boolean => "boolean",
            RawKind::Number => "number",
            RawKind::String => "string",
            RawKind::Url => "url",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Primitive {
    Bool(bool),
    Number(Number),
    String(String),
    Url(Option<String>),
}

#[derive(Clone)]
pub struct RawValue {
    kind: RawKind,
    extract: Extract,
}

impl RawValue {
    pub fn new<F>(kind: RawKind, extract: F) -> Self
    where
        F: Fn(Primitive) -> Result<Mapped, Error> + Send + Sync + 'static,
    {
        Self {
            kind,
            extract: Arc::new(extract),
        }
    }

    pub fn boolean() -> Self {
        Self::new(RawKind::Boolean, |primitive| Ok(identity(primitive)))
    }

    pub fn number() -> Self {
        Self::new(RawKind::Number, |primitive| Ok(identity(primitive)))
    }

    pub fn string() -> Self {
        Self::new(RawKind::String, |primitive| Ok(identity(primitive)))
    }

    /// The enclosing resource URL as a string; fails when there is none.
    pub fn get_url() -> Self {
        Self::new(RawKind::Url, |primitive| match primitive {
            Primitive::Url(Some(url)) => Ok(Mapped::String(url)),
            _ => Err(Error::new(ErrorKind::MissingRequiredLink).with_message("missing parent url")),
        })
    }

    pub fn kind(&self) -> RawKind {
        self.kind
    }

    /// Composes a further conversion after this leaf's own extraction.
    pub fn map<F>(self, f: F) -> Self
    where
        F: Fn(Mapped) -> Result<Mapped, Error> + Send + Sync + 'static,
    {
        let extract = self.extract;
        Self::new(self.kind, move |primitive| f(extract(primitive)?))
    }

    pub fn extract(&self, primitive: Primitive) -> Result<Mapped, Error> {
        (self.extract)(primitive)
    }
}

fn identity(primitive: Primitive) -> Mapped {
    match primitive {
        Primitive::Bool(value) => Mapped::Bool(value),
        Primitive::Number(value) => Mapped::Number(value),
        Primitive::String(value) => Mapped::String(value),
        Primitive::Url(url) => Mapped::from(url.map(Mapped::String)),
    }
}

impl fmt::Debug for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawValue({})", self.kind.describe())
    }
}

#[derive(Clone)]
pub enum NotFoundPolicy {
    Raise,
    /// Produce `Mapped::Null`; an enclosing `Option` turns it into empty.
    Absent,
    Default(Mapped),
    Handler(Arc<dyn Fn(&str) -> Result<Mapped, Error> + Send + Sync>),
}

impl NotFoundPolicy {
    pub fn handler<F>(f: F) -> Self
    where
        F: Fn(&str) -> Result<Mapped, Error> + Send + Sync + 'static,
    {
        NotFoundPolicy::Handler(Arc::new(f))
    }

    pub fn apply(&self, url: &str) -> Result<Mapped, Error> {
        match self {
            NotFoundPolicy::Raise => Err(Error::new(ErrorKind::NotFound)
                .with_message(format!("not found :{url}"))
                .with_url(url)),
            NotFoundPolicy::Absent => Ok(Mapped::Null),
            NotFoundPolicy::Default(value) => Ok(value.clone()),
            NotFoundPolicy::Handler(handler) => handler(url),
        }
    }
}

impl fmt::Debug for NotFoundPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundPolicy::Raise => f.write_str("Raise"),
            NotFoundPolicy::Absent => f.write_str("Absent"),
            NotFoundPolicy::Default(value) => f.debug_tuple("Default").field(value).finish(),
            NotFoundPolicy::Handler(_) => f.write_str("Handler"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtraProperties {
    #[default]
    Copy,
    Discard,
    Fail,
}

#[derive(Clone, Debug)]
pub struct LinkMapping {
    target: MappingRef,
    not_found: NotFoundPolicy,
}

/// A resolved link target; links never point at raw leaves or other links.
#[derive(Clone, Copy, Debug)]
pub enum LinkTarget<'a> {
    Object(&'a ObjectMapping),
    Choice(&'a ChoiceMapping),
}

impl<'a> LinkTarget<'a> {
    pub fn mapping(self) -> Mapping {
        match self {
            LinkTarget::Object(object) => Mapping::Object(object.clone()),
            LinkTarget::Choice(choice) => Mapping::Choice(choice.clone()),
        }
    }
}

impl LinkMapping {
    pub fn new(target: impl Into<MappingRef>, not_found: NotFoundPolicy) -> Self {
        Self {
            target: target.into(),
            not_found,
        }
    }

    pub fn not_found(&self) -> &NotFoundPolicy {
        &self.not_found
    }

    pub fn with_not_found(&self, not_found: NotFoundPolicy) -> Self {
        Self {
            target: self.target.clone(),
            not_found,
        }
    }

    pub fn target(&self) -> Result<LinkTarget<'_>, Error> {
        match self.target.resolve()? {
            Mapping::Object(object) => Ok(LinkTarget::Object(object)),
            Mapping::Choice(choice) => Ok(LinkTarget::Choice(choice)),
            other => Err(Error::new(ErrorKind::Construction).with_message(format!(
                "link target must be an object or a choice, got {}",
                other.describe()
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PropertyMapping {
    source: String,
    mapping: MappingRef,
}

impl PropertyMapping {
    pub fn new(source: impl Into<String>, mapping: impl Into<MappingRef>) -> Self {
        Self {
            source: source.into(),
            mapping: mapping.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn mapping(&self) -> &MappingRef {
        &self.mapping
    }
}

#[derive(Clone)]
pub struct ObjectMapping {
    inner: Arc<ObjectInner>,
}

struct ObjectInner {
    class: Class,
    properties: IndexMap<String, PropertyMapping>,
    extra_properties: Option<ExtraProperties>,
}

impl ObjectMapping {
    pub fn builder(class: &Class) -> ObjectMappingBuilder {
        ObjectMappingBuilder {
            class: class.clone(),
            properties: IndexMap::new(),
            extra_properties: None,
        }
    }

    /// Copies every JSON property verbatim onto a new instance of `class`.
    pub fn pass_through(class: &Class) -> Self {
        Self::builder(class)
            .extra_properties(ExtraProperties::Copy)
            .build()
    }

    pub fn class(&self) -> &Class {
        &self.inner.class
    }

    /// Target field name -> (source key, mapping), in declaration order.
    pub fn properties(&self) -> &IndexMap<String, PropertyMapping> {
        &self.inner.properties
    }

    /// Per-mapping strategy; `None` defers to the run's default.
    pub fn extra_properties(&self) -> Option<ExtraProperties> {
        self.inner.extra_properties
    }
}

impl fmt::Debug for ObjectMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectMapping")
            .field("class", &self.inner.class)
            .field("properties", &self.inner.properties.keys().collect::<Vec<_>>())
            .field("extra_properties", &self.inner.extra_properties)
            .finish()
    }
}

#[derive(Debug)]
pub struct ObjectMappingBuilder {
    class: Class,
    properties: IndexMap<String, PropertyMapping>,
    extra_properties: Option<ExtraProperties>,
}

impl ObjectMappingBuilder {
    /// Maps a field read from the JSON key of the same name.
    pub fn field(self, target: impl Into<String>, mapping: impl Into<MappingRef>) -> Self {
        let target = target.into();
        let source = target.clone();
        self.field_from(target, source, mapping)
    }

    pub fn field_from(
        mut self,
        target: impl Into<String>,
        source: impl Into<String>,
        mapping: impl Into<MappingRef>,
    ) -> Self {
        self.properties
            .insert(target.into(), PropertyMapping::new(source, mapping));
        self
    }

    pub fn property(mut self, target: impl Into<String>, property: PropertyMapping) -> Self {
        self.properties.insert(target.into(), property);
        self
    }

    pub fn extra_properties(mut self, strategy: ExtraProperties) -> Self {
        self.extra_properties = Some(strategy);
        self
    }

    pub fn maybe_extra_properties(mut self, strategy: Option<ExtraProperties>) -> Self {
        self.extra_properties = strategy;
        self
    }

    pub fn build(self) -> ObjectMapping {
        ObjectMapping {
            inner: Arc::new(ObjectInner {
                class: self.class,
                properties: self.properties,
                extra_properties: self.extra_properties,
            }),
        }
    }
}

#[derive(Clone)]
pub struct Alternative {
    predicate: Predicate,
    mapping: MappingRef,
}

impl Alternative {
    pub fn matches(&self, json: &Value) -> bool {
        (self.predicate)(json)
    }

    pub fn mapping(&self) -> &MappingRef {
        &self.mapping
    }
}

#[derive(Clone)]
pub struct ChoiceMapping {
    inner: Arc<ChoiceInner>,
}

struct ChoiceInner {
    description: String,
    alternatives: Vec<Alternative>,
}

impl ChoiceMapping {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ChoiceInner {
                description: description.into(),
                alternatives: Vec::new(),
            }),
        }
    }

    /// Appends an alternative; alternatives are tried in registration order.
    pub fn when<P>(self, predicate: P, mapping: impl Into<MappingRef>) -> Self
    where
        P: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        let mut alternatives = self.inner.alternatives.clone();
        alternatives.push(Alternative {
            predicate: Arc::new(predicate),
            mapping: mapping.into(),
        });
        Self {
            inner: Arc::new(ChoiceInner {
                description: self.inner.description.clone(),
                alternatives,
            }),
        }
    }

    /// Alternative selected by a JSON key being present (and non-null).
    pub fn when_key(self, key: &str, mapping: impl Into<MappingRef>) -> Self {
        let key = key.to_string();
        self.when(move |json| json.get(&key).is_some_and(|value| !value.is_null()), mapping)
    }

    pub fn description(&self) -> &str {
        &self.inner.description
    }

    pub fn alternatives(&self) -> &[Alternative] {
        &self.inner.alternatives
    }

    pub fn select(&self, json: &Value) -> Option<&Alternative> {
        self.inner
            .alternatives
            .iter()
            .find(|alternative| alternative.matches(json))
    }
}

impl fmt::Debug for ChoiceMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChoiceMapping")
            .field("description", &self.inner.description)
            .field("alternatives", &self.inner.alternatives.len())
            .finish()
    }
}

#[derive(Clone, Debug)]
pub enum Mapping {
    Raw(RawValue),
    Link(LinkMapping),
    Object(ObjectMapping),
    Option(MappingRef),
    Array(MappingRef),
    Choice(ChoiceMapping),
}

impl Mapping {
    pub fn boolean() -> Self {
        Mapping::Raw(RawValue::boolean())
    }

    pub fn number() -> Self {
        Mapping::Raw(RawValue::number())
    }

    pub fn string() -> Self {
        Mapping::Raw(RawValue::string())
    }

    pub fn get_url() -> Self {
        Mapping::Raw(RawValue::get_url())
    }

    pub fn raw(raw: RawValue) -> Self {
        Mapping::Raw(raw)
    }

    /// A link that fails when the target is not found.
    pub fn link(target: impl Into<MappingRef>) -> Self {
        Mapping::Link(LinkMapping::new(target, NotFoundPolicy::Raise))
    }

    pub fn link_or(target: impl Into<MappingRef>, not_found: NotFoundPolicy) -> Self {
        Mapping::Link(LinkMapping::new(target, not_found))
    }

    pub fn optional_link(target: impl Into<MappingRef>) -> Self {
        Mapping::Option(MappingRef::ready(Mapping::Link(LinkMapping::new(
            target,
            NotFoundPolicy::Absent,
        ))))
    }

    pub fn option(item: impl Into<MappingRef>) -> Self {
        Mapping::Option(item.into())
    }

    pub fn array(item: impl Into<MappingRef>) -> Self {
        Mapping::Array(item.into())
    }

    pub fn pass_through(class: &Class) -> Self {
        Mapping::Object(ObjectMapping::pass_through(class))
    }

    pub fn describe(&self) -> String {
        match self {
            Mapping::Raw(raw) => raw.kind().describe().to_string(),
            Mapping::Link(_) => "link".to_string(),
            Mapping::Object(object) => format!("object {}", object.class()),
            Mapping::Option(_) => "option".to_string(),
            Mapping::Array(_) => "array".to_string(),
            Mapping::Choice(choice) => format!("choice {}", choice.description()),
        }
    }

    /// Forces every reachable lazy handle once and checks link targets.
    pub fn validate(&self) -> Result<(), Error> {
        let mut seen = HashSet::new();
        validate_mapping(self, &mut seen)
    }
}

impl From<ObjectMapping> for Mapping {
    fn from(mapping: ObjectMapping) -> Self {
        Mapping::Object(mapping)
    }
}

impl From<ChoiceMapping> for Mapping {
    fn from(mapping: ChoiceMapping) -> Self {
        Mapping::Choice(mapping)
    }
}

impl From<RawValue> for Mapping {
    fn from(raw: RawValue) -> Self {
        Mapping::Raw(raw)
    }
}

fn validate_ref(handle: &MappingRef, seen: &mut HashSet<usize>) -> Result<(), Error> {
    if !seen.insert(handle.id()) {
        return Ok(());
    }
    let mapping = handle.resolve()?;
    validate_mapping(mapping, seen)
}

fn validate_mapping(mapping: &Mapping, seen: &mut HashSet<usize>) -> Result<(), Error> {
    match mapping {
        Mapping::Raw(_) => Ok(()),
        Mapping::Link(link) => {
            link.target()?;
            validate_ref(&link.target, seen)
        }
        Mapping::Object(object) => {
            // Object mappings recur through shared Arcs; key on the Arc as well.
            if !seen.insert(Arc::as_ptr(&object.inner) as usize) {
                return Ok(());
            }
            for (target, property) in object.properties() {
                validate_ref(property.mapping(), seen).map_err(|err| {
                    err.with_context(format!("property '{target}' of {}", object.class()))
                })?;
            }
            Ok(())
        }
        Mapping::Option(item) | Mapping::Array(item) => validate_ref(item, seen),
        Mapping::Choice(choice) => {
            for (index, alternative) in choice.alternatives().iter().enumerate() {
                validate_ref(alternative.mapping(), seen).map_err(|err| {
                    err.with_context(format!(
                        "alternative {index} of choice {}",
                        choice.description()
                    ))
                })?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ChoiceMapping, ExtraProperties, Mapping, MappingRef, NotFoundPolicy, ObjectMapping,
        Primitive, RawValue,
    };
    use crate::core::class::Class;
    use crate::core::error::ErrorKind;
    use crate::core::mapped::Mapped;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, OnceLock};

    #[test]
    fn lazy_handle_runs_thunk_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = MappingRef::lazy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Mapping::string())
        });
        handle.resolve().expect("first");
        handle.resolve().expect("second");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn raw_map_composes_after_extraction() {
        let upper = RawValue::string().map(|value| match value {
            Mapped::String(text) => Ok(Mapped::String(text.to_uppercase())),
            other => Ok(other),
        });
        let out = upper
            .extract(Primitive::String("pippo".to_string()))
            .expect("extract");
        assert_eq!(out.as_str(), Some("PIPPO"));
    }

    #[test]
    fn get_url_requires_a_parent_url() {
        let err = RawValue::get_url()
            .extract(Primitive::Url(None))
            .expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::MissingRequiredLink);
        let ok = RawValue::get_url()
            .extract(Primitive::Url(Some("/pet/1".to_string())))
            .expect("url");
        assert_eq!(ok.as_str(), Some("/pet/1"));
    }

    #[test]
    fn not_found_policies() {
        assert_eq!(
            NotFoundPolicy::Raise.apply("/x").expect_err("raise").kind(),
            ErrorKind::NotFound
        );
        assert!(NotFoundPolicy::Absent.apply("/x").expect("absent").is_null());
        let fallback = NotFoundPolicy::handler(|url| Ok(Mapped::String(format!("gone {url}"))));
        assert_eq!(fallback.apply("/x").expect("handler").as_str(), Some("gone /x"));
    }

    #[test]
    fn extra_properties_serde_is_lowercase() {
        let parsed: ExtraProperties = serde_json::from_value(json!("discard")).expect("parse");
        assert_eq!(parsed, ExtraProperties::Discard);
        assert_eq!(ExtraProperties::default(), ExtraProperties::Copy);
    }

    #[test]
    fn validate_rejects_link_to_raw_leaf() {
        let person = Class::new("Person");
        let mapping: Mapping = ObjectMapping::builder(&person)
            .field("nickname", Mapping::link(Mapping::string()))
            .build()
            .into();
        let err = mapping.validate().expect_err("invalid link");
        assert_eq!(err.kind(), ErrorKind::Construction);
        assert!(err.to_string().contains("property 'nickname' of Person"));
    }

    #[test]
    fn validate_terminates_on_self_reference() {
        let person = Class::new("Person");
        let slot: Arc<OnceLock<Mapping>> = Arc::new(OnceLock::new());
        let inner = Arc::clone(&slot);
        let myself = MappingRef::lazy(move || {
            inner.get().cloned().ok_or_else(|| {
                crate::core::error::Error::new(ErrorKind::Construction)
                    .with_message("person mapping not set")
            })
        });
        let mapping: Mapping = ObjectMapping::builder(&person)
            .field("name", Mapping::string())
            .field("friend", Mapping::optional_link(myself))
            .build()
            .into();
        let _ = slot.set(mapping.clone());
        mapping.validate().expect("valid");
    }

    #[test]
    fn choice_selects_first_matching_alternative() {
        let cat = Class::new("Cat");
        let dog = Class::new("Dog");
        let choice = ChoiceMapping::new("Pet")
            .when_key("meow", Mapping::pass_through(&cat))
            .when(|json| json.get("bau").is_some(), Mapping::pass_through(&dog))
            .when(|_| true, Mapping::pass_through(&dog));
        assert_eq!(choice.alternatives().len(), 3);
        let picked = choice.select(&json!({"bau": "buuhu"})).expect("match");
        match picked.mapping().resolve().expect("resolve") {
            Mapping::Object(object) => assert_eq!(object.class(), &dog),
            other => panic!("unexpected {other:?}"),
        }
    }
}
