//! Purpose: Recursive async interpreter from (Mapping, JSON, Context) to `Mapped` values.
//! Exports: `Context`, `Outcome`, `interpret`, `interpret_root`.
//! Role: Engine behind every fetch; follows links through the resolver on demand.
//! Invariants: Object nodes with a URL claim their cache key before recursing; the check and
//! the registration are one atomic step.
//! Invariants: Cache hits never await inline; their completions go on the cycle side-list.
//! Invariants: Array output order equals input order regardless of completion order.
//! Invariants: Siblings all run to completion; the first failure in declaration order wins.
//! Notes: `Choice` commits to the first matching predicate and never falls through.
use std::collections::HashSet;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all, try_join_all};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use super::class::ObjectRef;
use super::error::{Error, ErrorKind};
use super::identity::{Claim, Completion, IdentityCache};
use super::mapped::Mapped;
use super::mapping::{
    ChoiceMapping, ExtraProperties, LinkMapping, Mapping, MappingRef, NotFoundPolicy,
    ObjectMapping, Primitive, RawKind, RawValue,
};
use super::resolver::Resolver;

/// Per-call interpretation state, copied on modification.
#[derive(Clone)]
pub struct Context {
    extra_properties: ExtraProperties,
    resolver: Arc<dyn Resolver>,
    objects: Arc<IdentityCache>,
    url: Option<String>,
    parent_url: Option<String>,
}

impl Context {
    /// Fresh run state: empty identity cache, no current or parent URL.
    pub fn new(extra_properties: ExtraProperties, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            extra_properties,
            resolver,
            objects: Arc::new(IdentityCache::new()),
            url: None,
            parent_url: None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn parent_url(&self) -> Option<&str> {
        self.parent_url.as_deref()
    }

    pub fn objects(&self) -> &IdentityCache {
        &self.objects
    }

    fn with_url(&self, url: String) -> Self {
        Self {
            url: Some(url),
            parent_url: self.url.clone(),
            ..self.clone()
        }
    }

    fn without_url(&self) -> Self {
        Self {
            url: None,
            parent_url: self.url.clone(),
            ..self.clone()
        }
    }
}

/// An interpreted value plus the in-flight objects it cross-linked into through cache hits.
pub struct Outcome {
    pub value: Mapped,
    pub cycles: Vec<Completion>,
}

impl Outcome {
    fn value(value: Mapped) -> Self {
        Self {
            value,
            cycles: Vec::new(),
        }
    }

    fn map(self, f: impl FnOnce(Mapped) -> Mapped) -> Self {
        Self {
            value: f(self.value),
            cycles: self.cycles,
        }
    }
}

pub fn interpret(
    context: Context,
    mapping: Mapping,
    json: Value,
) -> BoxFuture<'static, Result<Outcome, Error>> {
    async move {
        match mapping {
            Mapping::Raw(raw) => interpret_raw(&context, &raw, json),
            Mapping::Link(link) => interpret_link(context, link, json).await,
            Mapping::Object(object) => interpret_object(context, object, json).await,
            Mapping::Option(item) => interpret_option(context, item, json).await,
            Mapping::Array(item) => interpret_array(context, item, json).await,
            Mapping::Choice(choice) => interpret_choice(context, choice, json).await,
        }
    }
    .boxed()
}

/// Interprets from the top and waits for every cross-linked object before returning.
pub async fn interpret_root(
    context: Context,
    mapping: Mapping,
    json: Value,
) -> Result<Mapped, Error> {
    let outcome = interpret(context, mapping, json).await?;
    if !outcome.cycles.is_empty() {
        trace!(pending = outcome.cycles.len(), "draining cross-linked objects");
        try_join_all(outcome.cycles).await?;
    }
    Ok(outcome.value)
}

fn interpret_raw(context: &Context, raw: &RawValue, json: Value) -> Result<Outcome, Error> {
    let primitive = match (raw.kind(), json) {
        (RawKind::Url, _) => Primitive::Url(context.parent_url.clone()),
        (RawKind::Boolean, Value::Bool(value)) => Primitive::Bool(value),
        (RawKind::Number, Value::Number(value)) => Primitive::Number(value),
        (RawKind::String, Value::String(value)) => Primitive::String(value),
        (kind, other) => {
            return Err(Error::new(ErrorKind::ShapeMismatch)
                .with_message(format!("{other} is not {}", kind.describe())));
        }
    };
    raw.extract(primitive).map(Outcome::value)
}

async fn interpret_link(
    context: Context,
    link: LinkMapping,
    json: Value,
) -> Result<Outcome, Error> {
    let url = match json {
        Value::String(url) => url,
        Value::Null => {
            return Err(Error::new(ErrorKind::MissingRequiredLink).with_message("missing link"));
        }
        other => {
            return Err(Error::new(ErrorKind::ShapeMismatch)
                .with_message(format!("{other} is not a url")));
        }
    };
    let target = link.target()?.mapping();

    let fetched = context
        .resolver
        .fetch(&url)
        .await
        .map_err(|err| err.with_url(url.as_str()))?;
    match fetched {
        None => {
            debug!(url = %url, policy = ?link.not_found(), "link target not found");
            link.not_found().apply(&url).map(Outcome::value)
        }
        Some(document) => {
            let json = Value::clone(&document);
            interpret(context.with_url(url.clone()), target, json)
                .await
                .map_err(|err| err.with_url(url))
        }
    }
}

async fn interpret_object(
    context: Context,
    object: ObjectMapping,
    json: Value,
) -> Result<Outcome, Error> {
    let class = object.class().clone();
    let fields = match json {
        Value::Object(fields) => fields,
        Value::Null => {
            return Err(Error::new(ErrorKind::MissingRequiredLink)
                .with_message(format!("missing object {class}")));
        }
        other => {
            return Err(Error::new(ErrorKind::ShapeMismatch).with_message(format!(
                "expecting an object got '{other}' creating object {class}"
            )));
        }
    };

    let instance = class.instantiate();
    let settle = match context.url() {
        Some(url) => match context.objects.claim(url, &class, Arc::clone(&instance)) {
            Claim::Cached(entry) => {
                trace!(url = %url, class = %class, "object in flight, deferring to cache entry");
                return Ok(Outcome {
                    value: Mapped::Object(entry.object),
                    cycles: vec![entry.completion],
                });
            }
            Claim::Registered(settle) => {
                trace!(url = %url, class = %class, "object registered in identity cache");
                Some(settle)
            }
        },
        None => None,
    };

    let populated = populate(&context, &object, &instance, fields).await;
    if let Some(settle) = settle {
        settle.resolve(populated.as_ref().map(|_| ()).map_err(Error::clone));
    }
    populated.map(|cycles| Outcome {
        value: Mapped::Object(instance),
        cycles,
    })
}

async fn populate(
    context: &Context,
    object: &ObjectMapping,
    instance: &ObjectRef,
    fields: Map<String, Value>,
) -> Result<Vec<Completion>, Error> {
    let declared: HashSet<&str> = object
        .properties()
        .values()
        .map(|property| property.source())
        .collect();
    let extras: Vec<&String> = fields
        .keys()
        .filter(|key| !declared.contains(key.as_str()))
        .collect();

    match object.extra_properties().unwrap_or(context.extra_properties) {
        ExtraProperties::Fail if !extras.is_empty() => {
            let keys: Vec<&str> = extras.iter().map(|key| key.as_str()).collect();
            return Err(Error::new(ErrorKind::ExtraProperties).with_message(format!(
                "extra properties {} creating object {}",
                keys.join(","),
                object.class()
            )));
        }
        ExtraProperties::Copy => {
            for key in extras {
                instance.set(key.clone(), Mapped::Json(fields[key.as_str()].clone()));
            }
        }
        ExtraProperties::Fail | ExtraProperties::Discard => {}
    }

    let property_context = context.without_url();
    let tasks = object.properties().iter().map(|(target, property)| {
        let json = fields.get(property.source()).cloned().unwrap_or(Value::Null);
        interpret_property(
            property_context.clone(),
            Arc::clone(instance),
            target.clone(),
            property.mapping().clone(),
            json,
        )
    });

    let mut cycles = Vec::new();
    for result in join_all(tasks).await {
        cycles.extend(result?);
    }
    Ok(cycles)
}

async fn interpret_property(
    context: Context,
    instance: ObjectRef,
    target: String,
    handle: MappingRef,
    json: Value,
) -> Result<Vec<Completion>, Error> {
    let outcome = match handle.resolve() {
        Ok(mapping) => interpret(context, mapping.clone(), json).await,
        Err(err) => Err(err),
    }
    .map_err(|err| err.with_context(format!("property '{target}' of {}", instance.class())))?;
    instance.set(target, outcome.value);
    Ok(outcome.cycles)
}

async fn interpret_option(
    context: Context,
    item: MappingRef,
    json: Value,
) -> Result<Outcome, Error> {
    let item = item.resolve()?.clone();
    match item {
        // A url leaf consumes no JSON; an absent parent url is simply empty.
        Mapping::Raw(raw) if raw.kind() == RawKind::Url => match context.parent_url() {
            None => Ok(Outcome::value(Mapped::none())),
            Some(_) => Ok(interpret_raw(&context, &raw, json)?.map(Mapped::some)),
        },
        _ if json.is_null() => Ok(Outcome::value(Mapped::none())),
        Mapping::Link(link) => {
            let link = match link.not_found() {
                NotFoundPolicy::Raise => link.with_not_found(NotFoundPolicy::Absent),
                _ => link,
            };
            let outcome = interpret(context, Mapping::Link(link), json).await?;
            Ok(outcome.map(wrap_present))
        }
        other => Ok(interpret(context, other, json).await?.map(wrap_present)),
    }
}

fn wrap_present(value: Mapped) -> Mapped {
    match value {
        Mapped::Null => Mapped::none(),
        value => Mapped::some(value),
    }
}

async fn interpret_array(
    context: Context,
    item: MappingRef,
    json: Value,
) -> Result<Outcome, Error> {
    let elements = match json {
        Value::Array(elements) => elements,
        other => {
            return Err(Error::new(ErrorKind::ShapeMismatch)
                .with_message(format!("expecting an array got {other}")));
        }
    };
    let item = item.resolve()?.clone();

    let tasks = elements.into_iter().enumerate().map(|(index, element)| {
        interpret(context.clone(), item.clone(), element)
            .map(move |result| result.map_err(|err| err.with_context(format!("index {index}"))))
    });

    let results = join_all(tasks).await;
    let mut values = Vec::with_capacity(results.len());
    let mut cycles = Vec::new();
    for result in results {
        let outcome = result?;
        values.push(outcome.value);
        cycles.extend(outcome.cycles);
    }
    Ok(Outcome {
        value: Mapped::Array(values),
        cycles,
    })
}

async fn interpret_choice(
    context: Context,
    choice: ChoiceMapping,
    json: Value,
) -> Result<Outcome, Error> {
    if json.is_null() {
        return Err(Error::new(ErrorKind::ShapeMismatch).with_message(format!(
            "expecting a value for choice {} got null",
            choice.description()
        )));
    }
    let Some(alternative) = choice.select(&json) else {
        let input = serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string());
        return Err(Error::new(ErrorKind::NoChoiceMatched).with_message(format!(
            "could not find a valid choice for {}\ninput:\n{input}",
            choice.description()
        )));
    };
    let mapping = alternative.mapping().resolve()?.clone();
    interpret(context, mapping, json).await
}
