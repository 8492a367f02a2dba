//! DeclarativeTransform: YAML-described record-to-entry mapping
//!
//! Interprets a list of primitives (entry, for_each, lookup) against one
//! record to produce destination entries, so simple streams can be mapped
//! from configuration instead of Rust. Also serves as the fallback transform.
//!
//! Templates interpolate record fields via `{input.field}` with optional
//! filters (lowercase, sort, join, default). Variables bound by `for_each`
//! and `lookup` are addressed by name: `{org.login}`.

use super::correlation::CorrelationContext;
use super::traits::{Transform, TransformError};
use super::types::{CorrelationKey, DestinationEntry};
use crate::protocol::{RawRecord, StreamId};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

// ---------------------------------------------------------------------------
// Template engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum TemplateError {
    /// Accessor names a field or variable that is not there
    Missing(String),
    Invalid { accessor: String, reason: String },
}

impl TemplateError {
    fn invalid(accessor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            accessor: accessor.into(),
            reason: reason.into(),
        }
    }
}

impl From<TemplateError> for TransformError {
    fn from(e: TemplateError) -> Self {
        match e {
            TemplateError::Missing(accessor) => TransformError::MissingField(accessor),
            TemplateError::Invalid { accessor, reason } => TransformError::InvalidField {
                field: accessor,
                reason,
            },
        }
    }
}

/// Values visible to template expressions while rendering one record.
struct TemplateContext<'a> {
    input: &'a Map<String, Value>,
    stream: &'a str,
    vars: &'a HashMap<String, Value>,
}

/// Render a template to a string, replacing every `{expr}`.
fn render_template(template: &str, ctx: &TemplateContext) -> Result<String, TemplateError> {
    let mut result = String::new();
    let mut chars = template.chars();

    while let Some(ch) = chars.next() {
        if ch == '{' {
            let mut expr = String::new();
            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(c) => expr.push(c),
                    None => {
                        return Err(TemplateError::invalid(
                            template,
                            "unclosed template expression",
                        ))
                    }
                }
            }
            let rendered = eval_expression(expr.trim(), ctx)?;
            result.push_str(&value_to_string(&rendered, expr.trim())?);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

/// Render a template to a JSON value.
///
/// A template that is exactly one unfiltered expression keeps the type of
/// the value it names; anything else renders to a string.
fn render_value(template: &str, ctx: &TemplateContext) -> Result<Value, TemplateError> {
    if let Some(expr) = single_expression(template) {
        if !expr.contains('|') {
            return resolve_accessor(expr.trim(), ctx);
        }
    }
    render_template(template, ctx).map(Value::String)
}

fn single_expression(template: &str) -> Option<&str> {
    let inner = template.trim().strip_prefix('{')?.strip_suffix('}')?;
    if inner.contains('{') || inner.contains('}') {
        return None;
    }
    Some(inner)
}

/// Evaluate the part between `{` and `}`: an accessor plus optional filters.
fn eval_expression(expr: &str, ctx: &TemplateContext) -> Result<Value, TemplateError> {
    let (accessor, filters) = match expr.split_once('|') {
        Some((a, f)) => (a.trim(), Some(f)),
        None => (expr, None),
    };

    let raw = match resolve_accessor(accessor, ctx) {
        Ok(v) => v,
        // `default` also covers absent fields
        Err(TemplateError::Missing(_)) if filters.map(has_default_filter).unwrap_or(false) => {
            Value::Null
        }
        Err(e) => return Err(e),
    };

    match filters {
        Some(f) => apply_filters(&raw, f),
        None => Ok(raw),
    }
}

fn has_default_filter(filters: &str) -> bool {
    filters
        .split('|')
        .any(|f| f.trim().split(':').next().map(str::trim) == Some("default"))
}

/// Resolve a dotted accessor: `input.a.b`, `stream`, or `<var>.a.b`.
fn resolve_accessor(accessor: &str, ctx: &TemplateContext) -> Result<Value, TemplateError> {
    if accessor == "stream" {
        return Ok(Value::String(ctx.stream.to_string()));
    }

    let mut segments = accessor.split('.');
    let root = segments.next().unwrap_or_default();
    let missing = || TemplateError::Missing(accessor.to_string());

    let mut current: &Value = if root == "input" {
        match segments.next() {
            Some(first) => ctx.input.get(first).ok_or_else(missing)?,
            None => return Ok(Value::Object(ctx.input.clone())),
        }
    } else {
        ctx.vars.get(root).ok_or_else(missing)?
    };

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
        .ok_or_else(missing)?;
    }

    Ok(current.clone())
}

/// Convert a JSON value to its string form for interpolation.
fn value_to_string(value: &Value, accessor: &str) -> Result<String, TemplateError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        Value::Array(arr) => {
            let items: Result<Vec<String>, _> =
                arr.iter().map(|v| value_to_string(v, accessor)).collect();
            Ok(items?.join(","))
        }
        Value::Object(_) => Err(TemplateError::invalid(
            accessor,
            "cannot render object as string",
        )),
    }
}

/// Apply a filter pipeline (e.g. "sort | join:,") to a value.
fn apply_filters(value: &Value, filters_str: &str) -> Result<Value, TemplateError> {
    let mut current = value.clone();
    for filter in filters_str.split('|').map(str::trim) {
        current = apply_single_filter(&current, filter)?;
    }
    Ok(current)
}

fn apply_single_filter(value: &Value, filter: &str) -> Result<Value, TemplateError> {
    let (name, arg) = match filter.split_once(':') {
        Some((n, a)) => (n.trim(), Some(a.trim())),
        None => (filter.trim(), None),
    };

    match name {
        "lowercase" => match value {
            Value::String(s) => Ok(Value::String(s.to_lowercase())),
            Value::Null => Ok(Value::Null),
            _ => Err(TemplateError::invalid(filter, "lowercase requires a string")),
        },
        "sort" => match value {
            Value::Array(arr) => {
                let mut sorted: Vec<String> = arr
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                sorted.sort();
                Ok(Value::Array(sorted.into_iter().map(Value::String).collect()))
            }
            _ => Err(TemplateError::invalid(filter, "sort requires an array")),
        },
        "join" => {
            let sep = arg.unwrap_or(",");
            match value {
                Value::Array(arr) => {
                    let items: Vec<&str> = arr.iter().filter_map(Value::as_str).collect();
                    Ok(Value::String(items.join(sep)))
                }
                _ => Err(TemplateError::invalid(filter, "join requires an array")),
            }
        }
        "default" => {
            let fallback = arg.unwrap_or("");
            match value {
                Value::Null => Ok(Value::String(fallback.to_string())),
                Value::String(s) if s.is_empty() => Ok(Value::String(fallback.to_string())),
                other => Ok(other.clone()),
            }
        }
        _ => Err(TemplateError::invalid(filter, "unknown template filter")),
    }
}

const KNOWN_FILTERS: [&str; 4] = ["lowercase", "sort", "join", "default"];

/// Static check of a template: balanced braces and known filters.
fn check_template(template: &str) -> Result<(), String> {
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| format!("unclosed template expression in '{}'", template))?;
        let expr = &after[..close];
        if expr.contains('{') {
            return Err(format!("nested '{{' in '{}'", template));
        }
        for filter in expr.split('|').skip(1) {
            let name = filter.split(':').next().unwrap_or_default().trim();
            if !KNOWN_FILTERS.contains(&name) {
                return Err(format!("unknown filter '{}' in '{}'", name, template));
            }
        }
        rest = &after[close + 1..];
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Spec types
// ---------------------------------------------------------------------------

/// How a record's correlation key is derived.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum KeyStrategy {
    /// `key: "{input.login}"`
    Template(String),
    /// `key: { hash: ["{input.org}", "{input.name}"] }`: UUID v5 of the joined parts
    Hash { hash: Vec<String> },
}

/// A payload field: a bare template, or a template marked optional.
///
/// Optional fields are omitted when their accessor misses instead of failing
/// the record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FieldTemplate {
    Required(String),
    Detailed {
        template: String,
        #[serde(default)]
        optional: bool,
    },
}

impl FieldTemplate {
    fn template(&self) -> &str {
        match self {
            Self::Required(t) => t,
            Self::Detailed { template, .. } => template,
        }
    }

    fn is_optional(&self) -> bool {
        matches!(self, Self::Detailed { optional: true, .. })
    }
}

/// Primitive: emit one destination entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntryPrimitive {
    #[serde(rename = "type")]
    pub entry_type: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldTemplate>,
}

/// Primitive: repeat nested primitives for each item of an array.
///
/// A missing or null collection yields no iterations.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForEachPrimitive {
    pub collection: String,
    #[serde(rename = "as")]
    pub variable: String,
    pub emit: Vec<Primitive>,
}

/// Primitive: bind a previously seen record of another stream.
///
/// The binding is visible to the primitives after it in the same list.
/// When the key or record is missing the variable stays unbound.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LookupPrimitive {
    pub stream: StreamId,
    pub key: String,
    #[serde(rename = "as")]
    pub variable: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Primitive {
    Entry(EntryPrimitive),
    ForEach(ForEachPrimitive),
    Lookup(LookupPrimitive),
}

/// A declarative mapping for one stream (or for any stream, as a fallback).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeclarativeSpec {
    #[serde(default)]
    pub id: Option<String>,
    /// Absent for the fallback spec
    #[serde(default)]
    pub stream: Option<StreamId>,
    #[serde(default)]
    pub key: Option<KeyStrategy>,
    #[serde(default)]
    pub depends_on: Vec<StreamId>,
    pub emit: Vec<Primitive>,
}

impl DeclarativeSpec {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }
}

// ---------------------------------------------------------------------------
// DeclarativeTransform
// ---------------------------------------------------------------------------

/// Transform that interprets a declarative spec for each record.
#[derive(Debug)]
pub struct DeclarativeTransform {
    id: String,
    spec: DeclarativeSpec,
    destination_types: Vec<String>,
    dependencies: Vec<StreamId>,
}

impl DeclarativeTransform {
    /// Validate a spec and build the transform.
    ///
    /// Declared destination types are collected from every `entry`;
    /// dependencies are `depends_on` plus every stream a `lookup` reads.
    pub fn new(spec: DeclarativeSpec) -> Result<Self, TransformError> {
        let id = spec
            .id
            .clone()
            .or_else(|| spec.stream.as_ref().map(|s| s.to_string()))
            .unwrap_or_else(|| "fallback".to_string());

        validate_spec(&spec).map_err(|reason| {
            TransformError::Internal(format!("invalid mapping '{}': {}", id, reason))
        })?;

        let mut types = BTreeSet::new();
        let mut deps: BTreeSet<StreamId> = spec.depends_on.iter().cloned().collect();
        collect_declarations(&spec.emit, &mut types, &mut deps);

        Ok(Self {
            id,
            spec,
            destination_types: types.into_iter().collect(),
            dependencies: deps.into_iter().collect(),
        })
    }
}

fn validate_spec(spec: &DeclarativeSpec) -> Result<(), String> {
    if spec.emit.is_empty() {
        return Err("emit list is empty".to_string());
    }
    match &spec.key {
        Some(KeyStrategy::Template(t)) => check_template(t)?,
        Some(KeyStrategy::Hash { hash }) => {
            if hash.is_empty() {
                return Err("hash key needs at least one part".to_string());
            }
            for part in hash {
                check_template(part)?;
            }
        }
        None => {}
    }
    validate_primitives(&spec.emit)
}

fn validate_primitives(primitives: &[Primitive]) -> Result<(), String> {
    for primitive in primitives {
        match primitive {
            Primitive::Entry(entry) => {
                if entry.entry_type.trim().is_empty() {
                    return Err("entry with empty type".to_string());
                }
                for field in entry.fields.values() {
                    check_template(field.template())?;
                }
            }
            Primitive::ForEach(fe) => {
                if fe.variable.is_empty() || fe.variable == "input" || fe.variable == "stream" {
                    return Err(format!("invalid for_each variable '{}'", fe.variable));
                }
                validate_primitives(&fe.emit)?;
            }
            Primitive::Lookup(lookup) => {
                if lookup.variable.is_empty() || lookup.variable == "input" || lookup.variable == "stream" {
                    return Err(format!("invalid lookup variable '{}'", lookup.variable));
                }
                check_template(&lookup.key)?;
            }
        }
    }
    Ok(())
}

fn collect_declarations(
    primitives: &[Primitive],
    types: &mut BTreeSet<String>,
    deps: &mut BTreeSet<StreamId>,
) {
    for primitive in primitives {
        match primitive {
            Primitive::Entry(entry) => {
                types.insert(entry.entry_type.clone());
            }
            Primitive::ForEach(fe) => collect_declarations(&fe.emit, types, deps),
            Primitive::Lookup(lookup) => {
                deps.insert(lookup.stream.clone());
            }
        }
    }
}

/// UUID v5 namespace for hashed correlation keys.
const KEY_NAMESPACE: uuid::Uuid = uuid::Uuid::from_bytes([
    0x3f, 0x9a, 0x61, 0x0e, 0x52, 0xc4, 0x4b, 0x8d,
    0x9e, 0x27, 0x1d, 0x05, 0xa8, 0x6c, 0xf3, 0x41,
]);

impl Transform for DeclarativeTransform {
    fn id(&self) -> &str {
        &self.id
    }

    fn destination_types(&self) -> &[String] {
        &self.destination_types
    }

    fn dependencies(&self) -> &[StreamId] {
        &self.dependencies
    }

    fn extract_key(&self, record: &RawRecord) -> Option<CorrelationKey> {
        let vars = HashMap::new();
        let ctx = TemplateContext {
            input: &record.data,
            stream: &record.stream,
            vars: &vars,
        };

        match &self.spec.key {
            None => record.field("id").and_then(CorrelationKey::from_value),
            Some(KeyStrategy::Template(template)) => render_value(template, &ctx)
                .ok()
                .and_then(|v| CorrelationKey::from_value(&v)),
            Some(KeyStrategy::Hash { hash }) => {
                let parts: Result<Vec<String>, _> =
                    hash.iter().map(|t| render_template(t, &ctx)).collect();
                let joined = parts.ok()?.join(":");
                Some(CorrelationKey::new(
                    uuid::Uuid::new_v5(&KEY_NAMESPACE, joined.as_bytes()).to_string(),
                ))
            }
        }
    }

    fn convert(
        &self,
        record: &RawRecord,
        context: &CorrelationContext,
    ) -> Result<Vec<DestinationEntry>, TransformError> {
        let vars = HashMap::new();
        let ctx = TemplateContext {
            input: &record.data,
            stream: &record.stream,
            vars: &vars,
        };
        let mut entries = Vec::new();
        interpret_primitives(&self.spec.emit, &ctx, context, &mut entries)?;
        Ok(entries)
    }
}

/// Interpret a primitive list in its own variable scope.
fn interpret_primitives(
    primitives: &[Primitive],
    ctx: &TemplateContext,
    correlation: &CorrelationContext,
    out: &mut Vec<DestinationEntry>,
) -> Result<(), TemplateError> {
    let mut scope = ctx.vars.clone();

    for primitive in primitives {
        let scoped = TemplateContext {
            input: ctx.input,
            stream: ctx.stream,
            vars: &scope,
        };
        match primitive {
            Primitive::Entry(entry) => {
                out.push(interpret_entry(entry, &scoped)?);
            }
            Primitive::ForEach(fe) => {
                interpret_for_each(fe, &scoped, correlation, out)?;
            }
            Primitive::Lookup(lookup) => {
                let found = interpret_lookup(lookup, &scoped, correlation)?;
                match found {
                    Some(value) => {
                        scope.insert(lookup.variable.clone(), value);
                    }
                    None => {
                        scope.remove(&lookup.variable);
                    }
                }
            }
        }
    }

    Ok(())
}

fn interpret_entry(
    entry: &EntryPrimitive,
    ctx: &TemplateContext,
) -> Result<DestinationEntry, TemplateError> {
    let mut payload = Map::new();
    for (name, field) in &entry.fields {
        match render_value(field.template(), ctx) {
            Ok(value) => {
                payload.insert(name.clone(), value);
            }
            Err(TemplateError::Missing(_)) if field.is_optional() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(DestinationEntry::new(entry.entry_type.clone(), payload))
}

fn interpret_for_each(
    fe: &ForEachPrimitive,
    ctx: &TemplateContext,
    correlation: &CorrelationContext,
    out: &mut Vec<DestinationEntry>,
) -> Result<(), TemplateError> {
    let collection = match resolve_accessor(&fe.collection, ctx) {
        Ok(v) => v,
        Err(TemplateError::Missing(_)) => return Ok(()),
        Err(e) => return Err(e),
    };

    let items = match collection {
        Value::Array(items) => items,
        Value::Null => return Ok(()),
        _ => {
            return Err(TemplateError::invalid(
                fe.collection.as_str(),
                "for_each collection is not an array",
            ))
        }
    };

    for item in items {
        let mut vars = ctx.vars.clone();
        vars.insert(fe.variable.clone(), item);
        let item_ctx = TemplateContext {
            input: ctx.input,
            stream: ctx.stream,
            vars: &vars,
        };
        interpret_primitives(&fe.emit, &item_ctx, correlation, out)?;
    }

    Ok(())
}

fn interpret_lookup(
    lookup: &LookupPrimitive,
    ctx: &TemplateContext,
    correlation: &CorrelationContext,
) -> Result<Option<Value>, TemplateError> {
    let key_value = match render_value(&lookup.key, ctx) {
        Ok(v) => v,
        Err(TemplateError::Missing(_)) => return Ok(None),
        Err(e) => return Err(e),
    };
    let Some(key) = CorrelationKey::from_value(&key_value) else {
        return Ok(None);
    };

    Ok(correlation
        .get(&lookup.stream, &key)
        .map(|record| Value::Object(record.data.clone())))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
