//! Parser - Parse .bcf configuration files
//!
//! Convert DSL to resources using pest

use pest::Parser;
use pest_derive::Parser;
use std::collections::HashMap;
use std::env;

use crate::resource::{Resource, ResourceId, Value};

#[derive(Parser)]
#[grammar = "parser/bcform.pest"]
struct BcformParser;

type Pair<'a> = pest::iterators::Pair<'a, Rule>;
type Pairs<'a> = pest::iterators::Pairs<'a, Rule>;

/// Parse error
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Syntax error: {0}")]
    Syntax(#[from] Box<pest::error::Error<Rule>>),

    #[error("Invalid expression at line {line}: {message}")]
    InvalidExpression { line: usize, message: String },

    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),

    #[error("Invalid resource type: {0}")]
    InvalidResourceType(String),

    #[error("Duplicate binding: {0}")]
    DuplicateBinding(String),

    #[error("Duplicate resource: {0}")]
    DuplicateResource(String),
}

/// Provider configuration
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub attributes: HashMap<String, Value>,
}

/// Backend configuration for state storage
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Backend type (e.g., "local")
    pub backend_type: String,
    /// Backend-specific attributes
    pub attributes: HashMap<String, Value>,
}

/// Parse result
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub providers: Vec<ProviderConfig>,
    pub resources: Vec<Resource>,
    pub variables: HashMap<String, Value>,
    /// Backend configuration for state storage
    pub backend: Option<BackendConfig>,
}

impl ParsedFile {
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// Find a resource by its binding name
    pub fn find_binding(&self, binding: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.binding() == Some(binding))
    }
}

/// Parse context (variable scope)
#[derive(Default)]
struct ParseContext {
    variables: HashMap<String, Value>,
    /// Binding names that hold resources
    resource_bindings: HashMap<String, ResourceId>,
}

impl ParseContext {
    fn is_bound(&self, name: &str) -> bool {
        self.variables.contains_key(name) || self.resource_bindings.contains_key(name)
    }
}

/// Parse a .bcf file
pub fn parse(input: &str) -> Result<ParsedFile, ParseError> {
    let pairs = BcformParser::parse(Rule::file, input).map_err(Box::new)?;

    let mut ctx = ParseContext::default();
    let mut parsed = ParsedFile::default();

    for pair in pairs {
        if pair.as_rule() != Rule::file {
            continue;
        }
        for statement in pair.into_inner() {
            if statement.as_rule() != Rule::statement {
                continue;
            }
            let stmt = first_inner(statement)?;
            match stmt.as_rule() {
                Rule::provider_block => {
                    let (name, attributes) = parse_named_block(stmt, &ctx)?;
                    parsed.providers.push(ProviderConfig { name, attributes });
                }
                Rule::backend_block => {
                    let (backend_type, attributes) = parse_named_block(stmt, &ctx)?;
                    parsed.backend = Some(BackendConfig {
                        backend_type,
                        attributes,
                    });
                }
                Rule::let_binding => {
                    let line = line_of(&stmt);
                    let mut inner = children(stmt);
                    let name = next_pair(&mut inner, line, "binding name")?
                        .as_str()
                        .to_string();
                    if ctx.is_bound(&name) {
                        return Err(ParseError::DuplicateBinding(name));
                    }
                    let expr = first_inner(next_pair(&mut inner, line, "expression")?)?;
                    if expr.as_rule() == Rule::resource_expr {
                        let resource = parse_resource_expr(expr, &ctx, Some(&name))?;
                        push_resource(&mut parsed, &mut ctx, resource)?;
                    } else {
                        let value = parse_primary_value(expr, &ctx)?;
                        ctx.variables.insert(name, value);
                    }
                }
                Rule::anonymous_resource => {
                    let resource = parse_resource_expr(first_inner(stmt)?, &ctx, None)?;
                    push_resource(&mut parsed, &mut ctx, resource)?;
                }
                _ => {}
            }
        }
    }

    parsed.variables = ctx.variables;
    Ok(parsed)
}

fn push_resource(
    parsed: &mut ParsedFile,
    ctx: &mut ParseContext,
    resource: Resource,
) -> Result<(), ParseError> {
    if parsed.resources.iter().any(|r| r.id == resource.id) {
        return Err(ParseError::DuplicateResource(resource.id.to_string()));
    }
    if let Some(binding) = resource.binding() {
        ctx.resource_bindings
            .insert(binding.to_string(), resource.id.clone());
    }
    parsed.resources.push(resource);
    Ok(())
}

fn line_of(pair: &Pair) -> usize {
    pair.as_span().start_pos().line_col().0
}

/// Inner pairs without keyword tokens
fn children(pair: Pair) -> Pairs {
    let mut inner = pair.into_inner();
    while inner
        .peek()
        .is_some_and(|p| matches!(p.as_rule(), Rule::provider_kw | Rule::backend_kw | Rule::let_kw))
    {
        inner.next();
    }
    inner
}

fn next_pair<'a>(inner: &mut Pairs<'a>, line: usize, what: &str) -> Result<Pair<'a>, ParseError> {
    inner.next().ok_or_else(|| ParseError::InvalidExpression {
        line,
        message: format!("Expected {}", what),
    })
}

fn first_inner(pair: Pair) -> Result<Pair, ParseError> {
    let line = line_of(&pair);
    next_pair(&mut pair.into_inner(), line, "expression")
}

/// `provider NAME { ... }` and `backend TYPE { ... }`
fn parse_named_block(
    pair: Pair,
    ctx: &ParseContext,
) -> Result<(String, HashMap<String, Value>), ParseError> {
    let line = line_of(&pair);
    let mut inner = children(pair);
    let name = next_pair(&mut inner, line, "block name")?.as_str().to_string();

    let mut attributes = HashMap::new();
    for attr_pair in inner {
        if attr_pair.as_rule() == Rule::attribute {
            let (key, value) = parse_attribute(attr_pair, ctx)?;
            attributes.insert(key, value);
        }
    }

    Ok((name, attributes))
}

fn parse_attribute(pair: Pair, ctx: &ParseContext) -> Result<(String, Value), ParseError> {
    let line = line_of(&pair);
    let mut inner = pair.into_inner();
    let key = next_pair(&mut inner, line, "attribute name")?
        .as_str()
        .to_string();
    let value = parse_expression(next_pair(&mut inner, line, "attribute value")?, ctx)?;
    Ok((key, value))
}

/// Parse block contents (attributes and nested blocks)
/// Nested blocks with the same name are collected into a list
fn parse_block_contents(
    pairs: Pairs,
    ctx: &ParseContext,
) -> Result<HashMap<String, Value>, ParseError> {
    let mut attributes: HashMap<String, Value> = HashMap::new();
    let mut nested_blocks: Vec<(String, Vec<Value>)> = Vec::new();

    for content_pair in pairs {
        if content_pair.as_rule() != Rule::block_content {
            continue;
        }
        let inner = first_inner(content_pair)?;
        match inner.as_rule() {
            Rule::attribute => {
                let line = line_of(&inner);
                let (key, value) = parse_attribute(inner, ctx)?;
                if attributes.insert(key.clone(), value).is_some() {
                    return Err(ParseError::InvalidExpression {
                        line,
                        message: format!("Attribute '{}' is set more than once", key),
                    });
                }
            }
            Rule::nested_block => {
                let line = line_of(&inner);
                let mut block_inner = inner.into_inner();
                let block_name = next_pair(&mut block_inner, line, "block name")?
                    .as_str()
                    .to_string();

                let mut block_attrs = HashMap::new();
                for attr_pair in block_inner {
                    if attr_pair.as_rule() == Rule::attribute {
                        let (key, value) = parse_attribute(attr_pair, ctx)?;
                        block_attrs.insert(key, value);
                    }
                }

                match nested_blocks.iter_mut().find(|(name, _)| name == &block_name) {
                    Some((_, blocks)) => blocks.push(Value::Map(block_attrs)),
                    None => nested_blocks.push((block_name, vec![Value::Map(block_attrs)])),
                }
            }
            _ => {}
        }
    }

    for (name, blocks) in nested_blocks {
        if attributes.contains_key(&name) {
            return Err(ParseError::InvalidExpression {
                line: 0,
                message: format!("'{}' is used both as an attribute and as a block", name),
            });
        }
        attributes.insert(name, Value::List(blocks));
    }

    Ok(attributes)
}

fn parse_resource_expr(
    pair: Pair,
    ctx: &ParseContext,
    binding_name: Option<&str>,
) -> Result<Resource, ParseError> {
    let line = line_of(&pair);
    let mut inner = pair.into_inner();

    let mut read_only = false;
    if inner.peek().is_some_and(|p| p.as_rule() == Rule::read_kw) {
        inner.next();
        read_only = true;
    }

    let namespaced_type = next_pair(&mut inner, line, "resource type")?
        .as_str()
        .to_string();

    // baiducloud.blb -> provider "baiducloud", type "blb"
    let Some((provider, resource_type)) = namespaced_type.split_once('.') else {
        return Err(ParseError::InvalidResourceType(namespaced_type));
    };
    let provider = provider.to_string();
    let resource_type = resource_type.to_string();

    let mut attributes = parse_block_contents(inner, ctx)?;

    let resource_name = match binding_name {
        Some(binding) => binding.to_string(),
        None => match attributes.get("name") {
            Some(Value::String(s)) => s.clone(),
            _ => {
                return Err(ParseError::InvalidExpression {
                    line,
                    message: "Anonymous resource must have a 'name' attribute".to_string(),
                });
            }
        },
    };

    attributes.insert("_provider".to_string(), Value::String(provider));
    attributes.insert("_type".to_string(), Value::String(namespaced_type));
    if let Some(binding) = binding_name {
        attributes.insert("_binding".to_string(), Value::String(binding.to_string()));
    }

    Ok(Resource {
        id: ResourceId::new(resource_type, resource_name),
        attributes,
        read_only,
    })
}

fn parse_expression(pair: Pair, ctx: &ParseContext) -> Result<Value, ParseError> {
    let line = line_of(&pair);
    let inner = first_inner(pair)?;
    if inner.as_rule() == Rule::resource_expr {
        return Err(ParseError::InvalidExpression {
            line,
            message: "Resource expressions can only be used in let bindings".to_string(),
        });
    }
    parse_primary_value(inner, ctx)
}

fn parse_primary_value(pair: Pair, ctx: &ParseContext) -> Result<Value, ParseError> {
    // For primary, get inner content; otherwise process directly
    let inner = if pair.as_rule() == Rule::primary {
        first_inner(pair)?
    } else {
        pair
    };
    let line = line_of(&inner);

    match inner.as_rule() {
        Rule::env_var => {
            let var_name = parse_string(first_inner(inner)?.as_str());
            match env::var(&var_name) {
                Ok(val) => Ok(Value::String(val)),
                Err(_) => Err(ParseError::EnvVarNotSet(var_name)),
            }
        }
        Rule::list => {
            let items: Result<Vec<Value>, ParseError> = inner
                .into_inner()
                .map(|item| parse_expression(item, ctx))
                .collect();
            Ok(Value::List(items?))
        }
        Rule::map => {
            let mut map = HashMap::new();
            for entry in inner.into_inner() {
                if entry.as_rule() != Rule::map_entry {
                    continue;
                }
                let mut entry_inner = entry.into_inner();
                let key_pair = first_inner(next_pair(&mut entry_inner, line, "map key")?)?;
                let key = match key_pair.as_rule() {
                    Rule::string => parse_string(key_pair.as_str()),
                    _ => key_pair.as_str().to_string(),
                };
                let value = parse_expression(next_pair(&mut entry_inner, line, "map value")?, ctx)?;
                map.insert(key, value);
            }
            Ok(Value::Map(map))
        }
        Rule::boolean => Ok(Value::Bool(inner.as_str() == "true")),
        Rule::number => {
            let n: i64 = inner
                .as_str()
                .parse()
                .map_err(|e| ParseError::InvalidExpression {
                    line,
                    message: format!("Invalid number '{}': {}", inner.as_str(), e),
                })?;
            Ok(Value::Int(n))
        }
        Rule::string => Ok(Value::String(parse_string(inner.as_str()))),
        Rule::variable_ref => {
            // variable_ref can be "identifier" or "identifier.identifier" (member access)
            let mut parts = inner.into_inner();
            let first_ident = next_pair(&mut parts, line, "identifier")?.as_str();

            if let Some(second_part) = parts.next() {
                if ctx.variables.contains_key(first_ident) {
                    return Err(ParseError::InvalidExpression {
                        line,
                        message: format!(
                            "'{}' is not a resource, cannot access attribute '{}'",
                            first_ident,
                            second_part.as_str()
                        ),
                    });
                }
                // Validated in the resolve phase
                Ok(Value::ResourceRef(
                    first_ident.to_string(),
                    second_part.as_str().to_string(),
                ))
            } else if ctx.resource_bindings.contains_key(first_ident) {
                Err(ParseError::InvalidExpression {
                    line,
                    message: format!(
                        "'{}' is a resource; reference one of its attributes (e.g. {}.id)",
                        first_ident, first_ident
                    ),
                })
            } else {
                match ctx.variables.get(first_ident) {
                    Some(val) => Ok(val.clone()),
                    None => Err(ParseError::UndefinedVariable(first_ident.to_string())),
                }
            }
        }
        Rule::expression => parse_expression(inner, ctx),
        _ => Ok(Value::String(inner.as_str().to_string())),
    }
}

/// Strip the quotes of a string literal and process escape sequences
fn parse_string(literal: &str) -> String {
    let body = literal
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(literal);

    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Resolve resource references in a ParsedFile
///
/// References to attributes that are known at parse time are replaced with
/// their values. References to attributes only known after apply (e.g. `id`)
/// are kept. References to unknown bindings are an error.
pub fn resolve_resource_refs(parsed: &mut ParsedFile) -> Result<(), ParseError> {
    let mut binding_map: HashMap<String, HashMap<String, Value>> = HashMap::new();
    for resource in &parsed.resources {
        if let Some(binding_name) = resource.binding() {
            binding_map.insert(binding_name.to_string(), resource.attributes.clone());
        }
    }

    for resource in &mut parsed.resources {
        let mut resolved_attrs: HashMap<String, Value> = HashMap::new();

        for (key, value) in &resource.attributes {
            let resolved = resolve_value(value, &binding_map, 0)?;
            resolved_attrs.insert(key.clone(), resolved);
        }

        resource.attributes = resolved_attrs;
    }

    Ok(())
}

const MAX_REF_DEPTH: usize = 32;

fn resolve_value(
    value: &Value,
    binding_map: &HashMap<String, HashMap<String, Value>>,
    depth: usize,
) -> Result<Value, ParseError> {
    match value {
        Value::ResourceRef(binding_name, attr_name) => match binding_map.get(binding_name) {
            // `_`-prefixed attributes are bookkeeping, not values
            Some(attributes) if !attr_name.starts_with('_') => match attributes.get(attr_name) {
                Some(attr_value) if depth < MAX_REF_DEPTH => {
                    resolve_value(attr_value, binding_map, depth + 1)
                }
                _ => Ok(value.clone()),
            },
            Some(_) => Ok(value.clone()),
            None => Err(ParseError::UndefinedVariable(format!(
                "{}.{}",
                binding_name, attr_name
            ))),
        },
        Value::List(items) => {
            let resolved: Result<Vec<Value>, ParseError> = items
                .iter()
                .map(|item| resolve_value(item, binding_map, depth))
                .collect();
            Ok(Value::List(resolved?))
        }
        Value::Map(map) => {
            let mut resolved = HashMap::new();
            for (k, v) in map {
                resolved.insert(k.clone(), resolve_value(v, binding_map, depth)?);
            }
            Ok(Value::Map(resolved))
        }
        _ => Ok(value.clone()),
    }
}

/// Parse a .bcf file and resolve resource references
pub fn parse_and_resolve(input: &str) -> Result<ParsedFile, ParseError> {
    let mut parsed = parse(input)?;
    resolve_resource_refs(&mut parsed)?;
    Ok(parsed)
}
