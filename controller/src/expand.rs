use crate::error::{ErrorList, ValidationError};
use serde_json::{Map, Value};

/// The map key whose expanded value is merged into the surrounding map instead of nested
/// under the key. Sibling keys override the inlined ones.
pub const INLINE_KEYWORD: &str = "${inline}";

/// Resolves a variable name (already stripped of its prefix) to a value.
pub type Resolver<'a> = dyn Fn(&str) -> Result<Value, ValidationError> + 'a;

/// Combines two values where `winner` comes from a more specific source. Maps are merged
/// recursively with the winner's entries taking precedence; lists and scalars from the
/// winner replace the loser outright. `Null` on either side yields the other value.
pub fn merge(winner: Value, loser: Value) -> Value {
    match (winner, loser) {
        (Value::Null, loser) => loser,
        (winner, Value::Null) => winner,
        (Value::Object(winner), Value::Object(loser)) => {
            let mut merged = loser;
            for (key, value) in winner {
                let value = match merged.remove(&key) {
                    Some(existing) => merge(value, existing),
                    None => value,
                };
                merged.insert(key, value);
            }
            Value::Object(merged)
        }
        (winner, _) => winner,
    }
}

/// Variable names may contain dots for path traversal but must start with a letter.
fn valid_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

struct CharIter {
    chars: Vec<char>,
    pos: usize,
}

impl CharIter {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
        }
    }

    fn has_next(&self) -> bool {
        self.pos < self.chars.len()
    }

    fn next_char(&mut self) -> Option<char> {
        let item = self.chars.get(self.pos).copied();
        self.pos += 1;
        item
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }
}

/// Accumulates parsed output. A lone variable keeps the type of its resolved value; as soon
/// as anything is concatenated to it, everything collapses to text.
enum Fragment {
    Empty,
    Single(Value),
    Text(String),
}

impl Fragment {
    fn push_char(self, c: char) -> Fragment {
        match self {
            Fragment::Empty => Fragment::Text(c.to_string()),
            Fragment::Single(value) => {
                let mut text = stringify(&value);
                text.push(c);
                Fragment::Text(text)
            }
            Fragment::Text(mut text) => {
                text.push(c);
                Fragment::Text(text)
            }
        }
    }

    fn push_value(self, value: Value) -> Fragment {
        match self {
            Fragment::Empty => Fragment::Single(value),
            Fragment::Single(existing) => {
                Fragment::Text(stringify(&existing) + &stringify(&value))
            }
            Fragment::Text(mut text) => {
                text.push_str(&stringify(&value));
                Fragment::Text(text)
            }
        }
    }

    fn into_value(self) -> Value {
        match self {
            Fragment::Empty => Value::String(String::new()),
            Fragment::Single(value) => value,
            Fragment::Text(text) => Value::String(text),
        }
    }

    fn into_text(self) -> String {
        match self {
            Fragment::Empty => String::new(),
            Fragment::Single(value) => stringify(&value),
            Fragment::Text(text) => text,
        }
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

struct Parser<'a> {
    resolver: &'a Resolver<'a>,
    validator: &'a dyn Fn(&str) -> bool,
    original: &'a str,
}

impl Parser<'_> {
    /// Parses free text, replacing `${...}` references and unescaping `$$`. Recoverable
    /// resolution errors are collected so one string reports all its bad references.
    fn parse_text(&self, iter: &mut CharIter) -> Result<Value, ErrorList> {
        let mut errors = ErrorList::new();
        let mut fragment = Fragment::Empty;

        while let Some(current) = iter.next_char() {
            if current == '$' {
                match iter.peek() {
                    Some('$') => {
                        iter.next_char();
                        fragment = fragment.push_char('$');
                        continue;
                    }
                    Some('{') => {
                        iter.next_char();
                        match self.parse_var(iter) {
                            Ok(value) => fragment = fragment.push_value(value),
                            Err(error) => {
                                let recoverable = error.can_recover();
                                errors.push(error);
                                if !recoverable {
                                    return Err(errors);
                                }
                            }
                        }
                        continue;
                    }
                    _ => {}
                }
            }
            fragment = fragment.push_char(current);
        }

        errors.into_result(fragment.into_value())
    }

    /// Parses the inside of a `${...}` reference. The name may itself contain nested
    /// references, which are resolved first and concatenated into the name.
    fn parse_var(&self, iter: &mut CharIter) -> Result<Value, ValidationError> {
        let mut name = Fragment::Empty;

        while let Some(current) = iter.next_char() {
            match current {
                '}' => {
                    let name = name.into_text();
                    if !(self.validator)(&name) {
                        return Err(ValidationError::InvalidVariableName { var_name: name });
                    }
                    return (self.resolver)(&name);
                }
                '$' => match iter.peek() {
                    Some('$') => {
                        iter.next_char();
                        name = name.push_char('$');
                    }
                    Some('{') => {
                        iter.next_char();
                        name = name.push_value(self.parse_var(iter)?);
                    }
                    _ => name = name.push_char('$'),
                },
                other => name = name.push_char(other),
            }
        }

        Err(ValidationError::MissingClosingBracket {
            value: self.original.to_string(),
        })
    }
}

/// Expands `${prefix:name}` references within a single string. The prefix is required: a
/// reference without it fails the parse, which [`SpecExpander`] then uses to decide between
/// "reserved prefix, leave alone" and "unexpected prefix, report".
pub struct VariableExpander<'a> {
    resolver: &'a Resolver<'a>,
    prefix: &'a str,
}

impl<'a> VariableExpander<'a> {
    pub fn new(resolver: &'a Resolver<'a>, prefix: &'a str) -> Self {
        Self { resolver, prefix }
    }

    pub fn expand(&self, src: &str) -> Result<Value, ErrorList> {
        let prefix = self.prefix;
        let resolver = move |name: &str| match name.strip_prefix(prefix) {
            Some(stripped) => (self.resolver)(stripped),
            None => Err(ValidationError::RequiredPrefixMissing {
                prefix: prefix.to_string(),
                var_name: name.to_string(),
            }),
        };
        let validator =
            move |name: &str| valid_variable_name(name.strip_prefix(prefix).unwrap_or(name));
        let parser = Parser {
            resolver: &resolver,
            validator: &validator,
            original: src,
        };
        parser.parse_text(&mut CharIter::new(src))
    }

    /// Whether every reference in `src` parses cleanly under this expander's prefix. No
    /// variables are actually resolved.
    pub fn valid_prefix(&self, src: &str) -> bool {
        let prefix = self.prefix;
        let resolver = move |name: &str| {
            if name.strip_prefix(prefix).is_some() {
                Ok(Value::String(name.to_string()))
            } else {
                Err(ValidationError::RequiredPrefixMissing {
                    prefix: prefix.to_string(),
                    var_name: name.to_string(),
                })
            }
        };
        let validator =
            move |name: &str| valid_variable_name(name.strip_prefix(prefix).unwrap_or(name));
        let parser = Parser {
            resolver: &resolver,
            validator: &validator,
            original: src,
        };
        parser.parse_text(&mut CharIter::new(src)).is_ok()
    }
}

/// Walks an arbitrary JSON document and expands every string in it, handling the
/// [`INLINE_KEYWORD`] and leaving references with a reserved prefix untouched for a later
/// expansion stage. All recoverable problems in the document are reported together.
pub struct SpecExpander<'a> {
    pub resolver: &'a Resolver<'a>,
    pub required_prefix: &'a str,
    pub reserved_prefixes: &'a [&'a str],
}

impl SpecExpander<'_> {
    pub fn expand(&self, spec: &Value) -> Result<Value, ErrorList> {
        self.expand_value(spec)
    }

    fn expand_value(&self, value: &Value) -> Result<Value, ErrorList> {
        match value {
            Value::Object(map) => self.expand_map(map),
            Value::Array(items) => self.expand_list(items),
            Value::String(text) => self.expand_string(text),
            other => Ok(other.clone()),
        }
    }

    fn expand_map(&self, map: &Map<String, Value>) -> Result<Value, ErrorList> {
        let mut errors = ErrorList::new();
        let mut expanded = Map::new();

        // The inline keyword is handled first so sibling keys can override its entries.
        if let Some(inline_value) = map.get(INLINE_KEYWORD) {
            match self.expand_value(inline_value) {
                Err(inline_errors) => {
                    let recoverable = inline_errors.can_recover();
                    errors.extend(inline_errors);
                    if !recoverable {
                        return Err(errors);
                    }
                }
                Ok(Value::String(text)) => {
                    // A still-unexpanded reference with a reserved prefix stays behind for
                    // the next expansion stage.
                    if self.is_reserved_prefix(&text) {
                        expanded.insert(INLINE_KEYWORD.to_string(), Value::String(text));
                    }
                }
                Ok(Value::Object(inline_map)) => {
                    expanded = inline_map;
                }
                Ok(_) => {
                    errors.push(ValidationError::InlineNotAMap);
                    return Err(errors);
                }
            }
        }

        for (key, value) in map {
            if key == INLINE_KEYWORD {
                continue;
            }
            let expanded_value = match self.expand_value(value) {
                Ok(expanded_value) => expanded_value,
                Err(value_errors) => {
                    let recoverable = value_errors.can_recover();
                    errors.extend(value_errors);
                    if !recoverable {
                        return Err(errors);
                    }
                    continue;
                }
            };
            let expanded_value = match (expanded_value, expanded.remove(key)) {
                (Value::Object(new), Some(Value::Object(inlined))) => {
                    merge(Value::Object(new), Value::Object(inlined))
                }
                (new, _) => new,
            };
            expanded.insert(key.clone(), expanded_value);
        }

        errors.into_result(Value::Object(expanded))
    }

    fn expand_list(&self, items: &[Value]) -> Result<Value, ErrorList> {
        let mut errors = ErrorList::new();
        let mut expanded = Vec::with_capacity(items.len());

        for item in items {
            match self.expand_value(item) {
                Ok(value) => expanded.push(value),
                Err(item_errors) => {
                    let recoverable = item_errors.can_recover();
                    errors.extend(item_errors);
                    if !recoverable {
                        return Err(errors);
                    }
                }
            }
        }

        errors.into_result(Value::Array(expanded))
    }

    fn expand_string(&self, text: &str) -> Result<Value, ErrorList> {
        let expander = VariableExpander::new(self.resolver, self.required_prefix);
        match expander.expand(text) {
            Ok(value) => Ok(value),
            Err(mut errors) => {
                if !expander.valid_prefix(text) {
                    if self.is_reserved_prefix(text) {
                        return Ok(Value::String(text.to_string()));
                    }
                    errors.push(ValidationError::UnexpectedPrefix {
                        value: text.to_string(),
                        expected: self.reserved_prefixes.join(", "),
                    });
                }
                Err(errors)
            }
        }
    }

    fn is_reserved_prefix(&self, text: &str) -> bool {
        let pass_through: &Resolver<'_> = &|name: &str| Ok(Value::String(name.to_string()));
        self.reserved_prefixes
            .iter()
            .any(|reserved| VariableExpander::new(pass_through, reserved).valid_prefix(text))
    }
}
