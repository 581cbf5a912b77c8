//! The parsed representation of a server's schema: attribute-type and
//! object-class definitions keyed by OID, with every NAME alias folded into a
//! secondary name index. This is what gives attribute names their identity -
//! two spellings denote the same attribute iff the schema maps them to the
//! same OID.
//!
//! The raw definitions arrive as RFC 4512 parenthesised strings on the
//! subschema subentry (`attributeTypes`, `objectClasses`); [`Schema::try_from`]
//! consumes such an entry directly.

use std::collections::BTreeSet;
use std::fmt;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use smartstring::alias::String as AttrString;

use crate::constants::{ATTR_ATTRIBUTE_TYPES, ATTR_OBJECT_CLASSES};
use crate::entry::Entry;
use crate::error::SchemaParseError;

/// A dotted-numeric object identifier. Compared structurally; the canonical
/// key wherever attribute or class identity matters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid(String);

impl Oid {
    pub fn new(s: &str) -> Self {
        Oid(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Oid {
    fn from(s: &str) -> Self {
        Oid::new(s)
    }
}

/// One attribute-type definition. Only the fields the toolkit acts on are
/// retained; matching rules and usage are parsed past and dropped.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SchemaAttribute {
    pub oid: Oid,
    /// Every NAME of the definition; the first is the canonical spelling.
    pub names: Vec<AttrString>,
    pub description: String,
    pub syntax: Option<Oid>,
    pub sup: Option<AttrString>,
    pub single_value: bool,
    pub obsolete: bool,
}

impl SchemaAttribute {
    /// The canonical (first listed) name.
    pub fn name(&self) -> &str {
        self.names.first().map(|n| n.as_str()).unwrap_or("")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClassKind {
    Structural,
    Auxiliary,
    Abstract,
}

/// One object-class definition: the MUST and MAY attribute sets, the SUP
/// chain, and the kind.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SchemaClass {
    pub oid: Oid,
    pub names: Vec<AttrString>,
    pub description: String,
    pub kind: ClassKind,
    pub sup: Vec<AttrString>,
    pub must: Vec<AttrString>,
    pub may: Vec<AttrString>,
    pub obsolete: bool,
}

impl SchemaClass {
    pub fn name(&self) -> &str {
        self.names.first().map(|n| n.as_str()).unwrap_or("")
    }
}

/// The two indexes per kind: OID to definition, and folded name (every alias)
/// to OID. Conceptually immutable once built - share it behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    attributes: HashMap<Oid, SchemaAttribute>,
    attribute_names: HashMap<AttrString, Oid>,
    classes: HashMap<Oid, SchemaClass>,
    class_names: HashMap<AttrString, Oid>,
}

fn fold(s: &str) -> AttrString {
    AttrString::from(s.to_lowercase())
}

impl Schema {
    pub fn new(attrs: Vec<SchemaAttribute>, classes: Vec<SchemaClass>) -> Self {
        let mut s = Schema::default();
        for a in attrs {
            for n in a.names.iter() {
                s.attribute_names.insert(fold(n), a.oid.clone());
            }
            s.attributes.insert(a.oid.clone(), a);
        }
        for c in classes {
            for n in c.names.iter() {
                s.class_names.insert(fold(n), c.oid.clone());
            }
            s.classes.insert(c.oid.clone(), c);
        }
        s
    }

    pub fn attr_oid(&self, name: &str) -> Option<&Oid> {
        self.attribute_names.get(&fold(name))
    }

    pub fn attr_def(&self, name: &str) -> Option<&SchemaAttribute> {
        self.attr_oid(name).and_then(|oid| self.attributes.get(oid))
    }

    pub fn attr_def_by_oid(&self, oid: &Oid) -> Option<&SchemaAttribute> {
        self.attributes.get(oid)
    }

    pub fn class_oid(&self, name: &str) -> Option<&Oid> {
        self.class_names.get(&fold(name))
    }

    pub fn class_def(&self, name: &str) -> Option<&SchemaClass> {
        self.class_oid(name).and_then(|oid| self.classes.get(oid))
    }

    pub fn class_def_by_oid(&self, oid: &Oid) -> Option<&SchemaClass> {
        self.classes.get(oid)
    }

    pub fn attr_count(&self) -> usize {
        self.attributes.len()
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// True iff both names resolve and resolve to the same attribute OID.
    /// This is how `uid` and `userID` compare equal.
    pub fn equate_attrs(&self, a: &str, b: &str) -> bool {
        match (self.attr_oid(a), self.attr_oid(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    /// The transitive SUP closure of the named classes, as class OIDs.
    /// Unknown class names are returned separately so the caller can decide
    /// whether they are fatal.
    pub fn sup_closure<'a, I>(&self, classes: I) -> (BTreeSet<Oid>, Vec<String>)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out: BTreeSet<Oid> = BTreeSet::new();
        let mut unknown = Vec::new();
        let mut stack: Vec<String> = classes.into_iter().map(|c| c.to_string()).collect();

        while let Some(name) = stack.pop() {
            match self.class_def(&name) {
                Some(def) => {
                    if out.insert(def.oid.clone()) {
                        for s in def.sup.iter() {
                            stack.push(s.to_string());
                        }
                    }
                }
                None => unknown.push(name),
            }
        }
        (out, unknown)
    }
}

impl TryFrom<&Entry> for Schema {
    type Error = SchemaParseError;

    /// Build a schema from a subschema subentry as returned by the server.
    fn try_from(entry: &Entry) -> Result<Self, Self::Error> {
        let mut attrs = Vec::new();
        if let Some(vs) = entry.get_value(ATTR_ATTRIBUTE_TYPES) {
            for raw in vs.iter() {
                let def = std::str::from_utf8(raw).map_err(|_| {
                    SchemaParseError::InvalidDefinition("attributeTypes value is not utf8".into())
                })?;
                attrs.push(parse_attribute(def)?);
            }
        }

        let mut classes = Vec::new();
        if let Some(vs) = entry.get_value(ATTR_OBJECT_CLASSES) {
            for raw in vs.iter() {
                let def = std::str::from_utf8(raw).map_err(|_| {
                    SchemaParseError::InvalidDefinition("objectClasses value is not utf8".into())
                })?;
                classes.push(parse_class(def)?);
            }
        }

        trace!(
            attributes = attrs.len(),
            classes = classes.len(),
            "parsed subschema"
        );
        Ok(Schema::new(attrs, classes))
    }
}

// ===== the RFC 4512 definition parser =====

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    Dollar,
    Word(String),
}

fn tokenize(def: &str) -> Result<Vec<Token>, SchemaParseError> {
    let mut out = Vec::new();
    let mut chars = def.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '(' => out.push(Token::LParen),
            ')' => out.push(Token::RParen),
            '$' => out.push(Token::Dollar),
            '\'' => {
                let mut w = String::new();
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(q) => w.push(q),
                        None => {
                            return Err(SchemaParseError::InvalidDefinition(format!(
                                "unterminated quoted string in {def:?}"
                            )))
                        }
                    }
                }
                out.push(Token::Word(w));
            }
            c if c.is_whitespace() => {}
            c => {
                let mut w = String::new();
                w.push(c);
                while let Some(&n) = chars.peek() {
                    if n.is_whitespace() || n == '(' || n == ')' || n == '$' {
                        break;
                    }
                    w.push(n);
                    chars.next();
                }
                out.push(Token::Word(w));
            }
        }
    }
    Ok(out)
}

struct Tokens {
    toks: Vec<Token>,
    pos: usize,
}

impl Tokens {
    fn next(&mut self) -> Option<Token> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn peek(&self) -> Option<&Token> {
        self.toks.get(self.pos)
    }

    /// A single word, or a parenthesised `$`/space separated list of words.
    fn name_list(&mut self, def: &str) -> Result<Vec<String>, SchemaParseError> {
        match self.next() {
            Some(Token::Word(w)) => Ok(vec![w]),
            Some(Token::LParen) => {
                let mut out = Vec::new();
                loop {
                    match self.next() {
                        Some(Token::Word(w)) => out.push(w),
                        Some(Token::Dollar) => {}
                        Some(Token::RParen) => break,
                        _ => {
                            return Err(SchemaParseError::InvalidDefinition(format!(
                                "unterminated list in {def:?}"
                            )))
                        }
                    }
                }
                Ok(out)
            }
            _ => Err(SchemaParseError::InvalidDefinition(format!(
                "expected name or list in {def:?}"
            ))),
        }
    }

    /// Skip the value of a keyword we carry no state for.
    fn skip_value(&mut self) {
        match self.peek() {
            Some(Token::LParen) => {
                let mut depth = 0;
                while let Some(t) = self.next() {
                    match t {
                        Token::LParen => depth += 1,
                        Token::RParen => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                }
            }
            Some(Token::Word(_)) => {
                self.next();
            }
            _ => {}
        }
    }
}

fn open_definition(def: &str) -> Result<(Tokens, Oid), SchemaParseError> {
    let toks = tokenize(def)?;
    let mut t = Tokens { toks, pos: 0 };
    match t.next() {
        Some(Token::LParen) => {}
        _ => {
            return Err(SchemaParseError::InvalidDefinition(format!(
                "definition must open with '(' - {def:?}"
            )))
        }
    }
    let oid = match t.next() {
        Some(Token::Word(w)) => Oid::new(&w),
        _ => return Err(SchemaParseError::MissingOid(def.to_string())),
    };
    Ok((t, oid))
}

/// Parse one `attributeTypes` value.
pub fn parse_attribute(def: &str) -> Result<SchemaAttribute, SchemaParseError> {
    let (mut t, oid) = open_definition(def)?;

    let mut attr = SchemaAttribute {
        oid,
        names: Vec::new(),
        description: String::new(),
        syntax: None,
        sup: None,
        single_value: false,
        obsolete: false,
    };

    while let Some(tok) = t.next() {
        let kw = match tok {
            Token::RParen => break,
            Token::Word(w) => w.to_uppercase(),
            _ => continue,
        };
        match kw.as_str() {
            "NAME" => {
                attr.names = t.name_list(def)?.into_iter().map(AttrString::from).collect()
            }
            "DESC" => {
                if let Some(Token::Word(w)) = t.next() {
                    attr.description = w;
                }
            }
            "OBSOLETE" => attr.obsolete = true,
            "SUP" => {
                if let Some(Token::Word(w)) = t.next() {
                    attr.sup = Some(AttrString::from(w));
                }
            }
            "SYNTAX" => {
                if let Some(Token::Word(w)) = t.next() {
                    // Strip any {len} bound from the syntax OID.
                    let bare = w.split('{').next().unwrap_or(&w);
                    attr.syntax = Some(Oid::new(bare));
                }
            }
            "SINGLE-VALUE" => attr.single_value = true,
            "COLLECTIVE" | "NO-USER-MODIFICATION" => {}
            "EQUALITY" | "ORDERING" | "SUBSTR" | "USAGE" => t.skip_value(),
            _ => t.skip_value(),
        }
    }

    Ok(attr)
}

/// Parse one `objectClasses` value.
pub fn parse_class(def: &str) -> Result<SchemaClass, SchemaParseError> {
    let (mut t, oid) = open_definition(def)?;

    let mut class = SchemaClass {
        oid,
        names: Vec::new(),
        description: String::new(),
        kind: ClassKind::Structural,
        sup: Vec::new(),
        must: Vec::new(),
        may: Vec::new(),
        obsolete: false,
    };

    while let Some(tok) = t.next() {
        let kw = match tok {
            Token::RParen => break,
            Token::Word(w) => w.to_uppercase(),
            _ => continue,
        };
        match kw.as_str() {
            "NAME" => {
                class.names = t.name_list(def)?.into_iter().map(AttrString::from).collect()
            }
            "DESC" => {
                if let Some(Token::Word(w)) = t.next() {
                    class.description = w;
                }
            }
            "OBSOLETE" => class.obsolete = true,
            "SUP" => {
                class.sup = t.name_list(def)?.into_iter().map(AttrString::from).collect()
            }
            "STRUCTURAL" => class.kind = ClassKind::Structural,
            "AUXILIARY" => class.kind = ClassKind::Auxiliary,
            "ABSTRACT" => class.kind = ClassKind::Abstract,
            "MUST" => {
                class.must = t.name_list(def)?.into_iter().map(AttrString::from).collect()
            }
            "MAY" => {
                class.may = t.name_list(def)?.into_iter().map(AttrString::from).collect()
            }
            _ => t.skip_value(),
        }
    }

    Ok(class)
}
