//! Parsed, comparable path addressing over an instance [`crate::Tree`].
//!
//! A JSON-Pointer-style token tape, extended with YANG list-key predicates
//! instead of plain array indices: `/m:interfaces/interface[name='eth0']/enabled`.

use std::fmt::Display;
use tinyvec::TinyVec;

/// A single step of a [`Pointer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A container or list node, addressed by its local name (module-qualified
    /// only at the root: `m:interfaces`).
    Property(String),
    /// A list entry, addressed by its full key predicate: `[name='eth0']`
    /// may carry more than one key for multi-key lists.
    Predicate(Vec<(String, String)>),
    /// A leaf-list entry, addressed by its value: `[.='1.2.3.4']`.
    LeafListValue(String),
    /// A positional index into a list or leaf-list (used for newly created,
    /// not-yet-keyed entries and for `move` anchors).
    Index(usize),
    /// `FIRST`/append position, or the JSON-Pointer `-` token.
    NextIndex,
}

/// A parsed, owned path. Cheap to clone; small paths do not allocate on the
/// heap thanks to the inline-capacity `TinyVec` backing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pointer(TinyVec<[Token; 4]>);

impl Pointer {
    pub fn root() -> Pointer {
        Pointer(TinyVec::new())
    }

    pub fn push(&mut self, token: Token) -> &mut Self {
        self.0.push(token);
        self
    }

    pub fn pushed(mut self, token: Token) -> Self {
        self.0.push(token);
        self
    }

    pub fn pop(&mut self) -> Option<Token> {
        self.0.pop()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Token> {
        self.0.iter()
    }

    pub fn last(&self) -> Option<&Token> {
        self.0.last()
    }

    /// The parent pointer, or `None` at the root.
    pub fn parent(&self) -> Option<Pointer> {
        if self.0.is_empty() {
            return None;
        }
        let mut p = self.clone();
        p.pop();
        Some(p)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Parses a `/`-separated xpath-ish string. Supports a single `[k=v,...]`
    /// predicate per step and bare `[N]` positional steps.
    pub fn parse(s: &str) -> Result<Pointer, ParseError> {
        let mut ptr = Pointer::root();
        let s = s.trim();
        if s.is_empty() || s == "/" {
            return Ok(ptr);
        }
        for step in s.split('/').filter(|s| !s.is_empty()) {
            let (name, preds) = split_predicate(step)?;
            if !name.is_empty() {
                ptr.push(Token::Property(name.to_string()));
            }
            if let Some(preds) = preds {
                if preds == "-" {
                    ptr.push(Token::NextIndex);
                } else if let Ok(ix) = preds.parse::<usize>() {
                    ptr.push(Token::Index(ix));
                } else if preds.starts_with(".=") {
                    ptr.push(Token::LeafListValue(unquote(&preds[2..])));
                } else {
                    let mut kvs = Vec::new();
                    for kv in preds.split(",") {
                        let (k, v) = kv
                            .split_once('=')
                            .ok_or_else(|| ParseError::BadPredicate(step.to_string()))?;
                        kvs.push((k.trim().to_string(), unquote(v.trim())));
                    }
                    ptr.push(Token::Predicate(kvs));
                }
            }
        }
        Ok(ptr)
    }
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
        || (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

fn split_predicate(step: &str) -> Result<(&str, Option<&str>), ParseError> {
    match step.find('[') {
        None => Ok((step, None)),
        Some(start) => {
            if !step.ends_with(']') {
                return Err(ParseError::BadPredicate(step.to_string()));
            }
            Ok((&step[..start], Some(&step[start + 1..step.len() - 1])))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed predicate in path step {0:?}")]
    BadPredicate(String),
}

impl Display for Pointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_root() {
            return write!(f, "/");
        }
        for token in self.iter() {
            match token {
                Token::Property(name) => write!(f, "/{name}")?,
                Token::Predicate(kvs) => {
                    write!(f, "[")?;
                    for (i, (k, v)) in kvs.iter().enumerate() {
                        if i > 0 {
                            write!(f, ",")?;
                        }
                        write!(f, "{k}='{v}'")?;
                    }
                    write!(f, "]")?;
                }
                Token::LeafListValue(v) => write!(f, "[.='{v}']")?,
                Token::Index(ix) => write!(f, "[{ix}]")?,
                Token::NextIndex => write!(f, "[-]")?,
            }
        }
        Ok(())
    }
}

impl<S: AsRef<str>> TryFrom<S> for Pointer {
    type Error = ParseError;

    fn try_from(s: S) -> Result<Self, Self::Error> {
        Pointer::parse(s.as_ref())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        for case in [
            "/",
            "/m:interfaces",
            "/m:interfaces/interface[name='eth0']",
            "/m:interfaces/interface[name='eth0']/enabled",
            "/m:interfaces/interface[name='eth0',vlan='10']/enabled",
            "/m:list/entry[-]",
            "/m:list/entry[3]",
            "/m:leaflist[.='1.2.3.4']",
        ] {
            let ptr = Pointer::parse(case).unwrap();
            assert_eq!(ptr.to_string(), case, "case={case}");
        }
    }

    #[test]
    fn test_parent() {
        let ptr = Pointer::parse("/m:interfaces/interface[name='eth0']/enabled").unwrap();
        let parent = ptr.parent().unwrap();
        assert_eq!(parent.to_string(), "/m:interfaces/interface[name='eth0']");
        assert_eq!(parent.parent().unwrap().to_string(), "/m:interfaces");
        assert_eq!(parent.parent().unwrap().parent().unwrap().to_string(), "/");
        assert!(parent.parent().unwrap().parent().unwrap().is_root());
    }

    #[test]
    fn test_bad_predicate() {
        assert!(Pointer::parse("/m:list/entry[name").is_err());
    }
}
