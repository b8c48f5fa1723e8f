use std::fmt::Write as _;
use std::sync::Arc;

use feedr_value::Value;

use crate::consumer::Consumer;
use crate::error::{Error, Result};

/// A `{{ name }}` or `{{ name.field.sub }}` reference inside a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarRef {
    pub name: Arc<str>,
    pub path: Vec<Arc<str>>,
}

impl VarRef {
    fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.split('.').map(str::trim);
        let name = match parts.next() {
            Some(name) if !name.is_empty() => Arc::<str>::from(name),
            _ => {
                return Err(Error::Configuration(format!(
                    "empty variable reference `{{{{{raw}}}}}`"
                )));
            }
        };
        let path: Vec<Arc<str>> = parts.map(Arc::<str>::from).collect();
        if path.iter().any(|p| p.is_empty()) {
            return Err(Error::Configuration(format!(
                "invalid variable reference `{raw}`"
            )));
        }
        Ok(Self { name, path })
    }

    fn select(&self, value: &Value) -> Result<Value> {
        let mut cur = value;
        for field in &self.path {
            cur = cur
                .field(field)
                .ok_or_else(|| Error::UnknownVariable(self.to_string()))?;
        }
        Ok(cur.clone())
    }
}

impl std::fmt::Display for VarRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)?;
        for p in &self.path {
            write!(f, ".{p}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Ref(VarRef),
}

/// A request template with variable substitutions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    parts: Vec<Part>,
}

impl Template {
    pub fn parse(text: &str) -> Result<Self> {
        let mut parts = Vec::new();
        let mut rest = text;

        while let Some(open) = rest.find("{{") {
            if open > 0 {
                parts.push(Part::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 2..];
            let Some(close) = after.find("}}") else {
                return Err(Error::Configuration(format!(
                    "unterminated `{{{{` in template `{text}`"
                )));
            };
            parts.push(Part::Ref(VarRef::parse(after[..close].trim())?));
            rest = &after[close + 2..];
        }
        if !rest.is_empty() {
            parts.push(Part::Literal(rest.to_string()));
        }

        Ok(Self { parts })
    }

    pub fn references(&self) -> impl Iterator<Item = &VarRef> {
        self.parts.iter().filter_map(|p| match p {
            Part::Ref(r) => Some(r),
            Part::Literal(_) => None,
        })
    }

    /// Substitutes every reference through the consumer.
    ///
    /// A variable referenced several times resolves once per iteration (the consumer caches it),
    /// so `{{ books.book }}` and `{{ books.pages }}` come from the same row.
    pub async fn render(&self, consumer: &mut Consumer) -> Result<String> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(s) => out.push_str(s),
                Part::Ref(r) => {
                    let value = consumer.resolve(&r.name).await?;
                    let selected = r.select(&value)?;
                    let _ = write!(out, "{selected}");
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_literals_and_references() {
        let t = match Template::parse("GET /books/{{ books.book }}?n={{n}}") {
            Ok(t) => t,
            Err(err) => panic!("parse: {err}"),
        };

        let refs: Vec<String> = t.references().map(ToString::to_string).collect();
        assert_eq!(refs, vec!["books.book".to_string(), "n".to_string()]);
        assert_eq!(t.parts.len(), 4);
    }

    #[test]
    fn rejects_malformed_references() {
        assert!(matches!(
            Template::parse("x {{ books.book "),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(Template::parse("{{ }}"), Err(Error::Configuration(_))));
        assert!(matches!(
            Template::parse("{{ a..b }}"),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn select_walks_object_fields() {
        let r = match VarRef::parse("books.book") {
            Ok(r) => r,
            Err(err) => panic!("parse: {err}"),
        };
        let row = Value::row([("book", "C"), ("pages", "30")]);
        assert_eq!(r.select(&row).ok(), Some(Value::from("C")));

        let missing = match VarRef::parse("books.isbn") {
            Ok(r) => r,
            Err(err) => panic!("parse: {err}"),
        };
        assert!(matches!(
            missing.select(&row),
            Err(Error::UnknownVariable(name)) if name == "books.isbn"
        ));
    }

    #[test]
    fn plain_text_has_no_references() {
        match Template::parse("GET /health") {
            Ok(t) => assert_eq!(t.references().count(), 0),
            Err(err) => panic!("parse: {err}"),
        }
    }
}
