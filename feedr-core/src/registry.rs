use std::path::PathBuf;
use std::sync::Arc;

use ahash::AHashMap;

use crate::config::{Exclusivity, SourceConfig, VariableDecl};
use crate::error::{Error, Result};
use crate::source::{
    DateGenerator, Generators, RandomIntegerGenerator, RandomStringGenerator, SourceValues,
    VariableSource, load_directory, load_rows, shuffle_rows,
};
use crate::template::Template;

/// Inputs needed to turn declarations into sources.
#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    /// Relative file paths in declarations are resolved against this directory.
    pub base_dir: Option<PathBuf>,

    /// Run-wide shuffle seed, used when a declaration has none.
    pub seed: Option<u64>,

    pub generators: Generators,
}

/// Declared variable names mapped to configured (fresh) source instances.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    sources: AHashMap<Arc<str>, VariableSource>,
    order: Vec<Arc<str>>,
}

impl Registry {
    /// Builds every declared source. Record sets are read here, once.
    pub fn from_decls(decls: &[VariableDecl], opts: &RegistryOptions) -> Result<Self> {
        let mut registry = Self::default();
        for decl in decls {
            validate_name(&decl.name)?;
            if registry.sources.contains_key(decl.name.as_str()) {
                return Err(Error::Configuration(format!(
                    "variable `{}` is declared more than once",
                    decl.name
                )));
            }

            let source = build_source(decl, opts)?;
            tracing::debug!(
                variable = %decl.name,
                kind = %source.kind(),
                exclusivity = %source.exclusivity(),
                policy = %source.policy(),
                "configured variable"
            );

            let name = source.name().clone();
            registry.order.push(name.clone());
            registry.sources.insert(name, source);
        }
        Ok(registry)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&VariableSource> {
        self.sources.get(name)
    }

    pub fn exclusivity(&self, name: &str) -> Result<Exclusivity> {
        self.get(name)
            .map(VariableSource::exclusivity)
            .ok_or_else(|| Error::UnknownVariable(name.to_string()))
    }

    /// A fresh instance with its own cursor.
    #[must_use]
    pub fn instantiate(&self, name: &str) -> Option<VariableSource> {
        self.get(name).map(VariableSource::fresh_copy)
    }

    /// Sources in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &VariableSource> {
        self.order.iter().filter_map(|name| self.sources.get(name))
    }

    pub fn exclusive(&self) -> impl Iterator<Item = &VariableSource> {
        self.iter()
            .filter(|s| s.exclusivity() == Exclusivity::Exclusive)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Fails on the first reference to an unregistered variable.
    pub fn check_template(&self, template: &Template) -> Result<()> {
        for reference in template.references() {
            if !self.sources.contains_key(&*reference.name) {
                return Err(Error::UnknownVariable(reference.name.to_string()));
            }
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::Configuration(format!(
            "invalid variable name `{name}` (use letters, digits, `_` or `-`)"
        )))
    }
}

fn build_source(decl: &VariableDecl, opts: &RegistryOptions) -> Result<VariableSource> {
    let kind = decl.source.kind();
    let exclusivity = match decl.exclusivity.or_else(|| kind.default_exclusivity()) {
        Some(e) => e,
        None => {
            return Err(Error::Configuration(format!(
                "variable `{}`: {kind} sources must declare `exclusivity`",
                decl.name
            )));
        }
    };
    let base_dir = opts.base_dir.as_deref();

    let values = match &decl.source {
        SourceConfig::SequentialReader(cfg) => {
            let mut rows = load_rows(cfg, base_dir)?;
            if rows.is_empty() {
                return Err(Error::Configuration(format!(
                    "variable `{}`: record set is empty",
                    decl.name
                )));
            }
            if cfg.random {
                shuffle_rows(&mut rows, cfg.seed.or(opts.seed));
            }
            SourceValues::Rows(Arc::from(rows))
        }
        SourceConfig::DirectoryContents { path, random, seed } => {
            let mut rows = load_directory(path, base_dir)?;
            if rows.is_empty() {
                return Err(Error::Configuration(format!(
                    "variable `{}`: directory `{}` has no files",
                    decl.name,
                    path.display()
                )));
            }
            if *random {
                shuffle_rows(&mut rows, seed.or(opts.seed));
            }
            SourceValues::Rows(Arc::from(rows))
        }
        SourceConfig::NumericRange { start, end, step } => {
            let values = SourceValues::Range {
                start: *start,
                end: *end,
                step: *step,
            };
            if values.len() == Some(0) {
                return Err(Error::Configuration(format!(
                    "variable `{}`: range {start}..={end} step {step} is empty",
                    decl.name
                )));
            }
            values
        }
        SourceConfig::Counter { start, step, limit } => {
            if *step == 0 {
                return Err(Error::Configuration(format!(
                    "variable `{}`: counter step must not be 0",
                    decl.name
                )));
            }
            SourceValues::Counter {
                start: *start,
                step: *step,
                limit: *limit,
            }
        }
        SourceConfig::Date { format, offset } => {
            SourceValues::Generator(Arc::new(DateGenerator::new(format, *offset)?))
        }
        SourceConfig::RandomInteger { min, max } => {
            SourceValues::Generator(Arc::new(RandomIntegerGenerator::new(*min, *max)?))
        }
        SourceConfig::RandomString { length, alphabet } => SourceValues::Generator(Arc::new(
            RandomStringGenerator::new(*length, alphabet.as_deref())?,
        )),
        SourceConfig::Custom { generator } => match opts.generators.get(generator) {
            Some(g) => SourceValues::Generator(g),
            None => {
                return Err(Error::Configuration(format!(
                    "variable `{}`: unsupported kind `custom:{generator}` (no such generator)",
                    decl.name
                )));
            }
        },
    };

    Ok(VariableSource::new(
        decl.name.as_str(),
        kind,
        exclusivity,
        decl.exhaustion,
        values,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExhaustionPolicy, ReaderConfig, SourceKind};
    use crate::source::FnGenerator;
    use feedr_value::Value;

    fn decl(name: &str, source: SourceConfig) -> VariableDecl {
        VariableDecl {
            name: name.to_string(),
            exclusivity: None,
            exhaustion: ExhaustionPolicy::Stop,
            source,
        }
    }

    fn range(start: i64, end: i64) -> SourceConfig {
        SourceConfig::NumericRange {
            start,
            end,
            step: 1,
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let decls = vec![decl("n", range(1, 2)), decl("n", range(3, 4))];
        match Registry::from_decls(&decls, &RegistryOptions::default()) {
            Err(Error::Configuration(msg)) => assert!(msg.contains("more than once")),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_custom_generator_is_unsupported() {
        let mut d = decl(
            "c",
            SourceConfig::Custom {
                generator: "nope".to_string(),
            },
        );
        d.exclusivity = Some(Exclusivity::Exclusive);
        match Registry::from_decls(&[d], &RegistryOptions::default()) {
            Err(Error::Configuration(msg)) => assert!(msg.contains("unsupported kind")),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn custom_sources_must_declare_exclusivity() {
        let opts = RegistryOptions {
            generators: Generators::default().with(
                "ids",
                Arc::new(FnGenerator::new("ids", |i| Some(Value::I64(i as i64)))),
            ),
            ..RegistryOptions::default()
        };

        let d = decl(
            "c",
            SourceConfig::Custom {
                generator: "ids".to_string(),
            },
        );
        assert!(matches!(
            Registry::from_decls(std::slice::from_ref(&d), &opts),
            Err(Error::Configuration(_))
        ));

        let mut d = d;
        d.exclusivity = Some(Exclusivity::Replicated);
        let registry = match Registry::from_decls(&[d], &opts) {
            Ok(r) => r,
            Err(err) => panic!("registry: {err}"),
        };
        assert_eq!(registry.exclusivity("c").ok(), Some(Exclusivity::Replicated));
        assert_eq!(registry.get("c").map(|s| s.kind()), Some(SourceKind::Custom));
    }

    #[test]
    fn defaults_and_lookup() {
        let decls = vec![
            decl(
                "books",
                SourceConfig::SequentialReader(ReaderConfig {
                    rows: vec![Value::row([("book", "A")])],
                    ..ReaderConfig::default()
                }),
            ),
            decl(
                "today",
                SourceConfig::Date {
                    format: "%Y".to_string(),
                    offset: None,
                },
            ),
        ];
        let registry = match Registry::from_decls(&decls, &RegistryOptions::default()) {
            Ok(r) => r,
            Err(err) => panic!("registry: {err}"),
        };

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.exclusivity("books").ok(), Some(Exclusivity::Exclusive));
        assert_eq!(registry.exclusivity("today").ok(), Some(Exclusivity::Replicated));
        assert!(matches!(
            registry.exclusivity("missing"),
            Err(Error::UnknownVariable(_))
        ));

        let exclusive: Vec<&str> = registry.exclusive().map(|s| &**s.name()).collect();
        assert_eq!(exclusive, vec!["books"]);
    }

    #[test]
    fn invalid_declarations() {
        let opts = RegistryOptions::default();
        assert!(Registry::from_decls(&[decl("bad.name", range(1, 2))], &opts).is_err());
        assert!(Registry::from_decls(&[decl("r", range(2, 1))], &opts).is_err());
        assert!(
            Registry::from_decls(
                &[decl(
                    "e",
                    SourceConfig::SequentialReader(ReaderConfig::default())
                )],
                &opts
            )
            .is_err()
        );
        assert!(
            Registry::from_decls(
                &[decl(
                    "c",
                    SourceConfig::Counter {
                        start: 1,
                        step: 0,
                        limit: None
                    }
                )],
                &opts
            )
            .is_err()
        );
    }

    #[test]
    fn seeded_shuffle_uses_run_seed() {
        let rows: Vec<Value> = (0..20).map(Value::I64).collect();
        let decls = vec![decl(
            "ids",
            SourceConfig::SequentialReader(ReaderConfig {
                rows: rows.clone(),
                random: true,
                ..ReaderConfig::default()
            }),
        )];
        let opts = RegistryOptions {
            seed: Some(9),
            ..RegistryOptions::default()
        };

        let take_all = |registry: &Registry| -> Vec<Value> {
            let mut src = match registry.instantiate("ids") {
                Some(s) => s,
                None => panic!("missing source"),
            };
            match src.next(20) {
                Ok(batch) => batch.values,
                Err(_) => panic!("stop policy never errors"),
            }
        };

        let a = match Registry::from_decls(&decls, &opts) {
            Ok(r) => take_all(&r),
            Err(err) => panic!("registry: {err}"),
        };
        let b = match Registry::from_decls(&decls, &opts) {
            Ok(r) => take_all(&r),
            Err(err) => panic!("registry: {err}"),
        };
        assert_eq!(a, b);
        assert_ne!(a, rows);
    }
}
