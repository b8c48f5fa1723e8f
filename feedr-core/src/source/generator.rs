use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use chrono::format::{Item, StrftimeItems};
use feedr_value::Value;
use rand::Rng;

use crate::error::{Error, Result};

/// Pluggable value computation for date and custom sources.
pub trait ValueGenerator: Send + Sync + fmt::Debug {
    /// Value at position `index` of the sequence, `None` once the sequence is over.
    ///
    /// Infinite generators never return `None`. Stateless generators may ignore `index`.
    fn generate(&self, index: u64) -> Option<Value>;
}

/// Wraps a closure as a generator.
pub struct FnGenerator<F> {
    name: &'static str,
    f: F,
}

impl<F> FnGenerator<F>
where
    F: Fn(u64) -> Option<Value> + Send + Sync + 'static,
{
    pub fn new(name: &'static str, f: F) -> Self {
        Self { name, f }
    }
}

impl<F> fmt::Debug for FnGenerator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnGenerator")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<F> ValueGenerator for FnGenerator<F>
where
    F: Fn(u64) -> Option<Value> + Send + Sync + 'static,
{
    fn generate(&self, index: u64) -> Option<Value> {
        (self.f)(index)
    }
}

/// Named generators that `custom` declarations may refer to.
#[derive(Debug, Clone, Default)]
pub struct Generators {
    map: AHashMap<String, Arc<dyn ValueGenerator>>,
}

impl Generators {
    pub fn register(&mut self, name: impl Into<String>, generator: Arc<dyn ValueGenerator>) {
        self.map.insert(name.into(), generator);
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, generator: Arc<dyn ValueGenerator>) -> Self {
        self.register(name, generator);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ValueGenerator>> {
        self.map.get(name).cloned()
    }
}

/// Current local date/time, shifted by `offset`, rendered with a strftime format.
#[derive(Debug)]
pub struct DateGenerator {
    format: String,
    offset: chrono::TimeDelta,
}

impl DateGenerator {
    pub fn new(format: &str, offset: Option<Duration>) -> Result<Self> {
        if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
            return Err(Error::Configuration(format!(
                "invalid date format `{format}`"
            )));
        }

        let offset = match offset {
            Some(d) => chrono::TimeDelta::from_std(d).map_err(|_| {
                Error::Configuration(format!("date offset {d:?} is out of range"))
            })?,
            None => chrono::TimeDelta::zero(),
        };

        Ok(Self {
            format: format.to_string(),
            offset,
        })
    }
}

impl ValueGenerator for DateGenerator {
    fn generate(&self, _index: u64) -> Option<Value> {
        let now = chrono::Local::now() + self.offset;
        Some(Value::from(now.format(&self.format).to_string()))
    }
}

#[derive(Debug)]
pub struct RandomIntegerGenerator {
    min: i64,
    max: i64,
}

impl RandomIntegerGenerator {
    pub fn new(min: i64, max: i64) -> Result<Self> {
        if min > max {
            return Err(Error::Configuration(format!(
                "random-integer min ({min}) must be <= max ({max})"
            )));
        }
        Ok(Self { min, max })
    }
}

impl ValueGenerator for RandomIntegerGenerator {
    fn generate(&self, _index: u64) -> Option<Value> {
        Some(Value::I64(rand::rng().random_range(self.min..=self.max)))
    }
}

const DEFAULT_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug)]
pub struct RandomStringGenerator {
    length: usize,
    alphabet: Vec<char>,
}

impl RandomStringGenerator {
    pub fn new(length: usize, alphabet: Option<&str>) -> Result<Self> {
        let alphabet: Vec<char> = alphabet.unwrap_or(DEFAULT_ALPHABET).chars().collect();
        if length == 0 || alphabet.is_empty() {
            return Err(Error::Configuration(
                "random-string needs a positive length and a non-empty alphabet".to_string(),
            ));
        }
        Ok(Self { length, alphabet })
    }
}

impl ValueGenerator for RandomStringGenerator {
    fn generate(&self, _index: u64) -> Option<Value> {
        let mut rng = rand::rng();
        let s: String = (0..self.length)
            .map(|_| self.alphabet[rng.random_range(0..self.alphabet.len())])
            .collect();
        Some(Value::from(s))
    }
}
