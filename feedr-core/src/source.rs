mod generator;
mod rows;

use std::sync::Arc;

use feedr_value::Value;

use crate::config::{Exclusivity, ExhaustionPolicy, SourceKind};

pub use generator::{
    DateGenerator, FnGenerator, Generators, RandomIntegerGenerator, RandomStringGenerator,
    ValueGenerator,
};
pub(crate) use rows::{load_directory, load_rows, shuffle_rows};

/// Lifecycle of one source instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SourceState {
    #[strum(to_string = "fresh")]
    Fresh,
    #[strum(to_string = "serving")]
    Serving,
    /// Serving again after the cursor wrapped at least once.
    #[strum(to_string = "cycling")]
    Cycling,
    #[strum(to_string = "exhausted")]
    Exhausted,
}

#[derive(Debug, Clone)]
pub enum SourceValues {
    Rows(Arc<[Value]>),

    Range { start: i64, end: i64, step: i64 },

    Counter {
        start: i64,
        step: i64,
        limit: Option<i64>,
    },

    Generator(Arc<dyn ValueGenerator>),
}

impl SourceValues {
    /// Number of values, `None` when unbounded or unknown up front.
    #[must_use]
    pub fn len(&self) -> Option<u64> {
        match self {
            Self::Rows(rows) => Some(rows.len() as u64),
            Self::Range { start, end, step } => Some(range_len(*start, *end, *step)),
            Self::Counter {
                start,
                step,
                limit: Some(limit),
            } => Some(range_len(*start, *limit, *step)),
            Self::Counter { limit: None, .. } | Self::Generator(_) => None,
        }
    }

    fn value_at(&self, index: u64) -> Option<Value> {
        match self {
            Self::Rows(rows) => usize::try_from(index)
                .ok()
                .and_then(|idx| rows.get(idx).cloned()),
            Self::Range { start, step, .. } | Self::Counter { start, step, .. } => {
                if self.len().is_some_and(|len| index >= len) {
                    return None;
                }
                let offset = i64::try_from(index).ok()?.checked_mul(*step)?;
                start.checked_add(offset).map(Value::I64)
            }
            Self::Generator(g) => g.generate(index),
        }
    }
}

fn range_len(start: i64, end: i64, step: i64) -> u64 {
    let (start, end, step) = (i128::from(start), i128::from(end), i128::from(step));
    let span = if step > 0 { end - start } else { start - end };
    if step == 0 || span < 0 {
        return 0;
    }
    let len = span / step.abs() + 1;
    u64::try_from(len).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub values: Vec<Value>,
    /// Set when the request could not be fully satisfied.
    pub exhausted: bool,
}

/// Returned when a source with the `error` policy runs past its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceExhausted;

/// Exclusive instances live only inside the producer; replicated ones are copied per consumer.
#[derive(Debug, Clone)]
pub struct VariableSource {
    name: Arc<str>,
    kind: SourceKind,
    exclusivity: Exclusivity,
    policy: ExhaustionPolicy,
    values: SourceValues,
    cursor: u64,
    state: SourceState,
    served: u64,
}

impl VariableSource {
    pub fn new(
        name: impl Into<Arc<str>>,
        kind: SourceKind,
        exclusivity: Exclusivity,
        policy: ExhaustionPolicy,
        values: SourceValues,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            exclusivity,
            policy,
            values,
            cursor: 0,
            state: SourceState::Fresh,
            served: 0,
        }
    }

    #[must_use]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    #[must_use]
    pub fn exclusivity(&self) -> Exclusivity {
        self.exclusivity
    }

    #[must_use]
    pub fn policy(&self) -> ExhaustionPolicy {
        self.policy
    }

    #[must_use]
    pub fn state(&self) -> SourceState {
        self.state
    }

    #[must_use]
    pub fn served(&self) -> u64 {
        self.served
    }

    #[must_use]
    pub fn len(&self) -> Option<u64> {
        self.values.len()
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.state == SourceState::Exhausted
    }

    #[must_use]
    pub fn fresh_copy(&self) -> Self {
        Self {
            cursor: 0,
            state: SourceState::Fresh,
            served: 0,
            ..self.clone()
        }
    }

    /// Advances the cursor by up to `count` positions.
    pub fn next(&mut self, count: u64) -> Result<Batch, SourceExhausted> {
        if self.state == SourceState::Exhausted {
            return match self.policy {
                ExhaustionPolicy::Error => Err(SourceExhausted),
                ExhaustionPolicy::Cycle | ExhaustionPolicy::Stop => Ok(Batch {
                    values: Vec::new(),
                    exhausted: true,
                }),
            };
        }

        if self.state == SourceState::Fresh {
            self.state = SourceState::Serving;
        }

        let mut values = Vec::with_capacity(usize::try_from(count.min(1024)).unwrap_or(1));
        while (values.len() as u64) < count {
            if let Some(value) = self.values.value_at(self.cursor) {
                values.push(value);
                self.cursor += 1;
                continue;
            }

            match self.policy {
                // An empty source can never satisfy a request, even when cycling.
                ExhaustionPolicy::Cycle if self.cursor > 0 => {
                    self.cursor = 0;
                    self.state = SourceState::Cycling;
                }
                ExhaustionPolicy::Cycle | ExhaustionPolicy::Stop => {
                    self.state = SourceState::Exhausted;
                    self.served += values.len() as u64;
                    return Ok(Batch {
                        values,
                        exhausted: true,
                    });
                }
                ExhaustionPolicy::Error => {
                    self.state = SourceState::Exhausted;
                    return Err(SourceExhausted);
                }
            }
        }

        self.served += values.len() as u64;
        Ok(Batch {
            values,
            exhausted: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: i64, end: i64, policy: ExhaustionPolicy) -> VariableSource {
        VariableSource::new(
            "n",
            SourceKind::NumericRange,
            Exclusivity::Exclusive,
            policy,
            SourceValues::Range {
                start,
                end,
                step: 1,
            },
        )
    }

    fn take_one(src: &mut VariableSource) -> Option<Value> {
        match src.next(1) {
            Ok(batch) => batch.values.into_iter().next(),
            Err(SourceExhausted) => panic!("unexpected exhaustion error"),
        }
    }

    #[test]
    fn cycle_wraps_preserving_order() {
        let mut src = range(1, 2, ExhaustionPolicy::Cycle);
        assert_eq!(src.state(), SourceState::Fresh);

        let got: Vec<Option<Value>> = (0..5).map(|_| take_one(&mut src)).collect();
        let want: Vec<Option<Value>> = [1, 2, 1, 2, 1].into_iter().map(|v| Some(Value::I64(v))).collect();
        assert_eq!(got, want);
        assert_eq!(src.state(), SourceState::Cycling);
    }

    #[test]
    fn cycle_batch_spans_wraps() {
        let mut src = range(1, 3, ExhaustionPolicy::Cycle);
        let batch = match src.next(7) {
            Ok(b) => b,
            Err(_) => panic!("cycle never errors"),
        };
        let got: Vec<i64> = batch.values.iter().filter_map(Value::as_i64).collect();
        assert_eq!(got, vec![1, 2, 3, 1, 2, 3, 1]);
        assert!(!batch.exhausted);
    }

    #[test]
    fn stop_serves_remainder_then_empty() {
        let mut src = range(1, 3, ExhaustionPolicy::Stop);

        let first = match src.next(2) {
            Ok(b) => b,
            Err(_) => panic!("stop never errors"),
        };
        assert_eq!(first.values, vec![Value::I64(1), Value::I64(2)]);
        assert!(!first.exhausted);

        let second = match src.next(2) {
            Ok(b) => b,
            Err(_) => panic!("stop never errors"),
        };
        assert_eq!(second.values, vec![Value::I64(3)]);
        assert!(second.exhausted);
        assert!(src.is_exhausted());

        let third = match src.next(1) {
            Ok(b) => b,
            Err(_) => panic!("stop never errors"),
        };
        assert!(third.values.is_empty());
        assert!(third.exhausted);
        assert_eq!(src.served(), 3);
    }

    #[test]
    fn error_policy_fails_past_end_and_after() {
        let mut src = range(5, 5, ExhaustionPolicy::Error);
        assert_eq!(take_one(&mut src), Some(Value::I64(5)));
        assert_eq!(src.next(1), Err(SourceExhausted));
        assert_eq!(src.next(1), Err(SourceExhausted));
        assert_eq!(src.state(), SourceState::Exhausted);
    }

    #[test]
    fn empty_cycle_source_is_exhausted_not_stuck() {
        let mut src = VariableSource::new(
            "empty",
            SourceKind::SequentialReader,
            Exclusivity::Exclusive,
            ExhaustionPolicy::Cycle,
            SourceValues::Rows(Arc::from(Vec::<Value>::new())),
        );
        match src.next(3) {
            Ok(batch) => {
                assert!(batch.values.is_empty());
                assert!(batch.exhausted);
            }
            Err(_) => panic!("cycle never errors"),
        }
    }

    #[test]
    fn descending_range_and_counter_limit() {
        assert_eq!(
            SourceValues::Range {
                start: 10,
                end: 1,
                step: -3
            }
            .len(),
            Some(4)
        );
        assert_eq!(
            SourceValues::Counter {
                start: 0,
                step: 5,
                limit: Some(12)
            }
            .len(),
            Some(3)
        );
        assert_eq!(
            SourceValues::Counter {
                start: 0,
                step: 1,
                limit: None
            }
            .len(),
            None
        );
    }

    #[test]
    fn fresh_copy_rewinds() {
        let mut src = range(1, 2, ExhaustionPolicy::Stop);
        let _ = take_one(&mut src);
        let copy = src.fresh_copy();
        assert_eq!(copy.state(), SourceState::Fresh);
        assert_eq!(copy.served(), 0);
    }
}
