use hammr_value::Value;

use crate::element::{ElementError, Extractor};
use crate::sample::SampleResult;

/// Part of a sample result a [`ResponseExtractor`] reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ResponseField {
    Body,
    Code,
    Message,
    Label,
    Success,
    /// Elapsed time in whole milliseconds.
    Elapsed,
}

impl ResponseField {
    /// Reads this field from `result`; empty text fields read as [`Value::Null`].
    pub fn read(self, result: &SampleResult) -> Value {
        let text = |s: &str| {
            if s.is_empty() {
                Value::Null
            } else {
                Value::from(s)
            }
        };
        match self {
            Self::Body => text(result.response_text().as_ref()),
            Self::Code => text(result.response_code()),
            Self::Message => text(result.response_message()),
            Self::Label => text(result.label()),
            Self::Success => Value::Bool(result.is_success()),
            Self::Elapsed => {
                Value::from(u64::try_from(result.elapsed().as_millis()).unwrap_or(u64::MAX))
            }
        }
    }
}

/// Copies one field of the sample result into a variable.
///
/// An empty string field counts as "no match", so the default (if any) is stored instead.
#[derive(Debug, Clone)]
pub struct ResponseExtractor {
    variable: String,
    field: ResponseField,
    default: Option<Value>,
}

impl ResponseExtractor {
    pub fn new(variable: impl Into<String>, field: ResponseField) -> Self {
        Self {
            variable: variable.into(),
            field,
            default: None,
        }
    }

    #[must_use]
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

impl Extractor for ResponseExtractor {
    fn variable(&self) -> &str {
        &self.variable
    }

    fn extract(&mut self, result: &SampleResult) -> Result<Option<Value>, ElementError> {
        Ok(Some(self.field.read(result)))
    }

    fn default_value(&self) -> Option<Value> {
        self.default.clone()
    }
}
