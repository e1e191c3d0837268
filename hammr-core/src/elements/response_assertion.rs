use crate::context::ThreadContext;
use crate::element::{Assertion, AssertionFailure};
use crate::elements::ResponseField;
use crate::sample::SampleResult;
use crate::template::Template;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    Contains,
    Equals,
}

/// Checks one field of the sample result against a pattern.
///
/// The pattern is a template, so it can refer to thread variables. With `negate` the
/// assertion passes only when the rule does not hold.
#[derive(Debug, Clone)]
pub struct ResponseAssertion {
    name: String,
    field: ResponseField,
    rule: Rule,
    pattern: Template,
    negate: bool,
}

impl ResponseAssertion {
    /// Passes when `field` contains `pattern`.
    pub fn contains(field: ResponseField, pattern: impl Into<Template>) -> Self {
        Self::new(field, Rule::Contains, pattern.into())
    }

    /// Passes when `field` is exactly `pattern`.
    pub fn equals(field: ResponseField, pattern: impl Into<Template>) -> Self {
        Self::new(field, Rule::Equals, pattern.into())
    }

    fn new(field: ResponseField, rule: Rule, pattern: Template) -> Self {
        Self {
            name: "Response Assertion".to_string(),
            field,
            rule,
            pattern,
            negate: false,
        }
    }

    #[must_use]
    pub fn negate(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Assertion for ResponseAssertion {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(
        &mut self,
        result: &SampleResult,
        ctx: &ThreadContext,
    ) -> Result<(), AssertionFailure> {
        let actual = self.field.read(result).to_string();
        let expected = self.pattern.render(ctx);

        let holds = match self.rule {
            Rule::Contains => actual.contains(expected.as_str()),
            Rule::Equals => actual == expected,
        };
        if holds != self.negate {
            return Ok(());
        }

        let verb = match (self.rule, self.negate) {
            (Rule::Contains, false) => "to contain",
            (Rule::Contains, true) => "not to contain",
            (Rule::Equals, false) => "to equal",
            (Rule::Equals, true) => "not to equal",
        };
        Err(AssertionFailure(format!(
            "expected {} {verb} `{expected}`, got `{actual}`",
            self.field
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Variables;
    use crate::runner::StopSignal;
    use crate::sample::SampleTimer;
    use std::sync::Arc;

    fn ctx() -> ThreadContext {
        let vars: Variables = [("code", "201")].into_iter().collect();
        ThreadContext::new(Arc::from("g"), 1, 0, Arc::new(vars), StopSignal::new())
    }

    fn result() -> SampleResult {
        SampleResult::builder("login")
            .response_code("201")
            .response_data("welcome back, alice")
            .finish(SampleTimer::start())
    }

    #[test]
    fn contains_and_equals_render_the_pattern() {
        let ctx = ctx();
        let mut body = ResponseAssertion::contains(ResponseField::Body, "alice");
        let mut code = ResponseAssertion::equals(ResponseField::Code, "${code}");

        assert_eq!(body.check(&result(), &ctx), Ok(()));
        assert_eq!(code.check(&result(), &ctx), Ok(()));
    }

    #[test]
    fn mismatch_names_the_field_and_both_values() {
        let mut a = ResponseAssertion::equals(ResponseField::Code, "200");
        let err = match a.check(&result(), &ctx()) {
            Ok(()) => panic!("expected a failure"),
            Err(err) => err,
        };
        assert_eq!(err.to_string(), "expected code to equal `200`, got `201`");
    }

    #[test]
    fn negate_inverts_the_rule() {
        let ctx = ctx();
        let mut no_error = ResponseAssertion::contains(ResponseField::Body, "error").negate();
        assert_eq!(no_error.check(&result(), &ctx), Ok(()));

        let mut no_alice = ResponseAssertion::contains(ResponseField::Body, "alice").negate();
        assert!(no_alice.check(&result(), &ctx).is_err());
    }

    #[test]
    fn empty_field_reads_as_empty_text() {
        let mut a = ResponseAssertion::equals(ResponseField::Message, "");
        assert_eq!(a.check(&result(), &ctx()), Ok(()));
    }
}
