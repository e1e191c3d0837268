use std::sync::Arc;

use crate::context::ThreadContext;
use crate::element::{ElementError, PreProcessor};
use crate::template::Template;

/// Sets variables from templates at the start of every iteration.
///
/// Parameters are applied in order, so a later one can reference an earlier one.
#[derive(Debug, Clone)]
pub struct UserParameters {
    name: String,
    params: Vec<(Arc<str>, Template)>,
}

impl UserParameters {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, variable: impl Into<Arc<str>>, template: impl Into<Template>) -> Self {
        self.params.push((variable.into(), template.into()));
        self
    }
}

impl PreProcessor for UserParameters {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, ctx: &mut ThreadContext) -> Result<(), ElementError> {
        for (variable, template) in &self.params {
            let value = template.render(ctx);
            ctx.put(variable.clone(), value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Variables;
    use crate::runner::StopSignal;

    #[test]
    fn later_parameters_see_earlier_ones() {
        let mut ctx = ThreadContext::new(
            Arc::from("g"),
            1,
            0,
            Arc::new(Variables::new()),
            StopSignal::new(),
        );
        let mut params = UserParameters::new("params")
            .with("user", "user-${__threadNum}")
            .with("greeting", "hi ${user}");

        params
            .process(&mut ctx)
            .unwrap_or_else(|e| panic!("process failed: {e}"));
        assert_eq!(ctx.get_str("user"), Some("user-1"));
        assert_eq!(ctx.get_str("greeting"), Some("hi user-1"));
    }
}
