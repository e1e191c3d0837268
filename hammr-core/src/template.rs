use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::context::ThreadContext;

/// A string with `${name}` references, parsed once and rendered per iteration.
///
/// References resolve against the thread's variables, plus the built-ins `__threadNum`
/// (1-based), `__iteration` (1-based) and `__threadName`. A reference that resolves to
/// nothing is kept verbatim so the gap is visible in the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: Arc<str>,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(String),
}

impl Template {
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(open) = rest.find("${") {
            let after = &rest[open + 2..];
            let Some(close) = after.find('}') else {
                break;
            };
            let name = &after[..close];
            if name.is_empty() {
                push_literal(&mut segments, &rest[..open + 3]);
                rest = &after[1..];
                continue;
            }
            push_literal(&mut segments, &rest[..open]);
            segments.push(Segment::Var(name.to_string()));
            rest = &after[close + 1..];
        }
        push_literal(&mut segments, rest);

        Self {
            source: Arc::from(source),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True when rendering can never differ from the source text.
    pub fn is_static(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Literal(_)))
    }

    pub fn render(&self, ctx: &ThreadContext) -> String {
        if self.is_static() {
            return self.source.to_string();
        }

        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Var(name) => match lookup(name, ctx) {
                    Some(v) => out.push_str(&v),
                    None => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                },
            }
        }
        out
    }
}

fn push_literal(segments: &mut Vec<Segment>, s: &str) {
    if s.is_empty() {
        return;
    }
    if let Some(Segment::Literal(prev)) = segments.last_mut() {
        prev.push_str(s);
    } else {
        segments.push(Segment::Literal(s.to_string()));
    }
}

fn lookup<'a>(name: &str, ctx: &'a ThreadContext) -> Option<Cow<'a, str>> {
    match name {
        "__threadNum" => Some(Cow::Owned(ctx.thread_num().saturating_add(1).to_string())),
        "__iteration" => Some(Cow::Owned(ctx.iteration().saturating_add(1).to_string())),
        "__threadName" => Some(Cow::Borrowed(ctx.thread_name())),
        _ => ctx.get(name).map(|v| match v.as_str() {
            Some(s) => Cow::Borrowed(s),
            None => Cow::Owned(v.to_string()),
        }),
    }
}

impl From<&str> for Template {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<String> for Template {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
