use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use hammr_core::elements::{
    ConstantTimer, Counter, DummySampler, ResponseAssertion, ResponseExtractor, ResponseField,
    UserParameters,
};
use hammr_core::runner::{OnSampleError, TestPlan, ThreadGroup, ThreadGroupOptions};
use hammr_core::{ObjectMap, Pipeline, PipelineBuilder, Value, Variables};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct PlanYaml {
    #[serde(default)]
    pub name: Option<String>,

    /// Run thread groups one after another.
    #[serde(default)]
    pub serialize_groups: bool,

    /// Variables visible to every group (a group's own variables win).
    #[serde(default)]
    pub variables: BTreeMap<String, serde_yaml::Value>,

    pub thread_groups: Vec<ThreadGroupYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ThreadGroupYaml {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "one")]
    pub threads: i64,

    #[serde(default)]
    pub ramp_up: YamlDuration,

    /// `-1` loops forever.
    #[serde(default = "one")]
    pub loops: i64,

    #[serde(default)]
    pub scheduler: bool,
    #[serde(default)]
    pub duration: Option<YamlDuration>,
    #[serde(default)]
    pub startup_delay: Option<YamlDuration>,

    /// continue | start_next_loop | stop_thread | stop_test | stop_test_now
    #[serde(default)]
    pub on_sample_error: Option<String>,

    #[serde(default = "yes")]
    pub same_user_on_next_iteration: bool,

    #[serde(default)]
    pub variables: BTreeMap<String, serde_yaml::Value>,

    #[serde(default)]
    pub pre_processors: Vec<PreProcessorYaml>,

    #[serde(default)]
    pub timers: Vec<TimerYaml>,

    pub sampler: SamplerYaml,

    #[serde(default)]
    pub post_processors: Vec<PostProcessorYaml>,

    #[serde(default)]
    pub assertions: Vec<AssertionYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub(crate) enum PreProcessorYaml {
    #[serde(rename_all = "camelCase")]
    Counter {
        variable: String,
        #[serde(default = "one")]
        start: i64,
        #[serde(default = "one")]
        increment: i64,
        #[serde(default)]
        end: Option<i64>,
    },

    /// Parameters are applied in file order.
    #[serde(rename_all = "camelCase")]
    UserParameters {
        #[serde(default)]
        name: Option<String>,
        parameters: serde_yaml::Mapping,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub(crate) enum SamplerYaml {
    #[serde(rename_all = "camelCase")]
    Dummy {
        label: String,
        #[serde(default)]
        response_data: String,
        #[serde(default = "default_response_code")]
        response_code: String,
        #[serde(default = "default_response_message")]
        response_message: String,
        #[serde(default = "yes")]
        success: bool,
        #[serde(default)]
        response_time: YamlDuration,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub(crate) enum PostProcessorYaml {
    /// body | code | message | label | success | elapsed
    #[serde(rename_all = "camelCase")]
    Extract {
        variable: String,
        field: String,
        #[serde(default)]
        default: Option<serde_yaml::Value>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub(crate) enum TimerYaml {
    #[serde(rename_all = "camelCase")]
    Constant { delay: YamlDuration },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub(crate) enum AssertionYaml {
    /// Exactly one of `contains` / `equals`; `not` inverts it.
    #[serde(rename_all = "camelCase")]
    Response {
        #[serde(default)]
        name: Option<String>,
        field: String,
        #[serde(default)]
        contains: Option<String>,
        #[serde(default)]
        equals: Option<String>,
        #[serde(default)]
        not: bool,
    },
}

fn one() -> i64 {
    1
}

fn yes() -> bool {
    true
}

fn default_response_code() -> String {
    "200".to_string()
}

fn default_response_message() -> String {
    "OK".to_string()
}

/// A non-negative duration: a `humantime` string (`10s`, `1m 30s`) or a number of seconds.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|secs| YamlDuration(Duration::from_secs(secs)))
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v < 0.0 {
                    return Err(E::custom("duration must not be negative"));
                }
                Duration::try_from_secs_f64(v)
                    .map(YamlDuration)
                    .map_err(|err| E::custom(format!("invalid duration {v}: {err}")))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v.trim()).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }
        }

        deserializer.deserialize_any(V)
    }
}

pub(crate) async fn load_plan(path: &Path) -> anyhow::Result<TestPlan> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read test plan: {}", path.display()))?;

    let doc: PlanYaml = serde_yaml::from_slice(&bytes)
        .with_context(|| format!("failed to parse YAML: {}", path.display()))?;

    let default_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("plan");
    doc.into_test_plan(default_name)
        .with_context(|| format!("invalid test plan: {}", path.display()))
}

impl PlanYaml {
    pub(crate) fn into_test_plan(self, default_name: &str) -> anyhow::Result<TestPlan> {
        let PlanYaml {
            name,
            serialize_groups,
            variables,
            thread_groups,
        } = self;

        let mut plan = TestPlan::new(name.unwrap_or_else(|| default_name.to_string()))
            .serialize_groups(serialize_groups)
            .with_variables(variables_from_yaml(variables)?);

        for (idx, group) in thread_groups.into_iter().enumerate() {
            let default_name = format!("Thread Group {}", idx + 1);
            plan = plan.with_group(group.into_thread_group(default_name)?);
        }
        Ok(plan)
    }
}

impl ThreadGroupYaml {
    fn into_thread_group(self, default_name: String) -> anyhow::Result<ThreadGroup> {
        let ThreadGroupYaml {
            name,
            threads,
            ramp_up,
            loops,
            scheduler,
            duration,
            startup_delay,
            on_sample_error,
            same_user_on_next_iteration,
            variables,
            pre_processors,
            timers,
            sampler,
            post_processors,
            assertions,
        } = self;

        let name = name.unwrap_or(default_name);
        let on_sample_error = match on_sample_error {
            Some(raw) => raw.parse::<OnSampleError>().map_err(|_| {
                anyhow::anyhow!(
                    "thread group `{name}`: unknown onSampleError `{raw}` (expected continue, start_next_loop, stop_thread, stop_test or stop_test_now)"
                )
            })?,
            None => OnSampleError::Continue,
        };

        let options = ThreadGroupOptions {
            threads,
            ramp_up: ramp_up.into_inner(),
            loops,
            scheduler,
            duration: duration.map(YamlDuration::into_inner),
            startup_delay: startup_delay.map(YamlDuration::into_inner),
            on_sample_error,
            same_user_on_next_iteration,
            variables: variables_from_yaml(variables)
                .with_context(|| format!("thread group `{name}`"))?,
        };

        let mut builder = sampler.into_builder();
        for pre in pre_processors {
            builder = pre
                .apply(builder)
                .with_context(|| format!("thread group `{name}`"))?;
        }
        for timer in timers {
            builder = timer.apply(builder);
        }
        for post in post_processors {
            builder = post
                .apply(builder)
                .with_context(|| format!("thread group `{name}`"))?;
        }
        for assertion in assertions {
            builder = assertion
                .apply(builder)
                .with_context(|| format!("thread group `{name}`"))?;
        }

        Ok(ThreadGroup::new(name, options, builder.build()))
    }
}

impl SamplerYaml {
    fn into_builder(self) -> PipelineBuilder {
        match self {
            SamplerYaml::Dummy {
                label,
                response_data,
                response_code,
                response_message,
                success,
                response_time,
            } => Pipeline::builder(
                DummySampler::new(label)
                    .with_response_data(response_data)
                    .with_response_code(response_code)
                    .with_response_message(response_message)
                    .with_success(success)
                    .with_response_time(response_time.into_inner()),
            ),
        }
    }
}

impl PreProcessorYaml {
    fn apply(self, builder: PipelineBuilder) -> anyhow::Result<PipelineBuilder> {
        Ok(match self {
            PreProcessorYaml::Counter {
                variable,
                start,
                increment,
                end,
            } => {
                let mut counter = Counter::new(variable)
                    .with_start(start)
                    .with_increment(increment);
                if let Some(end) = end {
                    counter = counter.with_end(end);
                }
                builder.pre_processor(counter)
            }
            PreProcessorYaml::UserParameters { name, parameters } => {
                let mut params = UserParameters::new(name.unwrap_or_else(|| "User Parameters".to_string()));
                for (key, value) in parameters {
                    let key = scalar_to_string(&key)
                        .context("userParameters keys must be strings")?;
                    let value = scalar_to_string(&value)
                        .with_context(|| format!("userParameters `{key}` must be a scalar"))?;
                    params = params.with(key, value);
                }
                builder.pre_processor(params)
            }
        })
    }
}

impl TimerYaml {
    fn apply(self, builder: PipelineBuilder) -> PipelineBuilder {
        match self {
            TimerYaml::Constant { delay } => builder.timer(ConstantTimer::new(delay.into_inner())),
        }
    }
}

fn parse_field(field: &str) -> anyhow::Result<ResponseField> {
    field.parse::<ResponseField>().map_err(|_| {
        anyhow::anyhow!(
            "unknown field `{field}` (expected body, code, message, label, success or elapsed)"
        )
    })
}

impl AssertionYaml {
    fn apply(self, builder: PipelineBuilder) -> anyhow::Result<PipelineBuilder> {
        match self {
            AssertionYaml::Response {
                name,
                field,
                contains,
                equals,
                not,
            } => {
                let field = parse_field(&field).context("response assertion")?;
                let mut assertion = match (contains, equals) {
                    (Some(pattern), None) => ResponseAssertion::contains(field, pattern),
                    (None, Some(pattern)) => ResponseAssertion::equals(field, pattern),
                    _ => anyhow::bail!(
                        "response assertion on `{field}` needs exactly one of `contains` or `equals`"
                    ),
                };
                if not {
                    assertion = assertion.negate();
                }
                if let Some(name) = name {
                    assertion = assertion.with_name(name);
                }
                Ok(builder.assertion(assertion))
            }
        }
    }
}

impl PostProcessorYaml {
    fn apply(self, builder: PipelineBuilder) -> anyhow::Result<PipelineBuilder> {
        Ok(match self {
            PostProcessorYaml::Extract {
                variable,
                field,
                default,
            } => {
                let field =
                    parse_field(&field).with_context(|| format!("extract `{variable}`"))?;
                let mut extractor = ResponseExtractor::new(variable.as_str(), field);
                if let Some(default) = default
                    && let Some(value) = variable_value(&variable, default)?
                {
                    extractor = extractor.with_default(value);
                }
                builder.extractor(extractor)
            }
        })
    }
}

fn variables_from_yaml(raw: BTreeMap<String, serde_yaml::Value>) -> anyhow::Result<Variables> {
    let mut vars = Variables::new();
    for (name, value) in raw {
        if let Some(value) = variable_value(&name, value)? {
            vars.put(name, value);
        }
    }
    Ok(vars)
}

/// `None` for a top-level null, which leaves the variable unset.
fn variable_value(name: &str, value: serde_yaml::Value) -> anyhow::Result<Option<Value>> {
    if value.is_null() {
        return Ok(None);
    }
    yaml_to_value(value)
        .with_context(|| format!("variable `{name}`"))
        .map(Some)
}

/// Sequences become arrays and mappings become objects; nested nulls are kept.
fn yaml_to_value(value: serde_yaml::Value) -> anyhow::Result<Value> {
    Ok(match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::I64(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64().map_or(Value::Null, Value::F64)
            }
        }
        serde_yaml::Value::String(s) => Value::from(s),
        serde_yaml::Value::Sequence(items) => Value::from(
            items
                .into_iter()
                .map(yaml_to_value)
                .collect::<anyhow::Result<Vec<_>>>()?,
        ),
        serde_yaml::Value::Mapping(map) => {
            let mut object = ObjectMap::default();
            for (key, value) in map {
                let key = scalar_to_string(&key).context("object keys must be scalars")?;
                object.insert(key.into(), yaml_to_value(value)?);
            }
            Value::Object(object)
        }
        serde_yaml::Value::Tagged(tagged) => {
            anyhow::bail!("tagged values (`{}`) are not supported", tagged.tag)
        }
    })
}

fn scalar_to_string(value: &serde_yaml::Value) -> anyhow::Result<String> {
    match value {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        _ => anyhow::bail!("expected a string, number or boolean"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> anyhow::Result<TestPlan> {
        let doc: PlanYaml = serde_yaml::from_str(yaml)?;
        doc.into_test_plan("file")
    }

    #[test]
    fn parses_a_full_plan() {
        let plan = parse(
            r#"
name: smoke
serializeGroups: true
variables:
  host: example.com
  port: 8080
threadGroups:
  - name: Users
    threads: 3
    rampUp: 1s
    loops: -1
    scheduler: true
    duration: 1m
    startupDelay: 0.5
    onSampleError: startnextloop
    sameUserOnNextIteration: false
    variables:
      user: bob
    preProcessors:
      - type: counter
        variable: x
        start: 0
        end: 9
      - type: userParameters
        parameters:
          greeting: "hi ${user}"
    sampler:
      type: dummy
      label: "GET /items/${x}"
      responseTime: 25ms
    postProcessors:
      - type: extract
        variable: last_code
        field: code
        default: NONE
  - sampler:
      type: dummy
      label: second
"#,
        )
        .unwrap_or_else(|e| panic!("plan should parse: {e:#}"));

        assert_eq!(plan.name(), "smoke");
        let groups = plan.groups();
        assert_eq!(groups.len(), 2);

        let users = groups[0].options();
        assert_eq!(groups[0].name(), "Users");
        assert_eq!(users.threads, 3);
        assert_eq!(users.ramp_up, Duration::from_secs(1));
        assert_eq!(users.loops, -1);
        assert!(users.scheduler);
        assert_eq!(users.duration, Some(Duration::from_secs(60)));
        assert_eq!(users.startup_delay, Some(Duration::from_millis(500)));
        assert_eq!(users.on_sample_error, OnSampleError::StartNextLoop);
        assert!(!users.same_user_on_next_iteration);
        assert_eq!(users.variables.get_str("user"), Some("bob"));

        assert_eq!(groups[1].name(), "Thread Group 2");
        assert_eq!(groups[1].options().threads, 1);
        assert_eq!(groups[1].options().loops, 1);
    }

    #[test]
    fn rejects_unknown_on_sample_error() {
        let err = parse(
            r#"
threadGroups:
  - onSampleError: explode
    sampler: { type: dummy, label: s }
"#,
        )
        .err()
        .map(|e| format!("{e:#}"))
        .unwrap_or_default();
        assert!(err.contains("unknown onSampleError `explode`"), "{err}");
    }

    #[test]
    fn rejects_negative_and_unrepresentable_durations() {
        for ramp_up in ["-5", "-0.5", "1.0e30", ".inf", ".nan"] {
            let yaml = format!(
                "threadGroups:\n  - rampUp: {ramp_up}\n    sampler: {{ type: dummy, label: s }}\n"
            );
            assert!(parse(&yaml).is_err(), "rampUp: {ramp_up} should be rejected");
        }
    }

    #[test]
    fn structured_variables_become_arrays_and_objects() {
        let plan = parse(
            r#"
variables:
  hosts: [a.test, b.test]
  user: { name: bob, id: 7, tags: [admin], manager: ~ }
  unset: ~
threadGroups:
  - sampler: { type: dummy, label: s }
"#,
        )
        .unwrap_or_else(|e| panic!("plan should parse: {e:#}"));

        let vars = plan.variables();
        assert_eq!(
            vars.get("hosts").map(ToString::to_string).as_deref(),
            Some(r#"["a.test","b.test"]"#)
        );
        assert_eq!(
            vars.get("user").map(ToString::to_string).as_deref(),
            Some(r#"{"id":7,"manager":null,"name":"bob","tags":["admin"]}"#)
        );
        assert!(vars.get("unset").is_none());

        assert!(
            parse(
                r#"
variables:
  nested: !custom { a: 1 }
threadGroups:
  - sampler: { type: dummy, label: s }
"#
            )
            .is_err()
        );
    }

    #[test]
    fn response_assertion_needs_exactly_one_rule() {
        for rule in ["", "contains: a, equals: b, "] {
            let yaml = format!(
                "threadGroups:\n  - sampler: {{ type: dummy, label: s }}\n    assertions:\n      - {{ type: response, {rule}field: code }}\n"
            );
            let err = parse(&yaml).err().map(|e| format!("{e:#}")).unwrap_or_default();
            assert!(err.contains("exactly one of"), "{rule}: {err}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timers_and_assertions_reach_the_pipeline() {
        let plan = parse(
            r#"
threadGroups:
  - loops: 2
    timers:
      - { type: constant, delay: 1s }
      - { type: constant, delay: 0.5 }
    sampler: { type: dummy, label: s, responseCode: "503" }
    assertions:
      - { type: response, field: code, equals: "200" }
      - { type: response, field: label, contains: s, not: true, name: no s }
"#,
        )
        .unwrap_or_else(|e| panic!("plan should parse: {e:#}"));

        let before = tokio::time::Instant::now();
        let report = plan.groups()[0]
            .start()
            .unwrap_or_else(|e| panic!("start failed: {e}"))
            .wait()
            .await
            .unwrap_or_else(|e| panic!("wait failed: {e}"));

        assert!(before.elapsed() >= Duration::from_secs(3));
        assert_eq!(report.samples(), 2);
        assert_eq!(report.failed_samples(), 2);
        assert_eq!(report.processor_errors(), 0);
    }

    #[test]
    fn rejects_unknown_extract_field() {
        let res = parse(
            r#"
threadGroups:
  - sampler: { type: dummy, label: s }
    postProcessors:
      - { type: extract, variable: v, field: headers }
"#,
        );
        assert!(res.is_err());
    }
}
