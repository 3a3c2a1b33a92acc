//! Built-in, application-agnostic step rules.
//!
//! Registration order matters: specific sentences ("Click the Save button
//! in the Edit modal") come before the general ones ("Click Save") that
//! would otherwise claim them. Applications append their own rules after
//! (or insert before) these with `PatternRegistry::register`.

use async_trait::async_trait;
use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::context::slots;
use crate::driver::{Action, Selector};
use crate::error::{EngineError, EngineResult};
use crate::registry::{handler_fn, PatternRegistry, PatternRule, StepCall, StepEnv, StepHandler};

/// Format stored in the `current_time` slot
pub const TIME_FORMAT: &str = "%H:%M";

/// "Save button" and "Save" name the same control
fn control_label(text: &str) -> &str {
    let text = text.trim();
    text.strip_suffix(" button")
        .or_else(|| text.strip_suffix(" Button"))
        .unwrap_or(text)
        .trim()
}

/// Value typed into a field: test data named by the step wins over the literal text
fn entered_value<'a>(call: &'a StepCall, written: &'a str) -> &'a str {
    call.test_data.get(written.trim()).unwrap_or(written.trim())
}

/// Role of the actor the scenario is currently driving
fn current_agent(env: &StepEnv<'_>) -> EngineResult<String> {
    env.context.get::<String>(slots::AGENT)
}

/// "On the Student, browse to example.com"
struct Browse;

#[async_trait]
impl StepHandler for Browse {
    async fn run(&self, call: &StepCall, env: &mut StepEnv<'_>) -> EngineResult<()> {
        let role = call.capture(0)?.trim().to_string();
        let url = env.settings.resolve_url(call.capture(1)?);
        let actor = env.actors.acquire(&role).await?;
        actor.navigate(&url).await?;

        let landed = actor.current_url().await.unwrap_or_else(|_| url.clone());
        env.context.set(slots::AGENT, actor.role())?;
        env.context.set(slots::CURRENT_URL, &landed)?;
        env.context.push(slots::ACTUAL_URLS, &url)?;
        if landed != url {
            env.context.push(slots::ACTUAL_URLS, &landed)?;
        }
        Ok(())
    }
}

/// "example.com/path is accessed"
fn url_accessed(call: &StepCall, env: &mut StepEnv<'_>) -> EngineResult<()> {
    let expected = call.capture(0)?.trim();
    let visited: Vec<String> = env.context.get(slots::ACTUAL_URLS)?;
    if visited.iter().any(|url| url.contains(expected)) {
        Ok(())
    } else {
        Err(EngineError::handler(format!(
            "{} was not accessed; visited: {}",
            expected,
            visited.join(", ")
        )))
    }
}

/// Click whatever `selector` resolves to, as the current agent
struct ClickOn(fn(&StepCall) -> EngineResult<Selector>);

#[async_trait]
impl StepHandler for ClickOn {
    async fn run(&self, call: &StepCall, env: &mut StepEnv<'_>) -> EngineResult<()> {
        let selector = (self.0)(call)?;
        let role = current_agent(env)?;
        let actor = env.actors.acquire(&role).await?;
        let element = actor.require(&selector, env.settings.wait_timeout).await?;
        actor.act(&element, &Action::Click).await
    }
}

fn modal_button(call: &StepCall) -> EngineResult<Selector> {
    Ok(Selector::button_in_dialog(
        control_label(call.capture(0)?),
        call.capture(1)?,
    ))
}

fn text_control(call: &StepCall) -> EngineResult<Selector> {
    Ok(Selector::text(control_label(call.capture(0)?)))
}

/// "In the Username field, enter alice"
struct EnterInField;

#[async_trait]
impl StepHandler for EnterInField {
    async fn run(&self, call: &StepCall, env: &mut StepEnv<'_>) -> EngineResult<()> {
        let field = call.capture(0)?;
        let value = entered_value(call, call.capture(1)?).to_string();
        let role = current_agent(env)?;
        let actor = env.actors.acquire(&role).await?;
        let element = actor
            .require(&Selector::field(field), env.settings.wait_timeout)
            .await?;
        actor.act(&element, &Action::fill(value)).await
    }
}

/// "Saved is displayed"
struct Displayed;

#[async_trait]
impl StepHandler for Displayed {
    async fn run(&self, call: &StepCall, env: &mut StepEnv<'_>) -> EngineResult<()> {
        let text = call.capture(0)?.trim();
        let role = current_agent(env)?;
        let actor = env.actors.acquire(&role).await?;
        actor
            .require(&Selector::text(text), env.settings.wait_timeout)
            .await
            .map(|_| ())
    }
}

/// "Wait for 2 minutes"
struct Wait;

#[async_trait]
impl StepHandler for Wait {
    async fn run(&self, call: &StepCall, _env: &mut StepEnv<'_>) -> EngineResult<()> {
        let amount: u64 = call
            .capture(0)?
            .parse()
            .map_err(|_| EngineError::handler(format!("'{}' is not a number", call.captures[0])))?;
        let unit = call.capture(1)?.to_lowercase();
        let seconds = if unit.starts_with("minute") {
            amount.checked_mul(60).ok_or_else(|| {
                EngineError::handler(format!("{} minutes is too long to wait", amount))
            })?
        } else {
            amount
        };
        let wait = Duration::from_secs(seconds);
        info!("Waiting {:?} as asked by step {}", wait, call.index);
        tokio::time::sleep(wait).await;
        Ok(())
    }
}

fn determine_current_time(_call: &StepCall, env: &mut StepEnv<'_>) -> EngineResult<()> {
    let now = Local::now().format(TIME_FORMAT).to_string();
    env.context.set(slots::CURRENT_TIME, now)
}

/// Append the built-in rules, most specific first
pub fn register_standard(registry: &mut PatternRegistry) -> EngineResult<()> {
    let rules = vec![
        PatternRule::new(
            "browse-as-role",
            r"^(?:On|Using) the (.+?)\s*, browse to (\S+)",
            Arc::new(Browse),
        )?
        .with_examples(["On the Student, browse to example.com/path"]),
        PatternRule::new("url-accessed", r"^(\S+) is accessed$", handler_fn(url_accessed))?
            .with_examples(["example.com/path is accessed"]),
        PatternRule::new(
            "click-in-modal",
            r"^Click the (.+) in the (.+) modal$",
            Arc::new(ClickOn(modal_button)),
        )?
        .with_examples(["Click the Save button in the Edit Rule modal"]),
        PatternRule::new(
            "enter-in-field",
            r"^In the (.+?) field, enter (.+)$",
            Arc::new(EnterInField),
        )?
        .with_examples(["In the Username field, enter username"]),
        PatternRule::new(
            "wait",
            r"(?i)^Wait for (\d+) (seconds?|minutes?)$",
            Arc::new(Wait),
        )?
        .with_examples(["Wait for 2 minutes", "Wait for 1 second"]),
        PatternRule::new(
            "current-time",
            r"^Determine the Current Time$",
            handler_fn(determine_current_time),
        )?
        .with_examples(["Determine the Current Time"]),
        PatternRule::new(
            "no-expected-result",
            r"^No expected result$",
            handler_fn(|_, _| Ok(())),
        )?
        .with_examples(["No expected result"]),
        PatternRule::new("displayed", r"^(.+) is displayed$", Arc::new(Displayed))?
            .with_examples(["Configuration saved is displayed"]),
        PatternRule::new(
            "click",
            r"(?i)^Click (?:the )?(.+)$",
            Arc::new(ClickOn(text_control)),
        )?
        .with_examples(["Click Save", "Click the Add button"]),
    ];

    for rule in rules {
        registry.register(rule);
    }
    Ok(())
}

/// A registry holding only the built-in rules
pub fn standard_registry() -> EngineResult<PatternRegistry> {
    let mut registry = PatternRegistry::new();
    register_standard(&mut registry)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystep_common::TestDataRecord;

    #[test]
    fn test_standard_rules_are_consistent() {
        let registry = standard_registry().unwrap();
        assert!(registry.audit().is_empty(), "{:?}", registry.audit());
    }

    #[test]
    fn test_modal_click_precedes_general_click() {
        let registry = standard_registry().unwrap();
        let hit = registry
            .find("Click the Save button in the Edit Rule modal")
            .unwrap();
        assert_eq!(hit.rule.name(), "click-in-modal");
        assert_eq!(hit.captures, vec!["Save button", "Edit Rule"]);
        assert_eq!(registry.find("Click Save").unwrap().rule.name(), "click");
    }

    #[test]
    fn test_control_label() {
        assert_eq!(control_label("Save button"), "Save");
        assert_eq!(control_label(" Add Button "), "Add");
        assert_eq!(control_label("Save"), "Save");
    }

    #[test]
    fn test_entered_value_prefers_test_data() {
        let mut data = TestDataRecord::new();
        data.insert("username", "alice");
        let call = StepCall {
            scenario_key: "KS-T1".to_string(),
            index: 0,
            text: "In the Username field, enter username".to_string(),
            test_data: data,
            captures: vec!["Username".to_string(), "username".to_string()],
        };
        assert_eq!(entered_value(&call, "username"), "alice");
        assert_eq!(entered_value(&call, "literal text"), "literal text");
    }

    #[tokio::test]
    async fn test_wait_rejects_minutes_that_overflow() {
        use crate::actors::ActorPool;
        use crate::context::ExecutionContext;
        use crate::recording::RecordingFactory;
        use crate::registry::StepSettings;

        let mut context = ExecutionContext::new();
        let mut actors = ActorPool::new(Arc::new(RecordingFactory::new(
            Vec::<String>::new(),
            true,
        )));
        let settings = StepSettings::default();
        let mut env = StepEnv {
            context: &mut context,
            actors: &mut actors,
            settings: &settings,
        };
        let call = StepCall {
            scenario_key: "KS-T1".to_string(),
            index: 0,
            text: format!("Wait for {} minutes", u64::MAX),
            test_data: TestDataRecord::new(),
            captures: vec![u64::MAX.to_string(), "minutes".to_string()],
        };

        match Wait.run(&call, &mut env).await {
            Err(EngineError::Handler(reason)) => assert!(reason.contains("too long")),
            other => panic!("expected a handler error, got {:?}", other),
        }
    }
}
