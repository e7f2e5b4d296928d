use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::rc::Rc;

use anyhow::{anyhow, bail, Context, Result};
use bevy_ecs::prelude::{Entity, World};
use serde::{Deserialize, Serialize};

use crate::cache::InvalidationMode;
use crate::config::SchedulerConfig;
use crate::descriptor::{CallbackDescriptor, OwnerId};
use crate::executor::{callback_fn, BehaviourScheduler, FrameReport, UpdateCallback};
use crate::scripts::ScriptBehaviour;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleFixture {
    #[serde(default = "default_steps")]
    pub steps: usize,
    #[serde(default = "default_dt")]
    pub dt: f32,
    #[serde(default)]
    pub frame_groups: Option<Vec<String>>,
    #[serde(default)]
    pub invalidation: Option<InvalidationMode>,
    pub behaviours: Vec<FixtureBehaviour>,
    #[serde(default)]
    pub despawns: Vec<FixtureDespawn>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixtureBehaviour {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub owner: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub after: Vec<String>,
    #[serde(default)]
    pub before: Vec<String>,
    #[serde(default)]
    pub editor: bool,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub fail_on_steps: Vec<usize>,
}

/// Destroys every behaviour of `owner` right before `step` runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixtureDespawn {
    pub step: usize,
    pub owner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessOutput {
    pub steps: usize,
    pub dt: f32,
    pub behaviours: Vec<String>,
    pub results: Vec<StepResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub step: usize,
    pub groups: Vec<GroupResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupResult {
    pub group: String,
    pub executed: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}

impl From<&FrameReport> for GroupResult {
    fn from(report: &FrameReport) -> Self {
        Self {
            group: report.group.clone(),
            executed: report.executed.iter().map(|id| id.as_str().to_string()).collect(),
            failures: report.failures.iter().map(ToString::to_string).collect(),
        }
    }
}

pub fn run_fixture(fixture: &ScheduleFixture) -> Result<HarnessOutput> {
    run_fixture_with_config(fixture, &SchedulerConfig::default())
}

/// Runs `fixture` on a fresh scheduler built from `config`. Fixture-level frame groups
/// and invalidation mode take precedence over the config.
pub fn run_fixture_with_config(fixture: &ScheduleFixture, config: &SchedulerConfig) -> Result<HarnessOutput> {
    let mut config = config.clone();
    if let Some(groups) = &fixture.frame_groups {
        config.frame_groups = groups.clone();
    }
    if let Some(mode) = fixture.invalidation {
        config.invalidation = mode;
    }
    let mut scheduler = BehaviourScheduler::new(&config);

    let mut world = World::new();
    let mut owners: HashMap<String, Entity> = HashMap::new();
    let mut log_sinks: Vec<Rc<RefCell<Vec<String>>>> = Vec::new();

    for behaviour in &fixture.behaviours {
        let entity = *owners.entry(behaviour.owner.clone()).or_insert_with(|| world.spawn_empty().id());
        let descriptor = fixture_descriptor(behaviour, OwnerId::from(entity));
        let callback: Box<dyn UpdateCallback> = match &behaviour.script {
            Some(source) => {
                let script = ScriptBehaviour::compile(behaviour.id.clone(), source)?;
                log_sinks.push(script.log_sink());
                Box::new(script)
            }
            None => failing_on(behaviour.fail_on_steps.clone()),
        };
        scheduler
            .register(descriptor, callback)
            .with_context(|| format!("registering fixture behaviour '{}'", behaviour.id))?;
    }

    let mut results = Vec::with_capacity(fixture.steps);
    for step in 0..fixture.steps {
        for despawn in fixture.despawns.iter().filter(|despawn| despawn.step == step) {
            let Some(entity) = owners.remove(&despawn.owner) else {
                bail!("step {step} despawns unknown owner '{}'", despawn.owner);
            };
            world.despawn(entity);
            scheduler.unregister_owner(OwnerId::from(entity));
        }
        let reports = scheduler.step(fixture.dt);
        let groups = reports.iter().map(GroupResult::from).collect();
        let logs = log_sinks.iter().flat_map(|sink| sink.borrow_mut().drain(..).collect::<Vec<_>>()).collect();
        results.push(StepResult { step, groups, logs });
    }

    let behaviours = fixture.behaviours.iter().map(|b| b.id.clone()).collect();
    Ok(HarnessOutput { steps: fixture.steps, dt: fixture.dt, behaviours, results })
}

pub fn load_fixture<P: AsRef<Path>>(path: P) -> Result<ScheduleFixture> {
    let file = File::open(path.as_ref()).with_context(|| format!("opening fixture '{}'", path.as_ref().display()))?;
    serde_json::from_reader(file).with_context(|| "parsing fixture JSON")
}

fn fixture_descriptor(behaviour: &FixtureBehaviour, owner: OwnerId) -> CallbackDescriptor {
    let mut descriptor = CallbackDescriptor::new(behaviour.id.clone(), owner).tags(behaviour.tags.iter().cloned());
    if let Some(name) = &behaviour.name {
        descriptor = descriptor.named(name.clone());
    }
    for reference in &behaviour.after {
        descriptor = descriptor.after(reference.clone());
    }
    for reference in &behaviour.before {
        descriptor = descriptor.before(reference.clone());
    }
    if behaviour.editor {
        descriptor = descriptor.enabled_in_editor();
    }
    descriptor
}

fn failing_on(steps: Vec<usize>) -> Box<dyn UpdateCallback> {
    callback_fn(move |ctx| {
        let step = ctx.time.frame.saturating_sub(1) as usize;
        if steps.contains(&step) {
            return Err(anyhow!("scripted failure at step {step}"));
        }
        Ok(())
    })
}

fn default_steps() -> usize {
    1
}

fn default_dt() -> f32 {
    1.0 / 60.0
}
