use crate::cache::{InvalidationMode, ScheduleCache};
use crate::config::SchedulerConfig;
use crate::descriptor::{CallbackDescriptor, DescriptorId, OwnerId, DEFAULT_GROUP};
use crate::error::{ScheduleError, ScheduleResult};
use crate::events::{EventLog, ScheduleEvent};
use crate::graph::{self, DependencyGraph};
use crate::profiler::CallbackProfiler;
use crate::registry::DescriptorRegistry;
use crate::resolve::ResolvedSchedule;
use crate::time::{FrameClock, FrameTime};
use anyhow::Result;
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Anything that can be driven once per tick.
///
/// `on_create` runs right before the first `update` after registration. `on_destroy`
/// runs when the descriptor is unregistered, provided `on_create` already ran.
pub trait UpdateCallback {
    fn on_create(&mut self, _ctx: &mut UpdateContext<'_>) -> Result<()> {
        Ok(())
    }

    fn update(&mut self, ctx: &mut UpdateContext<'_>) -> Result<()>;

    fn on_destroy(&mut self, _ctx: &mut UpdateContext<'_>) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hook {
    Create,
    Update,
    Destroy,
}

pub struct FnCallback<F>(F);

impl<F> UpdateCallback for FnCallback<F>
where
    F: FnMut(&mut UpdateContext<'_>) -> Result<()>,
{
    fn update(&mut self, ctx: &mut UpdateContext<'_>) -> Result<()> {
        (self.0)(ctx)
    }
}

/// Boxes a closure as an [`UpdateCallback`].
pub fn callback_fn<F>(f: F) -> Box<dyn UpdateCallback>
where
    F: FnMut(&mut UpdateContext<'_>) -> Result<()> + 'static,
{
    Box::new(FnCallback(f))
}

pub struct UpdateContext<'a> {
    pub time: FrameTime,
    id: &'a DescriptorId,
    owner: OwnerId,
    group: &'a str,
    commands: &'a mut ScheduleCommands,
}

impl<'a> UpdateContext<'a> {
    pub fn id(&self) -> &DescriptorId {
        self.id
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn group(&self) -> &str {
        self.group
    }

    pub fn delta_seconds(&self) -> f32 {
        self.time.delta
    }

    /// Registry changes requested here are applied once the current group's pass ends.
    pub fn commands(&mut self) -> &mut ScheduleCommands {
        self.commands
    }
}

pub enum ScheduleCommand {
    Register(CallbackDescriptor, Box<dyn UpdateCallback>),
    Unregister(DescriptorId),
    UnregisterOwner(OwnerId),
}

#[derive(Default)]
pub struct ScheduleCommands {
    queue: Vec<ScheduleCommand>,
}

impl ScheduleCommands {
    pub fn register(&mut self, descriptor: CallbackDescriptor, callback: Box<dyn UpdateCallback>) {
        self.queue.push(ScheduleCommand::Register(descriptor, callback));
    }

    pub fn unregister(&mut self, id: impl Into<DescriptorId>) {
        self.queue.push(ScheduleCommand::Unregister(id.into()));
    }

    pub fn unregister_owner(&mut self, owner: OwnerId) {
        self.queue.push(ScheduleCommand::UnregisterOwner(owner));
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn drain(&mut self) -> Vec<ScheduleCommand> {
        self.queue.drain(..).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameFailure {
    Callback { id: DescriptorId, message: String },
    /// The group could not be ordered and was skipped for this tick.
    Unschedulable(ScheduleError),
    /// A command queued by a callback could not be applied.
    Deferred(ScheduleError),
}

impl fmt::Display for FrameFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameFailure::Callback { id, message } => write!(f, "{id}: {message}"),
            FrameFailure::Unschedulable(err) => write!(f, "skipped: {err}"),
            FrameFailure::Deferred(err) => write!(f, "deferred: {err}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub group: String,
    pub executed: Vec<DescriptorId>,
    pub failures: Vec<FrameFailure>,
}

impl FrameReport {
    fn new(group: &str) -> Self {
        Self { group: group.to_string(), executed: Vec::new(), failures: Vec::new() }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn skipped(&self) -> bool {
        self.failures.iter().any(|failure| matches!(failure, FrameFailure::Unschedulable(_)))
    }

    pub fn failed_ids(&self) -> impl Iterator<Item = &DescriptorId> {
        self.failures.iter().filter_map(|failure| match failure {
            FrameFailure::Callback { id, .. } => Some(id),
            _ => None,
        })
    }
}

struct CallbackSlot {
    owner: OwnerId,
    callback: Box<dyn UpdateCallback>,
    created: bool,
}

/// Registry, schedule cache and frame executor for per-tick behaviour callbacks.
pub struct BehaviourScheduler {
    registry: DescriptorRegistry,
    cache: ScheduleCache,
    callbacks: HashMap<DescriptorId, CallbackSlot>,
    profiler: CallbackProfiler,
    events: EventLog,
    clock: FrameClock,
    frame_groups: Vec<String>,
    catch_panics: bool,
    retired_sequence_limit: usize,
    last_time: FrameTime,
    // Commands queued by `on_destroy` hooks, applied once the retiring call finishes.
    pending: ScheduleCommands,
    // Failures raised outside a group pass, reported by the next pass.
    carried: Vec<FrameFailure>,
}

impl Default for BehaviourScheduler {
    fn default() -> Self {
        Self::new(&SchedulerConfig::default())
    }
}

impl BehaviourScheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            registry: DescriptorRegistry::new(),
            cache: ScheduleCache::new(config.invalidation),
            callbacks: HashMap::new(),
            profiler: CallbackProfiler::new(config.profile_callbacks),
            events: EventLog::new(config.event_log_capacity),
            clock: FrameClock::new(),
            frame_groups: config.frame_groups.clone(),
            catch_panics: config.catch_panics,
            retired_sequence_limit: config.retired_sequence_limit,
            last_time: FrameTime::default(),
            pending: ScheduleCommands::default(),
            carried: Vec::new(),
        }
    }

    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }

    /// Independent copy of the registry for resolving groups elsewhere.
    pub fn snapshot(&self) -> DescriptorRegistry {
        self.registry.clone()
    }

    pub fn invalidation_mode(&self) -> InvalidationMode {
        self.cache.mode()
    }

    pub fn set_invalidation_mode(&mut self, mode: InvalidationMode) {
        self.cache.set_mode(mode);
    }

    pub fn frame_groups(&self) -> &[String] {
        &self.frame_groups
    }

    pub fn set_frame_groups(&mut self, groups: Vec<String>) {
        self.frame_groups = groups;
    }

    pub fn profiler(&self) -> &CallbackProfiler {
        &self.profiler
    }

    pub fn drain_events(&mut self) -> Vec<ScheduleEvent> {
        self.events.drain()
    }

    pub fn register(&mut self, descriptor: CallbackDescriptor, callback: Box<dyn UpdateCallback>) -> ScheduleResult<()> {
        let groups = descriptor.groups();
        let owner = descriptor.owner;
        let id = self.registry.register(descriptor)?.id().clone();
        self.cache.invalidate(&groups);
        debug!(target: "kestrel::schedule", id = %id, ?groups, "registered callback");
        self.events.push(ScheduleEvent::Registered { id: id.clone(), groups: groups.into_iter().collect() });
        self.callbacks.insert(id, CallbackSlot { owner, callback, created: false });
        Ok(())
    }

    /// Returns `false` when `id` was not registered.
    ///
    /// Failures raised by `on_destroy` are reported by the next group pass.
    pub fn unregister(&mut self, id: &DescriptorId) -> bool {
        let Some(group) = self.release(id) else {
            return false;
        };
        self.flush_pending(&group);
        true
    }

    /// Removes every descriptor owned by `owner`; returns how many were removed.
    pub fn unregister_owner(&mut self, owner: OwnerId) -> usize {
        let removed = self.release_owner(owner);
        if let Some(group) = removed.first() {
            self.flush_pending(group);
        }
        removed.len()
    }

    /// Starts a new registration epoch, e.g. after scripts were reloaded.
    pub fn begin_epoch(&mut self) {
        self.registry.begin_epoch();
    }

    /// Unregisters `id` without applying commands its `on_destroy` queued. Returns the
    /// group its hook ran under.
    fn release(&mut self, id: &DescriptorId) -> Option<String> {
        let descriptor = self.registry.unregister(id)?;
        let group = lifecycle_group(&descriptor);
        self.retire(&descriptor, &group);
        self.roll_epoch_if_needed();
        Some(group)
    }

    fn release_owner(&mut self, owner: OwnerId) -> Vec<String> {
        let removed = self.registry.unregister_owner(owner);
        let groups: Vec<String> = removed.iter().map(lifecycle_group).collect();
        for (descriptor, group) in removed.iter().zip(&groups) {
            self.retire(descriptor, group);
        }
        if !removed.is_empty() {
            self.events.push(ScheduleEvent::OwnerReleased { owner, removed: removed.len() });
            self.roll_epoch_if_needed();
        }
        groups
    }

    fn retire(&mut self, descriptor: &CallbackDescriptor, group: &str) {
        self.cache.invalidate(descriptor.groups());
        self.profiler.forget(&descriptor.id);
        if let Some(mut slot) = self.callbacks.remove(&descriptor.id) {
            if slot.created {
                let mut ctx = UpdateContext {
                    time: self.last_time,
                    id: &descriptor.id,
                    owner: slot.owner,
                    group,
                    commands: &mut self.pending,
                };
                if let Err(message) = invoke(slot.callback.as_mut(), &mut ctx, Hook::Destroy, self.catch_panics) {
                    let failure = self.callback_failed(group, &descriptor.id, message);
                    self.carried.push(failure);
                }
            }
        }
        debug!(target: "kestrel::schedule", id = %descriptor.id, "unregistered callback");
        self.events.push(ScheduleEvent::Unregistered { id: descriptor.id.clone() });
    }

    /// Forgets the sequence slots of retired ids once there are more than the
    /// configured limit. A limit of zero keeps them until `begin_epoch`.
    fn roll_epoch_if_needed(&mut self) {
        let limit = self.retired_sequence_limit;
        if limit > 0 && self.registry.retired_len() > limit {
            debug!(
                target: "kestrel::schedule",
                retired = self.registry.retired_len(),
                limit,
                "rolling registration epoch"
            );
            self.registry.begin_epoch();
        }
    }

    fn callback_failed(&mut self, group: &str, id: &DescriptorId, message: String) -> FrameFailure {
        warn!(target: "kestrel::schedule", group, id = %id, "callback failed: {message}");
        self.events.push(ScheduleEvent::CallbackFailed {
            group: group.to_string(),
            id: id.clone(),
            message: message.clone(),
        });
        FrameFailure::Callback { id: id.clone(), message }
    }

    pub fn schedule(&mut self, group: &str) -> ScheduleResult<Arc<ResolvedSchedule>> {
        let before = self.cache.resolutions();
        let schedule = self.cache.get_schedule(&self.registry, group)?;
        if self.cache.resolutions() != before {
            self.events.push(ScheduleEvent::Resolved { group: group.to_string(), len: schedule.len() });
        }
        Ok(schedule)
    }

    pub fn graph(&self, group: &str) -> DependencyGraph {
        graph::build(&self.registry, group)
    }

    pub fn groups(&self) -> BTreeSet<String> {
        self.registry.groups()
    }

    /// Runs every callback of `group` in resolved order.
    ///
    /// Failing callbacks are collected in the report and do not stop the pass. An
    /// unschedulable group runs nothing and reports the cycle once.
    pub fn run_group(&mut self, group: &str, time: FrameTime) -> FrameReport {
        self.last_time = time;
        let mut report = FrameReport::new(group);
        let schedule = match self.schedule(group) {
            Ok(schedule) => schedule,
            Err(err) => {
                warn!(target: "kestrel::schedule", group, "skipping group: {err}");
                if let ScheduleError::CyclicDependency { nodes, .. } = &err {
                    self.events.push(ScheduleEvent::CycleDetected { group: group.to_string(), nodes: nodes.clone() });
                }
                report.failures.push(FrameFailure::Unschedulable(err));
                report.failures.append(&mut self.carried);
                return report;
            }
        };

        let catch_panics = self.catch_panics;
        let mut commands = ScheduleCommands::default();
        for id in schedule.iter() {
            let Some(slot) = self.callbacks.get_mut(id) else {
                continue;
            };
            let mut ctx = UpdateContext { time, id, owner: slot.owner, group, commands: &mut commands };
            // A failed on_create skips this pass's update.
            let created = if slot.created {
                Ok(())
            } else {
                slot.created = true;
                invoke(slot.callback.as_mut(), &mut ctx, Hook::Create, catch_panics)
            };
            let outcome = match created {
                Ok(()) => {
                    let _scope = self.profiler.scope(id);
                    invoke(slot.callback.as_mut(), &mut ctx, Hook::Update, catch_panics)
                }
                Err(message) => Err(message),
            };
            report.executed.push(id.clone());
            if let Err(message) = outcome {
                let failure = self.callback_failed(group, id, message);
                report.failures.push(failure);
            }
        }

        let deferred = self.apply_commands(group, commands);
        report.failures.extend(deferred);
        report.failures.append(&mut self.carried);
        report
    }

    /// Runs every configured frame group once, in configuration order.
    pub fn run_frame(&mut self, time: FrameTime) -> Vec<FrameReport> {
        let groups = self.frame_groups.clone();
        groups.iter().map(|group| self.run_group(group, time)).collect()
    }

    /// Advances the internal clock by wall-clock time and runs a frame.
    pub fn tick(&mut self) -> Vec<FrameReport> {
        let time = self.clock.tick();
        self.run_frame(time)
    }

    /// Advances the internal clock by a fixed step and runs a frame.
    pub fn step(&mut self, dt: f32) -> Vec<FrameReport> {
        let time = self.clock.step(dt);
        self.run_frame(time)
    }

    /// Applies `commands`, then whatever the `on_destroy` hooks they triggered queued in
    /// turn. Returns the registrations that could not be applied.
    fn apply_commands(&mut self, group: &str, mut commands: ScheduleCommands) -> Vec<FrameFailure> {
        let mut failures = Vec::new();
        loop {
            for command in commands.drain() {
                match command {
                    ScheduleCommand::Register(descriptor, callback) => {
                        if let Err(err) = self.register(descriptor, callback) {
                            warn!(target: "kestrel::schedule", group, "deferred registration failed: {err}");
                            self.events.push(ScheduleEvent::DeferredCommandFailed {
                                group: group.to_string(),
                                message: err.to_string(),
                            });
                            failures.push(FrameFailure::Deferred(err));
                        }
                    }
                    ScheduleCommand::Unregister(id) => {
                        self.release(&id);
                    }
                    ScheduleCommand::UnregisterOwner(owner) => {
                        self.release_owner(owner);
                    }
                }
            }
            commands = mem::take(&mut self.pending);
            if commands.is_empty() {
                return failures;
            }
        }
    }

    fn flush_pending(&mut self, group: &str) {
        let failures = self.apply_commands(group, ScheduleCommands::default());
        self.carried.extend(failures);
    }
}

/// Group reported to lifecycle hooks that run outside a pass.
fn lifecycle_group(descriptor: &CallbackDescriptor) -> String {
    descriptor.groups().into_iter().next().unwrap_or_else(|| DEFAULT_GROUP.to_string())
}

fn invoke(
    callback: &mut dyn UpdateCallback,
    ctx: &mut UpdateContext<'_>,
    hook: Hook,
    catch_panics: bool,
) -> Result<(), String> {
    let mut call = || match hook {
        Hook::Create => callback.on_create(ctx),
        Hook::Update => callback.update(ctx),
        Hook::Destroy => callback.on_destroy(ctx),
    };
    let outcome = if catch_panics {
        match panic::catch_unwind(AssertUnwindSafe(call)) {
            Ok(result) => result.map_err(|err| format!("{err:#}")),
            Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
        }
    } else {
        call().map_err(|err| format!("{err:#}"))
    };
    outcome.map_err(|message| match hook {
        Hook::Update => message,
        Hook::Create => format!("on_create: {message}"),
        Hook::Destroy => format!("on_destroy: {message}"),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
