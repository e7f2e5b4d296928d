use anyhow::{anyhow, Result};
use kestrel_schedule::config::SchedulerConfig;
use kestrel_schedule::events::ScheduleEvent;
use kestrel_schedule::{
    callback_fn, BehaviourScheduler, CallbackDescriptor, DescriptorId, FrameFailure, FrameTime, OwnerId,
    ScheduleError, UpdateCallback, UpdateContext,
};
use std::cell::RefCell;
use std::rc::Rc;

type Trace = Rc<RefCell<Vec<String>>>;

fn recorder(trace: &Trace, label: &str) -> Box<dyn UpdateCallback> {
    let trace = Rc::clone(trace);
    let label = label.to_string();
    callback_fn(move |_ctx| {
        trace.borrow_mut().push(label.clone());
        Ok(())
    })
}

fn ids(executed: &[DescriptorId]) -> Vec<&str> {
    executed.iter().map(DescriptorId::as_str).collect()
}

fn owner(raw: u64) -> OwnerId {
    OwnerId::from_raw(raw)
}

fn tick() -> FrameTime {
    FrameTime::new(1, 1.0 / 60.0, 1.0 / 60.0)
}

#[test]
fn before_after_scenario_runs_c_a_b() {
    let trace = Trace::default();
    let mut scheduler = BehaviourScheduler::default();
    scheduler.register(CallbackDescriptor::new("A", owner(1)).tag("default"), recorder(&trace, "A")).expect("A");
    scheduler
        .register(CallbackDescriptor::new("B", owner(1)).tag("default").after("A"), recorder(&trace, "B"))
        .expect("B");
    scheduler
        .register(CallbackDescriptor::new("C", owner(1)).tag("default").before("A"), recorder(&trace, "C"))
        .expect("C");

    let report = scheduler.run_group("default", tick());
    assert!(report.is_clean());
    assert_eq!(ids(&report.executed), vec!["C", "A", "B"]);
    assert_eq!(trace.borrow().as_slice(), ["C", "A", "B"]);
}

#[test]
fn separate_groups_do_not_affect_each_other() {
    let trace = Trace::default();
    let mut scheduler = BehaviourScheduler::default();
    scheduler.register(CallbackDescriptor::new("X", owner(1)).tag("physics"), recorder(&trace, "X")).expect("X");
    let physics_before = scheduler.schedule("physics").expect("physics schedule");
    scheduler.register(CallbackDescriptor::new("Y", owner(2)).tag("render"), recorder(&trace, "Y")).expect("Y");
    let physics_after = scheduler.schedule("physics").expect("physics schedule");
    let render = scheduler.schedule("render").expect("render schedule");

    assert!(std::sync::Arc::ptr_eq(&physics_before, &physics_after), "render registration kept physics cached");
    assert_eq!(ids(physics_after.order()), vec!["X"]);
    assert_eq!(ids(render.order()), vec!["Y"]);
    assert!(scheduler.schedule("default").expect("default").is_empty());
}

#[test]
fn failing_callback_does_not_block_later_ones() {
    let trace = Trace::default();
    let mut scheduler = BehaviourScheduler::default();
    scheduler.register(CallbackDescriptor::new("D", owner(1)), callback_fn(|_ctx| Err(anyhow!("broken behaviour"))))
        .expect("D");
    scheduler.register(CallbackDescriptor::new("E", owner(1)).after("D"), recorder(&trace, "E")).expect("E");
    scheduler.register(CallbackDescriptor::new("F", owner(2)).after("E"), recorder(&trace, "F")).expect("F");

    let report = scheduler.run_group("default", tick());
    assert_eq!(ids(&report.executed), vec!["D", "E", "F"]);
    assert_eq!(trace.borrow().as_slice(), ["E", "F"]);
    assert_eq!(report.failed_ids().map(DescriptorId::as_str).collect::<Vec<_>>(), vec!["D"]);
    assert_eq!(report.failures.len(), 1, "failure for D reported exactly once");
    assert_eq!(
        report.failures[0],
        FrameFailure::Callback { id: "D".into(), message: "broken behaviour".to_string() }
    );

    let next = scheduler.run_group("default", tick());
    assert_eq!(next.failures.len(), 1, "failing behaviour keeps running on later ticks");
}

#[test]
fn panicking_callback_is_isolated() {
    let trace = Trace::default();
    let mut scheduler = BehaviourScheduler::default();
    scheduler.register(CallbackDescriptor::new("P", owner(1)), callback_fn(|_ctx| panic!("exploded"))).expect("P");
    scheduler.register(CallbackDescriptor::new("Q", owner(1)), recorder(&trace, "Q")).expect("Q");

    let report = scheduler.run_group("default", tick());
    assert_eq!(trace.borrow().as_slice(), ["Q"]);
    match &report.failures[..] {
        [FrameFailure::Callback { id, message }] => {
            assert_eq!(id.as_str(), "P");
            assert_eq!(message, "panicked: exploded");
        }
        other => panic!("expected a single callback failure, got {other:?}"),
    }
}

#[test]
fn cyclic_group_is_skipped_and_reported_once() {
    let trace = Trace::default();
    let mut scheduler = BehaviourScheduler::default();
    scheduler.register(CallbackDescriptor::new("A", owner(1)).tag("default").after("B"), recorder(&trace, "A"))
        .expect("A");
    scheduler.register(CallbackDescriptor::new("B", owner(1)).tag("default").after("A"), recorder(&trace, "B"))
        .expect("B");
    scheduler.register(CallbackDescriptor::new("U", owner(1)).tag("ui"), recorder(&trace, "U")).expect("U");

    let report = scheduler.run_group("default", tick());
    assert!(report.executed.is_empty());
    assert!(report.skipped());
    assert_eq!(
        report.failures,
        vec![FrameFailure::Unschedulable(ScheduleError::CyclicDependency {
            group: "default".to_string(),
            nodes: vec!["A".into(), "B".into()],
        })]
    );
    assert!(trace.borrow().is_empty(), "no partial execution");

    let ui = scheduler.run_group("ui", tick());
    assert_eq!(ids(&ui.executed), vec!["U"], "other groups still run");

    let events = scheduler.drain_events();
    let cycles = events.iter().filter(|event| matches!(event, ScheduleEvent::CycleDetected { .. })).count();
    assert_eq!(cycles, 1);
}

#[test]
fn breaking_a_cycle_restores_the_group() {
    let mut scheduler = BehaviourScheduler::default();
    scheduler.register(CallbackDescriptor::new("A", owner(1)).after("B"), callback_fn(|_| Ok(()))).expect("A");
    scheduler.register(CallbackDescriptor::new("B", owner(2)).after("A"), callback_fn(|_| Ok(()))).expect("B");
    assert!(scheduler.run_group("default", tick()).skipped());

    assert!(scheduler.unregister(&"B".into()));
    let report = scheduler.run_group("default", tick());
    assert!(report.is_clean());
    assert_eq!(ids(&report.executed), vec!["A"]);
}

#[test]
fn duplicate_registration_fails_only_that_call() {
    let mut scheduler = BehaviourScheduler::default();
    scheduler.register(CallbackDescriptor::new("A", owner(1)), callback_fn(|_| Ok(()))).expect("A");
    let err = scheduler.register(CallbackDescriptor::new("A", owner(2)), callback_fn(|_| Ok(()))).unwrap_err();
    assert_eq!(err, ScheduleError::DuplicateDescriptor { id: "A".into() });
    assert_eq!(scheduler.registry().len(), 1);
    assert_eq!(ids(&scheduler.run_group("default", tick()).executed), vec!["A"]);
}

#[test]
fn registrations_from_callbacks_apply_after_the_pass() {
    let trace = Trace::default();
    let mut scheduler = BehaviourScheduler::default();
    let spawned = Rc::new(RefCell::new(false));
    let spawn_trace = Rc::clone(&trace);
    let spawn_flag = Rc::clone(&spawned);
    scheduler
        .register(
            CallbackDescriptor::new("Spawner", owner(1)),
            callback_fn(move |ctx| {
                spawn_trace.borrow_mut().push("Spawner".to_string());
                if !*spawn_flag.borrow() {
                    *spawn_flag.borrow_mut() = true;
                    let child = recorder(&spawn_trace, "Child");
                    ctx.commands().register(CallbackDescriptor::new("Child", owner(9)).before("Spawner"), child);
                }
                Ok(())
            }),
        )
        .expect("Spawner");

    let first = scheduler.run_group("default", tick());
    assert_eq!(ids(&first.executed), vec!["Spawner"], "child is not run in the pass that spawned it");
    assert!(scheduler.registry().contains(&"Child".into()));

    let second = scheduler.run_group("default", tick());
    assert_eq!(ids(&second.executed), vec!["Child", "Spawner"]);
    assert_eq!(trace.borrow().as_slice(), ["Spawner", "Child", "Spawner"]);
}

#[test]
fn owner_destruction_from_a_callback_is_deferred() {
    let trace = Trace::default();
    let mut scheduler = BehaviourScheduler::default();
    scheduler
        .register(
            CallbackDescriptor::new("Killer", owner(1)),
            callback_fn(|ctx| {
                ctx.commands().unregister_owner(OwnerId::from_raw(2));
                Ok(())
            }),
        )
        .expect("Killer");
    scheduler.register(CallbackDescriptor::new("Victim.Update", owner(2)), recorder(&trace, "Victim.Update"))
        .expect("Victim.Update");
    scheduler
        .register(CallbackDescriptor::new("Victim.Late", owner(2)).tag("late"), recorder(&trace, "Victim.Late"))
        .expect("Victim.Late");

    let first = scheduler.run_group("default", tick());
    assert_eq!(ids(&first.executed), vec!["Killer", "Victim.Update"]);
    assert_eq!(scheduler.registry().len(), 1, "both of the victim's descriptors are gone");
    assert!(scheduler.run_group("late", tick()).executed.is_empty());
    assert_eq!(ids(&scheduler.run_group("default", tick()).executed), vec!["Killer"]);
}

#[test]
fn deferred_duplicate_is_reported_in_the_frame() {
    let mut scheduler = BehaviourScheduler::default();
    scheduler
        .register(
            CallbackDescriptor::new("Cloner", owner(1)),
            callback_fn(|ctx| {
                ctx.commands().register(CallbackDescriptor::new("Cloner", owner(1)), callback_fn(|_| Ok(())));
                Ok(())
            }),
        )
        .expect("Cloner");
    let report = scheduler.run_group("default", tick());
    assert_eq!(report.failures, vec![FrameFailure::Deferred(ScheduleError::DuplicateDescriptor { id: "Cloner".into() })]);
}

#[test]
fn unregistering_twice_is_harmless() {
    let mut scheduler = BehaviourScheduler::default();
    scheduler.register(CallbackDescriptor::new("A", owner(1)), callback_fn(|_| Ok(()))).expect("A");
    assert!(scheduler.unregister(&"A".into()));
    assert!(!scheduler.unregister(&"A".into()));
    assert_eq!(scheduler.unregister_owner(owner(1)), 0);
}

#[test]
fn editor_flagged_callbacks_run_in_both_groups() {
    let trace = Trace::default();
    let mut config = SchedulerConfig::default();
    config.frame_groups = vec!["default".to_string(), "editor".to_string()];
    let mut scheduler = BehaviourScheduler::new(&config);
    scheduler.register(CallbackDescriptor::new("Game", owner(1)), recorder(&trace, "Game")).expect("Game");
    scheduler
        .register(CallbackDescriptor::new("Gizmo", owner(2)).enabled_in_editor(), recorder(&trace, "Gizmo"))
        .expect("Gizmo");

    let reports = scheduler.step(0.016);
    assert_eq!(reports.len(), 2);
    assert_eq!(ids(&reports[0].executed), vec!["Game", "Gizmo"]);
    assert_eq!(ids(&reports[1].executed), vec!["Gizmo"]);
}

#[test]
fn callbacks_receive_frame_context() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let mut scheduler = BehaviourScheduler::default();
    scheduler
        .register(
            CallbackDescriptor::new("Probe", owner(5)),
            callback_fn(move |ctx| -> Result<()> {
                sink.borrow_mut().push((ctx.id().as_str().to_string(), ctx.owner(), ctx.group().to_string(), ctx.time.frame));
                Ok(())
            }),
        )
        .expect("Probe");
    scheduler.step(0.5);
    scheduler.step(0.5);
    assert_eq!(
        seen.borrow().as_slice(),
        [
            ("Probe".to_string(), owner(5), "default".to_string(), 1),
            ("Probe".to_string(), owner(5), "default".to_string(), 2),
        ]
    );
}

#[test]
fn profiler_tracks_executed_callbacks() {
    let mut scheduler = BehaviourScheduler::default();
    scheduler.register(CallbackDescriptor::new("Timed", owner(1)), callback_fn(|_| Ok(()))).expect("Timed");
    scheduler.step(0.016);
    scheduler.step(0.016);
    let summary = scheduler.profiler().summary(&"Timed".into()).expect("timing recorded");
    assert_eq!(summary.samples, 2);
    scheduler.unregister(&"Timed".into());
    assert!(scheduler.profiler().summary(&"Timed".into()).is_none());
}

struct Lifecycle {
    label: String,
    trace: Trace,
    fail_create: bool,
    fail_destroy: bool,
    release_on_destroy: Option<&'static str>,
}

impl Lifecycle {
    fn boxed(trace: &Trace, label: &str) -> Box<dyn UpdateCallback> {
        Box::new(Self::new(trace, label))
    }

    fn new(trace: &Trace, label: &str) -> Self {
        Self {
            label: label.to_string(),
            trace: Rc::clone(trace),
            fail_create: false,
            fail_destroy: false,
            release_on_destroy: None,
        }
    }

    fn log(&self, hook: &str) {
        self.trace.borrow_mut().push(format!("{hook} {}", self.label));
    }
}

impl UpdateCallback for Lifecycle {
    fn on_create(&mut self, _ctx: &mut UpdateContext<'_>) -> Result<()> {
        self.log("create");
        if self.fail_create {
            return Err(anyhow!("not ready"));
        }
        Ok(())
    }

    fn update(&mut self, _ctx: &mut UpdateContext<'_>) -> Result<()> {
        self.log("update");
        Ok(())
    }

    fn on_destroy(&mut self, ctx: &mut UpdateContext<'_>) -> Result<()> {
        self.log("destroy");
        if let Some(id) = self.release_on_destroy {
            ctx.commands().unregister(id);
        }
        if self.fail_destroy {
            return Err(anyhow!("leaked handle"));
        }
        Ok(())
    }
}

#[test]
fn lifecycle_hooks_bracket_updates() {
    let trace = Trace::default();
    let mut scheduler = BehaviourScheduler::default();
    scheduler.register(CallbackDescriptor::new("A", owner(1)), Lifecycle::boxed(&trace, "A")).expect("A");
    scheduler.run_group("default", tick());
    scheduler.run_group("default", tick());
    assert!(scheduler.unregister(&"A".into()));
    assert_eq!(trace.borrow().as_slice(), ["create A", "update A", "update A", "destroy A"]);
}

#[test]
fn owner_despawn_destroys_every_owned_descriptor() {
    let trace = Trace::default();
    let mut scheduler = BehaviourScheduler::default();
    scheduler.register(CallbackDescriptor::new("A", owner(7)), Lifecycle::boxed(&trace, "A")).expect("A");
    scheduler.register(CallbackDescriptor::new("B", owner(7)).tag("physics"), Lifecycle::boxed(&trace, "B")).expect("B");
    scheduler.register(CallbackDescriptor::new("C", owner(8)), Lifecycle::boxed(&trace, "C")).expect("C");
    scheduler.run_group("default", tick());
    scheduler.run_group("physics", tick());
    trace.borrow_mut().clear();

    assert_eq!(scheduler.unregister_owner(owner(7)), 2);
    assert_eq!(trace.borrow().as_slice(), ["destroy A", "destroy B"]);
    let report = scheduler.run_group("default", tick());
    assert_eq!(ids(&report.executed), vec!["C"]);
}

#[test]
fn callbacks_that_never_ran_are_not_destroyed() {
    let trace = Trace::default();
    let mut scheduler = BehaviourScheduler::default();
    scheduler.register(CallbackDescriptor::new("A", owner(1)), Lifecycle::boxed(&trace, "A")).expect("A");
    assert!(scheduler.unregister(&"A".into()));
    assert!(trace.borrow().is_empty());
}

#[test]
fn failed_create_skips_the_first_update_only() {
    let trace = Trace::default();
    let mut scheduler = BehaviourScheduler::default();
    let mut failing = Lifecycle::new(&trace, "A");
    failing.fail_create = true;
    scheduler.register(CallbackDescriptor::new("A", owner(1)), Box::new(failing)).expect("A");
    scheduler.register(CallbackDescriptor::new("B", owner(1)).after("A"), Lifecycle::boxed(&trace, "B")).expect("B");

    let first = scheduler.run_group("default", tick());
    let failures: Vec<String> = first.failures.iter().map(ToString::to_string).collect();
    assert_eq!(failures, vec!["A: on_create: not ready"]);
    assert_eq!(trace.borrow().as_slice(), ["create A", "create B", "update B"]);

    trace.borrow_mut().clear();
    let second = scheduler.run_group("default", tick());
    assert!(second.is_clean());
    assert_eq!(trace.borrow().as_slice(), ["update A", "update B"]);
}

#[test]
fn destroy_failure_outside_a_pass_is_reported_next_pass() {
    let trace = Trace::default();
    let mut scheduler = BehaviourScheduler::default();
    let mut failing = Lifecycle::new(&trace, "A");
    failing.fail_destroy = true;
    scheduler.register(CallbackDescriptor::new("A", owner(1)), Box::new(failing)).expect("A");
    scheduler.register(CallbackDescriptor::new("B", owner(2)), Lifecycle::boxed(&trace, "B")).expect("B");
    scheduler.run_group("default", tick());
    assert!(scheduler.unregister(&"A".into()));

    let report = scheduler.run_group("default", tick());
    assert_eq!(ids(&report.executed), vec!["B"]);
    let failures: Vec<String> = report.failures.iter().map(ToString::to_string).collect();
    assert_eq!(failures, vec!["A: on_destroy: leaked handle"]);
    assert!(scheduler.run_group("default", tick()).is_clean(), "reported exactly once");
}

#[test]
fn commands_queued_by_destroy_hooks_are_applied() {
    let trace = Trace::default();
    let mut scheduler = BehaviourScheduler::default();
    let mut parent = Lifecycle::new(&trace, "Parent");
    parent.release_on_destroy = Some("Child");
    scheduler.register(CallbackDescriptor::new("Parent", owner(1)), Box::new(parent)).expect("Parent");
    scheduler.register(CallbackDescriptor::new("Child", owner(2)), Lifecycle::boxed(&trace, "Child")).expect("Child");
    scheduler.run_group("default", tick());
    trace.borrow_mut().clear();

    assert_eq!(scheduler.unregister_owner(owner(1)), 1);
    assert_eq!(trace.borrow().as_slice(), ["destroy Parent", "destroy Child"]);
    assert!(scheduler.registry().is_empty());
}

#[test]
fn retired_ids_roll_the_epoch_past_the_limit() {
    let config = SchedulerConfig { retired_sequence_limit: 2, ..SchedulerConfig::default() };
    let mut scheduler = BehaviourScheduler::new(&config);
    for index in 0..5 {
        let id = format!("Spawned{index}");
        scheduler.register(CallbackDescriptor::new(id.as_str(), owner(index)), callback_fn(|_ctx| Ok(()))).expect("register");
        assert!(scheduler.unregister(&DescriptorId::new(id)));
        assert!(scheduler.registry().retired_len() <= 2);
    }
    assert!(scheduler.registry().epoch() >= 1);

    let unbounded = SchedulerConfig { retired_sequence_limit: 0, ..SchedulerConfig::default() };
    let mut scheduler = BehaviourScheduler::new(&unbounded);
    for index in 0..5 {
        let id = format!("Spawned{index}");
        scheduler.register(CallbackDescriptor::new(id.as_str(), owner(index)), callback_fn(|_ctx| Ok(()))).expect("register");
        scheduler.unregister(&DescriptorId::new(id));
    }
    assert_eq!(scheduler.registry().retired_len(), 5);
    assert_eq!(scheduler.registry().epoch(), 0);
}
