use std::sync::{Arc, Mutex};

use relational_ecs::{relation, wildcard, ComponentOptions, GroupHooks, Hooks, Value, World};

type Log = Arc<Mutex<Vec<String>>>;

fn log_of(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[test]
fn test_set_and_remove_hooks_with_values() {
    let mut world = World::new();
    let health = world.component(ComponentOptions::named("Health")).unwrap();

    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let on_set_log = log.clone();
    let on_remove_log = log.clone();
    world
        .hook(
            health,
            Hooks::new()
                .on_set(move |_, _, _, value| {
                    let v = value.and_then(|v| v.downcast_ref::<i32>()).unwrap();
                    on_set_log.lock().unwrap().push(format!("set {v}"));
                })
                .on_remove(move |_, _, _, prev| {
                    let v = prev.and_then(|v| v.downcast_ref::<i32>()).unwrap();
                    on_remove_log.lock().unwrap().push(format!("remove {v}"));
                }),
        )
        .unwrap();

    let e = world.spawn();
    world.set(e, health, Value::new(100i32)).unwrap();
    world.sync().unwrap();
    world.set(e, health, Value::new(50i32)).unwrap();
    world.sync().unwrap();
    world.remove(e, health).unwrap();
    world.sync().unwrap();

    // The remove hook observes the previous value
    assert_eq!(log_of(&log), vec!["set 100", "set 50", "remove 50"]);
}

#[test]
fn test_remove_fires_before_set_within_a_batch() {
    let mut world = World::new();
    let child_of = world
        .component(ComponentOptions::named("ChildOf").exclusive().dont_fragment())
        .unwrap();

    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let on_set_log = log.clone();
    let on_remove_log = log.clone();
    world
        .hook(
            wildcard(child_of).unwrap(),
            Hooks::new()
                .on_set(move |_, _, ty, _| {
                    on_set_log
                        .lock()
                        .unwrap()
                        .push(format!("set {:?}", ty.target().unwrap()));
                })
                .on_remove(move |_, _, ty, _| {
                    on_remove_log
                        .lock()
                        .unwrap()
                        .push(format!("remove {:?}", ty.target().unwrap()));
                }),
        )
        .unwrap();

    let p1 = world.spawn();
    let p2 = world.spawn();
    let c = world.spawn();
    world.add(c, relation(child_of, p1).unwrap()).unwrap();
    world.sync().unwrap();

    // Exclusive replacement: the old relation's removal is observed before
    // the new relation's set
    world.add(c, relation(child_of, p2).unwrap()).unwrap();
    world.sync().unwrap();

    assert_eq!(
        log_of(&log),
        vec![
            format!("set {p1:?}"),
            format!("remove {p1:?}"),
            format!("set {p2:?}")
        ]
    );
}

#[test]
fn test_wildcard_hook_sees_concrete_relations() {
    let mut world = World::new();
    let likes = world.component(ComponentOptions::named("Likes")).unwrap();

    let seen: Log = Arc::new(Mutex::new(Vec::new()));
    let seen_inner = seen.clone();
    world
        .hook(
            wildcard(likes).unwrap(),
            Hooks::new().on_set(move |_, _, ty, _| {
                seen_inner
                    .lock()
                    .unwrap()
                    .push(format!("{:?}", ty.target().unwrap()));
            }),
        )
        .unwrap();

    let target = world.spawn();
    let e = world.spawn();
    world.add(e, relation(likes, target).unwrap()).unwrap();
    world.sync().unwrap();

    assert_eq!(log_of(&seen), vec![format!("{target:?}")]);
}

#[test]
fn test_on_init_walks_existing_holders() {
    let mut world = World::new();
    let position = world.component(ComponentOptions::named("Position")).unwrap();

    let e1 = world.spawn();
    let e2 = world.spawn();
    world.set(e1, position, Value::new(1i32)).unwrap();
    world.set(e2, position, Value::new(2i32)).unwrap();
    world.sync().unwrap();

    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let init_log = log.clone();
    world
        .hook(
            position,
            Hooks::new().on_init(move |_, _, _, value| {
                let v = value.and_then(|v| v.downcast_ref::<i32>()).unwrap();
                init_log.lock().unwrap().push(format!("init {v}"));
            }),
        )
        .unwrap();

    let mut calls = log_of(&log);
    calls.sort();
    assert_eq!(calls, vec!["init 1", "init 2"]);
}

#[test]
fn test_hook_enqueued_commands_apply_in_same_sync() {
    let mut world = World::new();
    let spawned = world.component(ComponentOptions::named("Spawned")).unwrap();
    let initialized = world.component(ComponentOptions::named("Initialized")).unwrap();

    world
        .hook(
            spawned,
            Hooks::new().on_set(move |commands, entity, _, _| {
                commands.add(entity, initialized).unwrap();
            }),
        )
        .unwrap();

    let e = world.spawn();
    world.add(e, spawned).unwrap();
    world.sync().unwrap();

    // The follow-up command converged inside the same sync
    assert!(world.has(e, initialized));
}

#[test]
fn test_group_hook_fires_on_satisfaction_boundaries() {
    let mut world = World::new();
    let a = world.component(ComponentOptions::named("A")).unwrap();
    let b = world.component(ComponentOptions::named("B")).unwrap();

    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let set_log = log.clone();
    let remove_log = log.clone();
    world
        .hook_many(
            &[a, b],
            GroupHooks::new()
                .on_set(move |_, _| set_log.lock().unwrap().push("set".into()))
                .on_remove(move |_, _| remove_log.lock().unwrap().push("remove".into())),
        )
        .unwrap();

    let e = world.spawn();
    world.add(e, a).unwrap();
    world.sync().unwrap();
    assert!(log_of(&log).is_empty()); // not satisfied yet

    world.add(e, b).unwrap();
    world.sync().unwrap();
    assert_eq!(log_of(&log), vec!["set"]); // first satisfied

    world.set(e, a, Value::new(1u8)).unwrap();
    world.sync().unwrap();
    assert_eq!(log_of(&log), vec!["set", "set"]); // changed while satisfying

    world.remove(e, b).unwrap();
    world.sync().unwrap();
    assert_eq!(log_of(&log), vec!["set", "set", "remove"]);

    world.add(e, b).unwrap();
    world.sync().unwrap();
    world.despawn(e);
    world.sync().unwrap();
    assert_eq!(log_of(&log), vec!["set", "set", "remove", "set", "remove"]);
}

#[test]
fn test_group_on_init_walks_satisfying_entities() {
    let mut world = World::new();
    let a = world.component(ComponentOptions::named("A")).unwrap();
    let b = world.component(ComponentOptions::named("B")).unwrap();

    let both = world.spawn();
    world.add(both, a).unwrap();
    world.add(both, b).unwrap();
    let only_a = world.spawn();
    world.add(only_a, a).unwrap();
    world.sync().unwrap();

    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let init_log = log.clone();
    world
        .hook_many(
            &[a, b],
            GroupHooks::new().on_init(move |_, entity| {
                init_log.lock().unwrap().push(format!("init {entity:?}"));
            }),
        )
        .unwrap();

    // Only the entity already satisfying the tuple is visited
    assert_eq!(log_of(&log), vec![format!("init {both:?}")]);
}

#[test]
fn test_unhook_stops_dispatch() {
    let mut world = World::new();
    let ty = world.component(ComponentOptions::default()).unwrap();

    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let inner = log.clone();
    let hook = world
        .hook(
            ty,
            Hooks::new().on_set(move |_, _, _, _| inner.lock().unwrap().push("set".into())),
        )
        .unwrap();

    let e = world.spawn();
    world.add(e, ty).unwrap();
    world.sync().unwrap();

    assert!(world.unhook(hook));
    world.set(e, ty, Value::unit()).unwrap();
    world.sync().unwrap();

    assert_eq!(log_of(&log), vec!["set"]);
}
