use relational_ecs::{ComponentOptions, Hooks, Value, World};

#[test]
fn test_mutations_are_invisible_before_sync() {
    let mut world = World::new();
    let position = world.component(ComponentOptions::named("Position")).unwrap();

    let e = world.spawn();
    world.set(e, position, Value::new(1i32)).unwrap();

    assert!(!world.has(e, position));
    assert!(world.query(&[position]).unwrap().is_empty());

    world.sync().unwrap();
    assert!(world.has(e, position));
}

#[test]
fn test_last_write_wins_within_a_batch() {
    let mut world = World::new();
    let position = world.component(ComponentOptions::named("Position")).unwrap();

    let e = world.spawn();
    world.set(e, position, Value::new(1i32)).unwrap();
    world.set(e, position, Value::new(2i32)).unwrap();
    world.set(e, position, Value::new(3i32)).unwrap();
    world.sync().unwrap();

    assert_eq!(world.get(e, position).unwrap().downcast_ref::<i32>(), Some(&3));
}

#[test]
fn test_set_remove_coalescing() {
    let mut world = World::new();
    let a = world.component(ComponentOptions::named("A")).unwrap();
    let b = world.component(ComponentOptions::named("B")).unwrap();

    let e = world.spawn();
    // set then remove cancels; remove then set lands
    world.set(e, a, Value::new(1u8)).unwrap();
    world.remove(e, a).unwrap();
    world.remove(e, b).unwrap();
    world.set(e, b, Value::new(2u8)).unwrap();
    world.sync().unwrap();

    assert!(!world.has(e, a));
    assert!(world.has(e, b));
    assert_eq!(world.get(e, b).unwrap().downcast_ref::<u8>(), Some(&2));
}

#[test]
fn test_single_transition_per_batch() {
    let mut world = World::new();
    let a = world.component(ComponentOptions::named("A")).unwrap();
    let b = world.component(ComponentOptions::named("B")).unwrap();
    let c = world.component(ComponentOptions::named("C")).unwrap();

    let e = world.spawn();
    world.add(e, a).unwrap();
    world.add(e, b).unwrap();
    world.add(e, c).unwrap();
    world.sync().unwrap();

    // Empty archetype plus the final [a, b, c]; no intermediate archetypes
    assert_eq!(world.archetype_count(), 2);
}

#[test]
fn test_hook_chain_converges_within_bound() {
    let mut world = World::new();
    let counter = world.component(ComponentOptions::named("Counter")).unwrap();

    world
        .hook(
            counter,
            Hooks::new().on_set(|commands, entity, ty, value| {
                let v = value
                    .and_then(|v| v.downcast_ref::<i64>())
                    .copied()
                    .unwrap_or(0);
                if v < 20 {
                    commands.set(entity, ty, Value::new(v + 1)).unwrap();
                }
            }),
        )
        .unwrap();

    let e = world.spawn();
    world.set(e, counter, Value::new(0i64)).unwrap();
    world.sync().unwrap();

    assert_eq!(world.get(e, counter).unwrap().downcast_ref::<i64>(), Some(&20));
}

#[test]
fn test_ordering_across_entities_follows_first_command() {
    let mut world = World::new();
    let ty = world.component(ComponentOptions::default()).unwrap();

    let e1 = world.spawn();
    let e2 = world.spawn();
    // e2's first command precedes e1's, so e2's batch applies first and its
    // row lands first in the shared archetype
    world.set(e2, ty, Value::new(2i32)).unwrap();
    world.set(e1, ty, Value::new(1i32)).unwrap();
    world.set(e2, ty, Value::new(22i32)).unwrap();
    world.sync().unwrap();

    assert_eq!(world.query(&[ty]).unwrap(), vec![e2, e1]);
    assert_eq!(world.get(e2, ty).unwrap().downcast_ref::<i32>(), Some(&22));
}
