use relational_ecs::{relation, wildcard, ComponentOptions, Value, World};

#[test]
fn test_cascade_chain() {
    let mut world = World::new();
    let follows = world
        .component(ComponentOptions::named("Follows").cascade_delete())
        .unwrap();

    let root = world.spawn();
    let a = world.spawn();
    let b = world.spawn();
    let c = world.spawn();
    world.add(a, relation(follows, root).unwrap()).unwrap();
    world.add(b, relation(follows, a).unwrap()).unwrap();
    world.add(c, relation(follows, b).unwrap()).unwrap();
    world.sync().unwrap();

    world.despawn(root);
    world.sync().unwrap();

    for entity in [root, a, b, c] {
        assert!(!world.exists(entity));
    }
}

#[test]
fn test_cascade_cycle_terminates() {
    let mut world = World::new();
    let follows = world
        .component(ComponentOptions::named("Follows").cascade_delete())
        .unwrap();

    let a = world.spawn();
    let b = world.spawn();
    world.add(a, relation(follows, b).unwrap()).unwrap();
    world.add(b, relation(follows, a).unwrap()).unwrap();
    world.sync().unwrap();

    world.despawn(a);
    world.sync().unwrap();

    assert!(!world.exists(a));
    assert!(!world.exists(b));
}

#[test]
fn test_non_cascade_references_are_stripped() {
    let mut world = World::new();
    let likes = world.component(ComponentOptions::named("Likes")).unwrap();
    let position = world.component(ComponentOptions::named("Position")).unwrap();

    let target = world.spawn();
    let fan = world.spawn();
    world.set(fan, position, Value::new(1u32)).unwrap();
    world.set(fan, relation(likes, target).unwrap(), Value::new(9u32)).unwrap();
    world.sync().unwrap();

    world.despawn(target);
    world.sync().unwrap();

    assert!(world.exists(fan));
    assert!(!world.has(fan, relation(likes, target).unwrap()));
    assert!(world.has(fan, position));
    assert!(world.relations(fan, wildcard(likes).unwrap()).unwrap().is_empty());
}

#[test]
fn test_dont_fragment_cascade() {
    let mut world = World::new();
    let child_of = world
        .component(
            ComponentOptions::named("ChildOf")
                .exclusive()
                .cascade_delete()
                .dont_fragment(),
        )
        .unwrap();

    let parent = world.spawn();
    let kids: Vec<_> = (0..5)
        .map(|_| {
            let kid = world.spawn();
            world.add(kid, relation(child_of, parent).unwrap()).unwrap();
            kid
        })
        .collect();
    world.sync().unwrap();

    world.despawn(parent);
    world.sync().unwrap();

    assert!(!world.exists(parent));
    for kid in kids {
        assert!(!world.exists(kid));
    }
}

#[test]
fn test_archetypes_referencing_destroyed_entities_are_collected() {
    let mut world = World::new();
    let likes = world.component(ComponentOptions::named("Likes")).unwrap();

    let target = world.spawn();
    let fan = world.spawn();
    world.add(fan, relation(likes, target).unwrap()).unwrap();
    world.sync().unwrap();
    let with_relation = world.archetype_count();

    world.despawn(target);
    world.sync().unwrap();

    // The fan moved back to the empty archetype; the relation archetype's
    // signature named the destroyed entity and was collected
    assert!(world.archetype_count() < with_relation);
    assert!(world.exists(fan));
}

#[test]
fn test_destroy_then_commands_on_dead_entity_are_skipped() {
    let mut world = World::new();
    let position = world.component(ComponentOptions::named("Position")).unwrap();

    let e = world.spawn();
    world.despawn(e);
    world.set(e, position, Value::new(1i32)).unwrap();
    world.sync().unwrap();

    assert!(!world.exists(e));
}
