use relational_ecs::{relation, wildcard, ComponentOptions, EcsError, Id, Value, World};

fn sorted(mut ids: Vec<Id>) -> Vec<Id> {
    ids.sort();
    ids
}

#[test]
fn test_relation_values_are_readable() {
    let mut world = World::new();
    let owes = world.component(ComponentOptions::named("Owes")).unwrap();

    let alice = world.spawn();
    let bob = world.spawn();
    let rel = relation(owes, bob).unwrap();
    world.set(alice, rel, Value::new(250i64)).unwrap();
    world.sync().unwrap();

    assert!(world.has(alice, rel));
    assert_eq!(world.get(alice, rel).unwrap().downcast_ref::<i64>(), Some(&250));

    let pairs = world.relations(alice, wildcard(owes).unwrap()).unwrap();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].0, bob);
}

#[test]
fn test_component_relation_target() {
    let mut world = World::new();
    let tag = world.component(ComponentOptions::named("Tag")).unwrap();
    let position = world.component(ComponentOptions::named("Position")).unwrap();

    let e = world.spawn();
    let rel = relation(tag, position).unwrap();
    world.add(e, rel).unwrap();
    world.sync().unwrap();

    assert!(world.has(e, rel));
    assert!(world.has(e, wildcard(tag).unwrap()));
    // The base component itself is not present, only the relation
    assert!(!world.has(e, tag));
}

#[test]
fn test_exclusive_fragmenting_relation() {
    let mut world = World::new();
    let child_of = world
        .component(ComponentOptions::named("ChildOf").exclusive())
        .unwrap();

    let p1 = world.spawn();
    let p2 = world.spawn();
    let c = world.spawn();

    world.add(c, relation(child_of, p1).unwrap()).unwrap();
    world.sync().unwrap();
    world.add(c, relation(child_of, p2).unwrap()).unwrap();
    world.sync().unwrap();

    assert!(!world.has(c, relation(child_of, p1).unwrap()));
    assert!(world.has(c, relation(child_of, p2).unwrap()));

    // Same-batch replacement collapses to the last target
    let p3 = world.spawn();
    world.add(c, relation(child_of, p1).unwrap()).unwrap();
    world.add(c, relation(child_of, p3).unwrap()).unwrap();
    world.sync().unwrap();
    assert!(!world.has(c, relation(child_of, p1).unwrap()));
    assert!(!world.has(c, relation(child_of, p2).unwrap()));
    assert!(world.has(c, relation(child_of, p3).unwrap()));
}

#[test]
fn test_dont_fragment_values_and_marker_lifecycle() {
    let mut world = World::new();
    let position = world.component(ComponentOptions::named("Position")).unwrap();
    let child_of = world
        .component(ComponentOptions::named("ChildOf").dont_fragment())
        .unwrap();

    let p1 = world.spawn();
    let p2 = world.spawn();
    let c = world.spawn();
    world.set(c, position, Value::new(0u8)).unwrap();
    world.set(c, relation(child_of, p1).unwrap(), Value::new("first")).unwrap();
    world.set(c, relation(child_of, p2).unwrap(), Value::new("second")).unwrap();
    world.sync().unwrap();

    assert_eq!(
        world
            .get(c, relation(child_of, p1).unwrap())
            .unwrap()
            .downcast_ref::<&str>(),
        Some(&"first")
    );
    let pairs = world.relations(c, wildcard(child_of).unwrap()).unwrap();
    assert_eq!(
        sorted(pairs.iter().map(|(t, _)| *t).collect()),
        sorted(vec![p1, p2])
    );
    drop(pairs);

    // Dropping one relation keeps the marker; dropping the last removes it
    world.remove(c, relation(child_of, p1).unwrap()).unwrap();
    world.sync().unwrap();
    assert!(world.has(c, wildcard(child_of).unwrap()));

    world.remove(c, relation(child_of, p2).unwrap()).unwrap();
    world.sync().unwrap();
    assert!(!world.has(c, wildcard(child_of).unwrap()));
    assert!(world.query(&[wildcard(child_of).unwrap()]).unwrap().is_empty());
    assert_eq!(world.query(&[position]).unwrap(), vec![c]);
}

#[test]
fn test_query_on_concrete_dont_fragment_relation() {
    let mut world = World::new();
    let child_of = world
        .component(ComponentOptions::named("ChildOf").dont_fragment())
        .unwrap();

    let p1 = world.spawn();
    let p2 = world.spawn();
    let kids: Vec<Id> = (0..6)
        .map(|i| {
            let kid = world.spawn();
            let parent = if i % 2 == 0 { p1 } else { p2 };
            world.add(kid, relation(child_of, parent).unwrap()).unwrap();
            kid
        })
        .collect();
    world.sync().unwrap();

    // All six children share one archetype; the concrete relation narrows
    // the result per row
    let of_p1 = world.query(&[relation(child_of, p1).unwrap()]).unwrap();
    assert_eq!(sorted(of_p1), sorted(vec![kids[0], kids[2], kids[4]]));

    let not_p1 = world
        .query_filtered(
            &[wildcard(child_of).unwrap()],
            &[relation(child_of, p1).unwrap()],
        )
        .unwrap();
    assert_eq!(sorted(not_p1), sorted(vec![kids[1], kids[3], kids[5]]));
}

#[test]
fn test_wildcard_writes_are_rejected() {
    let mut world = World::new();
    let tag = world.component(ComponentOptions::named("Tag")).unwrap();
    let e = world.spawn();

    let star = wildcard(tag).unwrap();
    assert_eq!(
        world.set(e, star, Value::unit()),
        Err(EcsError::IllegalWildcardWrite(star))
    );
}

#[test]
fn test_mixed_bases_stay_independent() {
    let mut world = World::new();
    let child_of = world
        .component(ComponentOptions::named("ChildOf").dont_fragment())
        .unwrap();
    let likes = world.component(ComponentOptions::named("Likes")).unwrap();

    let p = world.spawn();
    let q = world.spawn();
    let e = world.spawn();
    world.add(e, relation(child_of, p).unwrap()).unwrap();
    world.add(e, relation(likes, q).unwrap()).unwrap();
    world.sync().unwrap();

    world.remove(e, wildcard(child_of).unwrap()).unwrap();
    world.sync().unwrap();

    assert!(!world.has(e, wildcard(child_of).unwrap()));
    assert!(world.has(e, relation(likes, q).unwrap()));
}
