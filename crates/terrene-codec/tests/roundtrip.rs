//! End-to-end codec tests through the public API: entity round-trips,
//! prefab deltas, world snapshots and their degradation paths.

use std::rc::Rc;

use terrene_codec::{
    AllFields, ComponentIdTable, EntityCodec, PersistedComponents, Verbosity, WorldCodec,
};
use terrene_entity::{
    Component, ComponentRegistry, EntityManager, Events, FieldValue, PrefabData, Scope,
};

#[derive(Component, Clone, Default, PartialEq, Debug)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Component, Clone, Default, PartialEq, Debug)]
struct Health {
    value: i32,
}

fn registry() -> Rc<ComponentRegistry> {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("warn")
        .try_init();
    let mut registry = ComponentRegistry::new();
    registry.register::<Position>();
    registry.register::<Health>();
    Rc::new(registry)
}

fn entity_codec(registry: &Rc<ComponentRegistry>) -> EntityCodec {
    let table = ComponentIdTable::from_registry(registry);
    EntityCodec::new(Rc::clone(registry), table)
        .with_component_check(Box::new(PersistedComponents))
        .with_ignored_entity_ids(true)
}

#[test]
fn entity_round_trip_preserves_components() {
    let registry = registry();
    let mut em = EntityManager::with_registry(Rc::clone(&registry));
    let codec = entity_codec(&registry);

    let original = em.create(vec![
        Box::new(Position {
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }),
        Box::new(Health { value: 100 }),
    ]);

    let record = codec.serialize(&em, &original, true, &AllFields).unwrap();
    let restored = codec.deserialize(&mut em, &record, Events::Fire);

    assert_ne!(restored.id(), original.id());
    assert_eq!(
        restored.component::<Health>(&em),
        Some(&Health { value: 100 })
    );
    assert_eq!(
        restored.component::<Position>(&em),
        Some(&Position {
            x: 0.0,
            y: 0.0,
            z: 0.0,
        })
    );
}

#[test]
fn prefab_delta_is_minimal() {
    let registry = registry();
    let mut em = EntityManager::with_registry(Rc::clone(&registry));
    let codec = entity_codec(&registry);

    let mut prefab = PrefabData::new("creature");
    prefab.set_component(Box::new(Health { value: 100 }));
    em.prefabs_mut().publish(prefab).unwrap();

    let entity = em.create_from_prefab("creature");

    // untouched instance serializes as an empty delta
    let record = codec.serialize(&em, &entity, true, &AllFields).unwrap();
    assert_eq!(record.parent_prefab.as_deref(), Some("creature"));
    assert!(record.is_empty());

    // one changed field serializes as exactly one field
    let mut health = entity.component::<Health>(&em).cloned().unwrap();
    health.value = 50;
    entity.save_component(&mut em, health);

    let record = codec.serialize(&em, &entity, true, &AllFields).unwrap();
    assert_eq!(record.component_ids.len(), 1);
    assert_eq!(record.field_counts, vec![1]);
    assert_eq!(record.field_values, vec![FieldValue::I32(50)]);
    assert!(record.removed.is_empty());

    // applying the delta to a fresh instance of the prefab restores it
    let restored = codec.deserialize(&mut em, &record, Events::Fire);
    assert_eq!(
        restored.component::<Health>(&em),
        Some(&Health { value: 50 })
    );
    assert_eq!(restored.parent_prefab(&em).as_deref(), Some("creature"));
}

#[test]
fn prefab_delta_records_removed_components() {
    let registry = registry();
    let mut em = EntityManager::with_registry(Rc::clone(&registry));
    let codec = entity_codec(&registry);

    let mut prefab = PrefabData::new("armored");
    prefab.set_component(Box::new(Health { value: 10 }));
    prefab.set_component(Box::new(Position::default()));
    em.prefabs_mut().publish(prefab).unwrap();

    let entity = em.create_from_prefab("armored");
    entity.remove_component::<Position>(&mut em).unwrap();

    let record = codec.serialize(&em, &entity, true, &AllFields).unwrap();
    assert_eq!(record.removed.len(), 1);

    let restored = codec.deserialize(&mut em, &record, Events::Fire);
    assert!(!restored.has_component::<Position>(&em));
    assert!(restored.has_component::<Health>(&em));
}

#[test]
fn serialize_changes_of_nothing_is_none() {
    let registry = registry();
    let mut em = EntityManager::with_registry(Rc::clone(&registry));
    let codec = entity_codec(&registry);

    let entity = em.create(vec![Box::new(Health { value: 5 })]);
    assert!(
        codec
            .serialize_changes(&em, &entity, &[], &[], &[], &AllFields)
            .is_none()
    );

    let record = codec
        .serialize_changes(
            &em,
            &entity,
            &[std::any::TypeId::of::<Health>()],
            &[],
            &[],
            &AllFields,
        )
        .unwrap();
    assert_eq!(record.component_ids.len(), 1);
}

#[test]
fn changed_components_merge_onto_live_entities() {
    let registry = registry();
    let mut em = EntityManager::with_registry(Rc::clone(&registry));
    let codec = entity_codec(&registry);

    let source = em.create(vec![
        Box::new(Health { value: 77 }),
        Box::new(Position {
            x: 1.0,
            y: 2.0,
            z: 3.0,
        }),
    ]);
    let record = codec
        .serialize_changes(
            &em,
            &source,
            &[],
            &[std::any::TypeId::of::<Health>()],
            &[],
            &AllFields,
        )
        .unwrap();

    let target = em.create(vec![Box::new(Health { value: 1 })]);
    codec.deserialize_onto(&mut em, target.id(), &record);
    assert_eq!(
        target.component::<Health>(&em),
        Some(&Health { value: 77 })
    );
    assert!(!target.has_component::<Position>(&em));
}

#[test]
fn world_snapshot_round_trips_through_bytes() {
    let registry = registry();
    let mut em = EntityManager::with_registry(Rc::clone(&registry));
    let codec = WorldCodec::new(Rc::clone(&registry));

    let mut prefab = PrefabData::new("tree");
    prefab.set_component(Box::new(Health { value: 30 }));
    em.prefabs_mut().publish(prefab).unwrap();

    let tree = em.create_from_prefab("tree");
    let loose = em.create(vec![Box::new(Position {
        x: 4.0,
        y: 5.0,
        z: 6.0,
    })]);
    let tree_id = tree.id();
    let loose_id = loose.id();

    let mut bytes = Vec::new();
    codec
        .save_to(&em, Verbosity::PersistedOnly, &mut bytes)
        .unwrap();

    let mut loaded = EntityManager::with_registry(Rc::clone(&registry));
    codec.load_from(&mut loaded, &mut bytes.as_slice()).unwrap();

    assert!(loaded.prefabs().exists("tree"));
    assert_eq!(
        loaded.component::<Health>(tree_id),
        Some(&Health { value: 30 })
    );
    assert_eq!(
        loaded.component::<Position>(loose_id),
        Some(&Position {
            x: 4.0,
            y: 5.0,
            z: 6.0,
        })
    );
    // ids continue after the snapshot, never reused
    assert_eq!(loaded.next_id(), em.next_id());
    let fresh = loaded.create_empty();
    assert!(fresh.id().as_raw() >= em.next_id());
}

#[test]
fn world_snapshot_round_trips_through_a_file() {
    let registry = registry();
    let mut em = EntityManager::with_registry(Rc::clone(&registry));
    let codec = WorldCodec::new(Rc::clone(&registry));

    let entity = em.create(vec![Box::new(Health { value: 12 })]);
    let id = entity.id();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("world.trnw");
    {
        let mut file = std::fs::File::create(&path).unwrap();
        codec.save_to(&em, Verbosity::PersistedOnly, &mut file).unwrap();
    }

    let mut loaded = EntityManager::with_registry(Rc::clone(&registry));
    let mut file = std::fs::File::open(&path).unwrap();
    codec.load_from(&mut loaded, &mut file).unwrap();
    assert_eq!(loaded.component::<Health>(id), Some(&Health { value: 12 }));
}

#[test]
fn prefab_parents_resolve_regardless_of_record_order() {
    let registry = registry();
    let mut em = EntityManager::with_registry(Rc::clone(&registry));
    let codec = WorldCodec::new(Rc::clone(&registry));

    let mut base = PrefabData::new("base");
    base.set_component(Box::new(Health { value: 100 }));
    em.prefabs_mut().publish(base).unwrap();

    let mut child = PrefabData::new("child");
    child.set_parent(Some("base".into()));
    child.set_component(Box::new(Health { value: 40 }));
    em.prefabs_mut().publish(child).unwrap();

    let entity = em.create_from_prefab("child");
    let id = entity.id();

    let mut record = codec.serialize(&em, Verbosity::PersistedOnly);
    // force the child record to appear before its parent
    record.prefabs.sort_by(|a, b| a.name.cmp(&b.name));
    assert_eq!(record.prefabs[0].name, "base");
    record.prefabs.reverse();
    assert_eq!(record.prefabs[0].name, "child");

    let mut loaded = EntityManager::with_registry(Rc::clone(&registry));
    codec.deserialize(&mut loaded, &record);

    let child = loaded.prefabs().get("child").unwrap();
    assert_eq!(child.parent().unwrap().name(), "base");
    assert_eq!(
        loaded.component::<Health>(id),
        Some(&Health { value: 40 })
    );
}

#[test]
fn orphan_prefabs_are_dropped_but_siblings_survive() {
    let registry = registry();
    let mut em = EntityManager::with_registry(Rc::clone(&registry));
    let codec = WorldCodec::new(Rc::clone(&registry));

    let mut good = PrefabData::new("good");
    good.set_component(Box::new(Health { value: 1 }));
    em.prefabs_mut().publish(good).unwrap();

    let mut record = codec.serialize(&em, Verbosity::PersistedOnly);
    let mut orphan = record.prefabs[0].clone();
    orphan.name = "orphan".into();
    orphan.parent = Some("never-published".into());
    record.prefabs.push(orphan);

    let mut loaded = EntityManager::with_registry(Rc::clone(&registry));
    codec.deserialize(&mut loaded, &record);

    assert!(loaded.prefabs().exists("good"));
    assert!(!loaded.prefabs().exists("orphan"));
}

#[test]
fn unknown_component_types_are_skipped_on_load() {
    let registry = registry();
    let mut em = EntityManager::with_registry(Rc::clone(&registry));
    let codec = WorldCodec::new(Rc::clone(&registry));

    let entity = em.create(vec![Box::new(Health { value: 8 })]);
    let id = entity.id();

    let mut record = codec.serialize(&em, Verbosity::PersistedOnly);
    // pretend the snapshot came from a build with one more component type
    let ghost_id = record.component_types.len() as u32;
    record.component_types.push("Ghost".into());
    record.entities[0].component_ids.push(ghost_id);
    record.entities[0].field_counts.push(0);

    let mut loaded = EntityManager::with_registry(Rc::clone(&registry));
    codec.deserialize(&mut loaded, &record);
    assert_eq!(loaded.component::<Health>(id), Some(&Health { value: 8 }));
}

#[test]
fn non_persisted_entities_need_verbose_snapshots() {
    let registry = registry();
    let mut em = EntityManager::with_registry(Rc::clone(&registry));
    let codec = WorldCodec::new(Rc::clone(&registry));

    let mut prefab = PrefabData::new("ephemeral");
    prefab.set_persisted(false);
    prefab.set_component(Box::new(Health { value: 3 }));
    em.prefabs_mut().publish(prefab).unwrap();
    em.create_from_prefab("ephemeral");

    let lean = codec.serialize(&em, Verbosity::PersistedOnly);
    assert!(lean.entities.is_empty());

    let verbose = codec.serialize(&em, Verbosity::All);
    assert_eq!(verbose.entities.len(), 1);
}

#[test]
fn sector_scope_survives_a_snapshot() {
    let registry = registry();
    let mut em = EntityManager::with_registry(Rc::clone(&registry));
    let codec = WorldCodec::new(Rc::clone(&registry));

    let entity = em.create_sector_entity(9_000, 900);
    let id = entity.id();

    let record = codec.serialize(&em, Verbosity::PersistedOnly);
    let mut loaded = EntityManager::with_registry(Rc::clone(&registry));
    codec.deserialize(&mut loaded, &record);

    assert_eq!(loaded.scope_of(id), Scope::Sector);
    assert_eq!(loaded.pool_of(id), Some(terrene_entity::PoolId::Sector));
    let sim = loaded
        .component::<terrene_entity::SectorSimulation>(id)
        .unwrap();
    assert_eq!(sim.unloaded_max_delta, 9_000);
}
