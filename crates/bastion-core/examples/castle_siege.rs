//! Castle siege example: a settlement raising walls and a keep with two
//! builders.
//!
//! Spawns a handful of structures, starts every build it can, retries the
//! ones waiting for a builder, skips the keep upgrade, and prints each
//! completion as the notification bus delivers it.
//!
//! Run with: `RUST_LOG=bastion_core=debug cargo run -p bastion-core --example castle_siege`

use std::cell::RefCell;
use std::rc::Rc;

use bastion_core::blueprint::{Blueprint, BlueprintRegistryBuilder};
use bastion_core::config::SettlementConfig;
use bastion_core::construction::{BuildLevel, BuildRequirement, GraphicsSetup};
use bastion_core::fixed::{f64_to_seconds, seconds_to_f64};
use bastion_core::id::{ResourceId, StructureId};
use bastion_core::notify::{ConstructionEvent, EventKind};
use bastion_core::settlement::Settlement;

fn level(max_hit_points: u32, stone: u32, build_time: f64) -> BuildLevel {
    BuildLevel {
        max_hit_points,
        build_cost: BuildRequirement {
            resources: vec![(ResourceId(0), stone)],
            prerequisites: Vec::new(),
            build_time: f64_to_seconds(build_time),
        },
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // --- Blueprints ---

    let mut builder = BlueprintRegistryBuilder::new();
    let keep = builder
        .register(
            Blueprint::new(
                "keep",
                true,
                vec![level(800, 40, 12.0), level(1500, 80, 20.0)],
            )
            .with_graphics(GraphicsSetup {
                construction_graphic: true,
                upgrade_graphic: true,
            }),
        )
        .unwrap();
    let tower = builder
        .register(Blueprint::new("tower", true, vec![level(300, 15, 6.0)]))
        .unwrap();
    let wall = builder
        .register(Blueprint::new("wall", true, vec![level(120, 5, 0.0)]))
        .unwrap();
    let registry = builder.build().unwrap();

    let config = SettlementConfig {
        builder_count: 2,
        ..Default::default()
    };
    let mut settlement = Settlement::new(config, registry);

    // --- Listeners ---

    let log = Rc::new(RefCell::new(Vec::<String>::new()));
    let log_clone = log.clone();
    settlement.bus_mut().on_passive(
        EventKind::BuildCompleted,
        Box::new(move |event| {
            if let ConstructionEvent::BuildCompleted {
                structure,
                completed_at,
            } = event
            {
                log_clone.borrow_mut().push(format!(
                    "structure {structure} finished at {:.1}s",
                    seconds_to_f64(*completed_at)
                ));
            }
        }),
    );

    // --- Place and start ---

    let keep1 = settlement.spawn(keep, "keep1").unwrap();
    let mut pending: Vec<StructureId> = vec![keep1];
    for i in 0..3 {
        pending.push(settlement.spawn(tower, &format!("tower{i}")).unwrap());
    }
    for i in 0..4 {
        pending.push(settlement.spawn(wall, &format!("wall{i}")).unwrap());
    }

    let dt = f64_to_seconds(1.0);
    while !pending.is_empty() {
        pending.retain(|&id| match settlement.start_build(id) {
            Ok(_) => false,
            Err(err) => {
                tracing::debug!(structure = %id, error = %err, "waiting for a builder");
                true
            }
        });
        settlement.step(dt);
    }

    // Upgrade the keep once it stands, then skip the wait.
    while settlement.is_building(keep1) {
        settlement.step(dt);
    }
    settlement.upgrade(keep1).unwrap();
    println!(
        "keep1 upgrade needs {:.1}s, skipping",
        settlement.construction_time_remaining(keep1)
    );
    settlement.skip_build(keep1).unwrap();

    while settlement.structures().any(|c| c.is_building(settlement.timers())) {
        settlement.step(dt);
    }
    settlement.step(dt);

    // --- Report ---

    for line in log.borrow().iter() {
        println!("{line}");
    }
    for c in settlement.structures() {
        println!(
            "{:>7}  level {}  hp {:>5}  {:?}",
            c.uid(),
            c.current_level(),
            c.max_hit_points(),
            c.phase()
        );
    }
    println!(
        "done at {:.1}s with {} idle builders",
        seconds_to_f64(settlement.now()),
        settlement.builders().idle_count()
    );
}
