//! # Compressed Space Walkthrough
//!
//! Headless demo: three rooms A <-> B <-> C overlap one volume. A crate is
//! pushed from A into B, then the viewpoint walks through the same portal
//! and B becomes the active room.
//!
//! Pass a settings file to override the defaults:
//!
//! ```text
//! quantum_walkthrough [settings.toml]
//! ```

use std::process::ExitCode;
use std::time::Instant;

use quantum::graph::RoomGraph;
use quantum::materials::{BaseMaterial, MaterialKind};
use quantum::portals::Collider;
use quantum::shared::{BaseMaterialId, ColliderId, PortalFrame, Quat, RoomId, Vec3};
use quantum::{CompressedSpace, EntityDesc, PortalDesc, PortalMaterials, QuantumSettings, SpaceEvent, SpaceResult};

fn portal_materials(first_id: u32) -> PortalMaterials {
    PortalMaterials {
        stencil: BaseMaterial::new(BaseMaterialId::new(first_id), "portal_stencil", 1990, MaterialKind::PortalStencil),
        surface: BaseMaterial::new(BaseMaterialId::new(first_id + 1), "portal_surface", 2000, MaterialKind::PortalSurface),
        view: BaseMaterial::new(BaseMaterialId::new(first_id + 2), "portal_view", 2010, MaterialKind::PortalView),
    }
}

fn print_masks(space: &CompressedSpace, rooms: &[(&str, RoomId)]) {
    for (name, room) in rooms {
        match space.layer_mask(*room) {
            Some(mask) if space.is_room_visible(*room) => {
                let marker = if space.active_room() == Some(*room) { " (active)" } else { "" };
                println!("   Room {name}: mask {mask}{marker}");
            }
            _ => println!("   Room {name}: hidden"),
        }
    }
}

fn run(settings: QuantumSettings) -> SpaceResult<()> {
    // =========================================================================
    // STEP 1: Build the level
    // =========================================================================
    let mut graph = RoomGraph::new();
    let a = graph.add_room("A");
    let b = graph.add_room("B");
    let c = graph.add_room("C");
    let (ab, ba) = graph.create_portal_pair(a, b)?;
    let (bc, cb) = graph.create_portal_pair(b, c)?;
    graph.set_start_room(a)?;
    let rooms = [("A", a), ("B", b), ("C", c)];

    let mut space = CompressedSpace::new(graph, settings)?;
    let events = space.events();

    let origin = PortalFrame::new(Vec3::ZERO, Quat::IDENTITY);
    let side = PortalFrame::new(Vec3::new(10.0, 0.0, 0.0), Quat::IDENTITY);
    for (first_id, portal, frame) in [
        (100, ab, origin),
        (103, ba, origin.reversed()),
        (106, bc, side),
        (109, cb, side.reversed()),
    ] {
        space.spawn_portal(PortalDesc {
            portal,
            frame,
            width: 2.0,
            height: 3.0,
            materials: portal_materials(first_id),
        })?;
    }

    let wall = BaseMaterial::object(BaseMaterialId::new(1), "wall", 2000);
    for (name, room) in rooms {
        space.spawn(
            EntityDesc::new(format!("wall {name}"), room)
                .at(Vec3::new(0.0, 0.0, -20.0))
                .with_material(wall.clone())
                .static_entity(),
        )?;
    }
    let crate_id = space.spawn(
        EntityDesc::new("crate", a)
            .at(Vec3::new(0.0, 0.0, -0.5))
            .with_material(wall.clone())
            .with_collision_layer(3),
    )?;

    let start = Instant::now();
    space.start()?;
    println!("\n[1] Level started in {}us", start.elapsed().as_micros());
    print_masks(&space, &rooms);
    println!("   Wall variants cached: {}", space.registry().variant_count(wall.id));

    // =========================================================================
    // STEP 2: Push the crate through A -> B
    // =========================================================================
    println!("\n[2] Pushing the crate through A -> B");
    space.collider_entered(ab, Collider::solid(ColliderId::new(1), crate_id))?;
    for z in [-0.5, -0.05, 0.05] {
        space.move_entity(crate_id, Vec3::new(0.0, 0.0, z))?;
        for event in space.tick()? {
            println!("   z = {z:>5}: {event:?}");
        }
        if let Some(record) = space.entity(crate_id) {
            let transitions = record.applied_materials().iter().filter(|v| v.is_transition()).count();
            println!("   z = {z:>5}: {transitions} transition variants");
        }
    }
    // After the crossing the crate is tracked by B -> A; leaving both triggers
    // ends its traversal.
    for portal in [ab, ba] {
        space.collider_exited(portal, Collider::solid(ColliderId::new(1), crate_id))?;
    }
    let room = space.room_of(crate_id).and_then(|r| rooms.iter().find(|(_, id)| *id == r));
    println!("   Crate now in room {}", room.map_or("?", |(name, _)| *name));

    // =========================================================================
    // STEP 3: Walk the viewpoint through A -> B
    // =========================================================================
    println!("\n[3] Walking the viewpoint through A -> B");
    space.set_viewpoint(Vec3::new(0.0, 0.0, -0.5));
    space.viewpoint_entered(ab)?;
    for z in [-0.5, -0.2, 0.05] {
        space.set_viewpoint(Vec3::new(0.0, 0.0, z));
        let tick_start = Instant::now();
        space.tick()?;
        let overlay = space.overlay();
        println!(
            "   z = {z:>5}: overlay {} (write bit {:#04b}) in {}us",
            if overlay.visible { "on " } else { "off" },
            overlay.write_bit,
            tick_start.elapsed().as_micros()
        );
    }
    print_masks(&space, &rooms);

    // =========================================================================
    // STEP 4: Summary
    // =========================================================================
    let sent = events.drain();
    let passes = sent
        .iter()
        .filter(|e| matches!(e, SpaceEvent::LayerPassCompleted { .. }))
        .count();
    let stats = space.registry().stats();
    println!("\n[4] Summary");
    println!("   Events: {} ({passes} layer passes)", sent.len());
    println!(
        "   Variants: {} created, {} reused, {} disposed, {} transitions",
        stats.created, stats.reused, stats.disposed, stats.transitions_created
    );
    println!("   Wall variants cached: {}", space.registry().variant_count(wall.id));
    Ok(())
}

fn main() -> ExitCode {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              QUANTUM - Compressed Space Walkthrough        ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let settings = match std::env::args().nth(1) {
        Some(path) => match QuantumSettings::from_toml_file(&path) {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Failed to load {path}: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => QuantumSettings::default(),
    };
    println!("   Max layers: {}, log level: {:?}", settings.max_layers, settings.log_level);

    match run(settings) {
        Ok(()) => {
            println!("\n✓ Walkthrough complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("\n✗ Walkthrough failed: {e}");
            ExitCode::FAILURE
        }
    }
}
