//! Print a summary of a recorded stream

use anyhow::Result;
use std::collections::BTreeSet;
use std::path::PathBuf;

use insight_core::replay::DecodedReplay;

use crate::source;

/// 100ns ticks per second
const TICKS_PER_SECOND: f64 = 10_000_000.0;

fn print_summary(replay: &DecodedReplay) {
    if let Some(header) = &replay.header {
        println!("=== Stream ===");
        println!("App version: {}", header.app_version);
        println!("Tick rate: {} Hz", header.tick_rate_hz);
        println!("Format version: {}", header.format_version);
    }
    println!("Chunks: {}", replay.chunks);

    if let Some(vr) = &replay.vr_header {
        println!();
        println!("=== Session ===");
        println!("Device: {} ({} Hz)", vr.device_name, vr.display_frequency);
        println!("Machine: {} / {} / {}", vr.pc_name, vr.cpu_details, vr.gpu_details);
        println!("OS: {}", vr.operating_system);
        println!("Engine: {} {}", vr.engine, vr.engine_version);
        println!("Project: {}", vr.project_name);
        if !vr.city.is_empty() || !vr.country.is_empty() {
            println!(
                "Location: {}, {}, {} ({:.3}, {:.3})",
                vr.city, vr.region, vr.country, vr.latitude, vr.longitude
            );
        }
    }

    println!();
    println!("=== Ticks ===");
    println!("Ticks: {}", replay.ticks.len());
    if let (Some(first), Some(last)) = (replay.ticks.first(), replay.ticks.last()) {
        let span = (last.tick.time_ticks - first.tick.time_ticks) as f64 / TICKS_PER_SECOND;
        println!("Duration: {:.2}s", span);

        let ids: BTreeSet<u32> = replay.ticks.iter().flat_map(|t| t.objects.keys().copied()).collect();
        let max_live = replay.ticks.iter().map(|t| t.objects.len()).max().unwrap_or(0);
        let written: usize = replay.ticks.iter().map(|t| t.tick.num_objects as usize).sum();
        let destroyed: usize = replay.ticks.iter().map(|t| t.destroyed.len()).sum();
        println!("Distinct objects: {}", ids.len());
        println!("Max live objects: {}", max_live);
        println!("Object entries written: {}", written);
        println!("Objects destroyed: {}", destroyed);
    }

    let scenes: Vec<&str> = replay
        .ticks
        .iter()
        .filter_map(|t| t.tick.scene_name.as_deref())
        .collect();
    let events: Vec<&str> = replay
        .ticks
        .iter()
        .filter_map(|t| t.tick.event_name.as_deref())
        .collect();
    if !scenes.is_empty() {
        println!("Scene announcements: {}", scenes.len());
    }
    if !events.is_empty() {
        println!();
        println!("=== Events ===");
        for event in events {
            println!("  {}", event);
        }
    }
}

/// Decode and summarize a stream
pub fn execute(path: PathBuf) -> Result<()> {
    println!("Inspecting: {}", path.display());
    println!();

    let replay = source::decode(&path)?;
    print_summary(&replay);

    if let Some(error) = &replay.error {
        println!();
        println!("=== Decode Error ===");
        println!("{}", error);
        println!("({} ticks decoded before the error)", replay.ticks.len());
    }
    Ok(())
}
