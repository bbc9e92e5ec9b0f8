use async_stream::stream;
use futures::stream::Stream;
use futures::stream::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use shelf_sdk::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Statistics collected during a save simulation
#[derive(Clone, Debug)]
pub struct SimulationStats {
    pub strategy: Strategy,
    pub num_objects: usize,
    pub num_edits: usize,
    pub saves_attempted: usize,
    pub saves_failed: usize,
    pub total_time: Duration,
    pub avg_save_time: Duration,
    pub edits_per_second: f64,
    pub converged: usize,
}

impl SimulationStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Save Simulation Statistics                     ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Strategy:                  {:>38} ║", format!("{:?}", self.strategy));
        println!("║  Number of Objects:         {:>38} ║", self.num_objects);
        println!("║  Edits:                     {:>38} ║", self.num_edits);
        println!("║  Saves Attempted:           {:>38} ║", self.saves_attempted);
        println!("║  Saves Failed:              {:>38} ║", self.saves_failed);
        println!("║  Total Time:                {:>39}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Average Save Time:         {:>36}µs ║", format!("{:.2}", self.avg_save_time.as_micros()));
        println!("║  Edits/Second:              {:>38.0} ║", self.edits_per_second);
        println!("║  Objects Matching Remote:   {:>38} ║", format!("{}/{}", self.converged, self.num_objects));
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

/// One random local edit
#[derive(Clone, Debug)]
enum Edit {
    Increment(i64),
    Tag(u8),
    Untag(u8),
}

/// Generator that yields (object index, edit) pairs
fn edit_generator(num_objects: usize, num_edits: usize) -> impl Stream<Item = (usize, Edit)> {
    stream! {
        let mut rng = StdRng::from_entropy();
        for _ in 0..num_edits {
            let object = rng.gen_range(0..num_objects);
            let edit = match rng.gen_range(0..4) {
                0 | 1 => Edit::Increment(rng.gen_range(-5..=10)),
                2 => Edit::Tag(rng.gen_range(0..8)),
                _ => Edit::Untag(rng.gen_range(0..8)),
            };
            yield (object, edit);
        }
    }
}

fn apply_edit<R: RemoteStore>(client: &Client<R>, handle: &Handle, edit: &Edit) {
    let result = match edit {
        Edit::Increment(amount) => client.increment(handle, "count", (*amount).into()),
        Edit::Tag(tag) => client.add_unique(handle, "tags", vec![json!(format!("tag{}", tag))]),
        Edit::Untag(tag) => client.remove(handle, "tags", vec![json!(format!("tag{}", tag))]),
    };
    if let Err(e) = result {
        warn!(error = %e, "edit rejected");
    }
}

/// Random edits across objects, with saves fired while editing continues
pub async fn simulate_saves(
    strategy: Strategy,
    num_objects: usize,
    num_edits: usize,
    failure_rate: f64,
) -> SimulationStats {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Save Simulation ({:?})                      ║", strategy);
    println!("║  Objects: {} | Edits: {} | Failure rate: {:.2} ║",
             num_objects, num_edits, failure_rate);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();

    let remote = Arc::new(MemoryRemote::with_latency(Duration::from_micros(200)));
    let config = ClientConfigBuilder::new()
        .strategy(strategy)
        .max_save_attempts(2)
        .retry_backoff(Duration::from_millis(1))
        .build();
    let client = Arc::new(Client::new(remote.clone(), config));

    let handles: Vec<Handle> = (0..num_objects).map(|_| client.object("Counter")).collect();

    println!("\n[Phase 1/3] Editing with saves in the background...");

    let mut rng = StdRng::from_entropy();
    let mut edits = Box::pin(edit_generator(num_objects, num_edits));
    let mut saves = vec![];

    while let Some((idx, edit)) = edits.next().await {
        apply_edit(&client, &handles[idx], &edit);

        if rng.gen_bool(0.1) {
            if rng.gen_bool(failure_rate) {
                remote.fail_next(1);
            }
            let client = Arc::clone(&client);
            let handle = handles[idx].clone();
            saves.push(tokio::spawn(async move {
                let started = Instant::now();
                let result = client.save(&handle).await;
                (result.is_ok(), started.elapsed())
            }));
        }

        if saves.len() % 50 == 0 {
            tokio::task::yield_now().await;
        }
    }

    println!("[Phase 1/3] ✓ Completed");
    println!("[Phase 2/3] Waiting for background saves...");

    let mut save_times = vec![];
    let mut saves_failed = 0;
    let saves_attempted = saves.len();
    for save in saves {
        match save.await {
            Ok((ok, elapsed)) => {
                save_times.push(elapsed);
                if !ok {
                    saves_failed += 1;
                }
            }
            Err(e) => warn!(error = %e, "save task panicked"),
        }
    }

    println!("[Phase 2/3] ✓ Completed");
    println!("[Phase 3/3] Flushing remaining edits...");

    for handle in &handles {
        for _ in 0..3 {
            if client.save(handle).await.is_ok() {
                break;
            }
        }
    }

    let converged = handles
        .iter()
        .filter(|handle| matches_remote(&client, remote.as_ref(), handle))
        .count();

    let total_time = start.elapsed();

    let avg_save_time = if !save_times.is_empty() {
        save_times.iter().sum::<Duration>() / save_times.len() as u32
    } else {
        Duration::ZERO
    };
    let edits_per_second = num_edits as f64 / total_time.as_secs_f64();

    println!("[Phase 3/3] ✓ Completed");

    SimulationStats {
        strategy,
        num_objects,
        num_edits,
        saves_attempted,
        saves_failed,
        total_time,
        avg_save_time,
        edits_per_second,
        converged,
    }
}

/// Whether local estimates equal what the remote stored.
fn matches_remote(client: &Client<MemoryRemote>, remote: &MemoryRemote, handle: &Handle) -> bool {
    let Ok(identity) = client.identity(handle) else {
        return false;
    };
    let dirty = client.is_dirty(handle, None).unwrap_or(true);
    match (remote.get(&identity), client.attributes(handle)) {
        (Some(stored), Ok(local)) => !dirty && stored == local,
        _ => false,
    }
}

/// Repeat the simulation with a growing number of objects
pub async fn simulate_scaling(max_objects: usize, step_size: usize) {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║      Scaling Analysis - Saves vs Object Count             ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let mut current_objects = step_size;
    while current_objects <= max_objects {
        let stats = simulate_saves(Strategy::SingleInstance, current_objects, current_objects * 50, 0.1).await;
        stats.print();
        current_objects += step_size;
    }
}
