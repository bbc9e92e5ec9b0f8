use shelf_sdk::Strategy;
use simulation::{simulate_saves, simulate_scaling};
use tracing_subscriber::EnvFilter;
pub mod simulation;

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async_main());
    Ok(())
}

async fn async_main() {

    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            SAVE SIMULATIONS                                 ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Test 1: Single-Instance, reliable remote
    let stats = simulate_saves(Strategy::SingleInstance, 4, 200, 0.0).await;
    stats.print();

    // Test 2: Single-Instance, flaky remote
    let stats = simulate_saves(Strategy::SingleInstance, 10, 1000, 0.3).await;
    stats.print();

    // Test 3: Unique-Instance, flaky remote
    let stats = simulate_saves(Strategy::UniqueInstance, 10, 1000, 0.3).await;
    stats.print();

    // Test 4: Scaling analysis
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          SCALING ANALYSIS (Single-Instance)                ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    simulate_scaling(20, 5).await;

    println!("\n✓ All simulations completed successfully!");
}
