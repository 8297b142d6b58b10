//! Device notifications against the in-memory loopback driver.
//!
//! Subscribes to a cyclic tank-level sample (with jitter, so the values
//! move) and an on-change recipe step, consumes a handful of
//! notifications, then tears everything down through the RAII path.
//!
//! Run with: `cargo run --example notifications`

use std::time::Duration;

use tlink::{Context, Driver, DriverExt, LoopbackDriver, SampleMode, SimConfig, Task, NO_TIMEOUT};

fn main() {
    let driver = LoopbackDriver::new(SimConfig {
        jitter: true,
        ..SimConfig::default()
    });
    driver.seed_value("Plant.Tank.Level", 42.0f64);
    driver.seed_value("Plant.Recipe.Step", 0u32);

    let ctx = Context::new();
    let dev = driver.clone();
    ctx.spawn_with(move |handle| {
        Task::new(async move {
            dev.connect(NO_TIMEOUT).await.expect("connect");

            let level = dev
                .subscribe::<f64>(
                    "Plant.Tank.Level",
                    SampleMode::Cyclic,
                    Duration::from_millis(100),
                )
                .await
                .expect("subscribe tank level");
            let step = dev
                .subscribe::<u32>("Plant.Recipe.Step", SampleMode::OnChange, NO_TIMEOUT)
                .await
                .expect("subscribe recipe step");

            for _ in 0..5 {
                if let Some(sample) = level.next().await {
                    println!("tank level: {sample:.3}");
                }
            }

            dev.write("Plant.Recipe.Step", 3u32, NO_TIMEOUT)
                .await
                .expect("write recipe step");
            if let Some(active) = step.next().await {
                println!("recipe step -> {active}");
            }

            drop(level);
            drop(step);
            dev.disconnect(NO_TIMEOUT).await.expect("disconnect");
            handle.stop();
        })
    });

    ctx.run();
}
