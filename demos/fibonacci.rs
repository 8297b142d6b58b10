//! Generator-style producer bridged over a typed channel.
//!
//! A foreign thread pushes the fibonacci prefix into a channel while a
//! consumer task on the context prints each value as it arrives, then shuts
//! the context down when the producer closes the stream.
//!
//! Run with: `cargo run --example fibonacci`

use std::thread;
use std::time::Duration;

use tlink::{Context, Task, TypedChannel};

fn main() {
    let ctx = Context::new();
    let chan: TypedChannel<u64> = TypedChannel::new();

    let consumer = chan.clone();
    ctx.spawn_with(|handle| {
        Task::new(async move {
            let mut index = 0u32;
            while let Some(value) = consumer.next().await {
                println!("fib({index}) = {value}");
                index += 1;
            }
            println!("sequence complete");
            handle.stop();
        })
    });

    let producer = thread::spawn(move || {
        let (mut a, mut b) = (0u64, 1u64);
        for _ in 0..10 {
            chan.push(a);
            let next = a + b;
            a = b;
            b = next;
            thread::sleep(Duration::from_millis(50));
        }
        chan.close();
    });

    ctx.run();
    producer.join().expect("producer thread");
}
