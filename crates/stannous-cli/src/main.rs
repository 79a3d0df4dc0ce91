use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use stannous_kernel::Kernel;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bounded-buffer demo on the cooperative kernel
    Run {
        /// Number of items the producer pushes through the buffer
        #[arg(long, default_value_t = 8)]
        items: usize,

        /// Buffer capacity
        #[arg(long, default_value_t = 3)]
        capacity: usize,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { items, capacity } => run_demo(items, capacity),
    }
}

/// Producer/consumer over one kernel lock and one condition variable. Both
/// sides re-check their predicate after waking, so a single broadcast
/// condition covers "not full" and "not empty".
fn run_demo(items: usize, capacity: usize) -> Result<()> {
    let kernel = Kernel::new();
    kernel.cond_init();

    let lid = kernel.lock_create("ring-buffer")?;
    let cid = kernel.cond_create("buffer-change", lid)?;

    println!("Starting bounded-buffer demo: {items} items, capacity {capacity}");

    let buffer: Arc<Mutex<VecDeque<usize>>> = Arc::new(Mutex::new(VecDeque::new()));

    let produced = Arc::clone(&buffer);
    let producer = kernel.spawn("producer", move |k| {
        for item in 0..items {
            k.lock_acquire(lid).expect("producer: acquire");
            while produced.lock().unwrap().len() == capacity {
                k.cond_wait(cid).expect("producer: wait");
            }
            produced.lock().unwrap().push_back(item);
            info!("produced {item}");
            k.cond_broadcast(cid).expect("producer: broadcast");
            k.lock_release(lid).expect("producer: release");
        }
    });

    let consumed = Arc::clone(&buffer);
    let consumer = kernel.spawn("consumer", move |k| {
        for _ in 0..items {
            k.lock_acquire(lid).expect("consumer: acquire");
            while consumed.lock().unwrap().is_empty() {
                k.cond_wait(cid).expect("consumer: wait");
            }
            let item = consumed.lock().unwrap().pop_front();
            info!("consumed {item:?}");
            k.cond_broadcast(cid).expect("consumer: broadcast");
            k.lock_release(lid).expect("consumer: release");
        }
    });

    kernel.join(producer);
    kernel.join(consumer);

    kernel.cond_free(cid)?;
    kernel.lock_free(lid)?;

    println!("All {items} items made it through the buffer.");
    Ok(())
}
