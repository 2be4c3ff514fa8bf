use clap::Parser;
use colored::*;
use lockfree_collections::{LockFreeQueue, LockFreeStack};
use rand::Rng;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Command-line arguments for the lock-free collections demo
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Print every operation performed by the walkthrough
    #[arg(short, long)]
    verbose: bool,

    /// Run a stress test with many concurrent producers and consumers
    #[arg(short, long)]
    stress_test: bool,

    /// Run a smaller verification test (faster than the full stress test)
    #[arg(long)]
    quick_test: bool,
}

fn main() {
    let args = Args::parse();

    println!("{}", "Lock-Free Collections Demonstration".green().bold());
    println!("=====================================\n");

    if args.stress_test {
        stress_test();
    } else if args.quick_test {
        quick_verification_test();
    } else {
        stack_walkthrough(args.verbose);
        queue_walkthrough(args.verbose);
    }

    println!("\n{}", "Demonstration complete!".green().bold());
}

/// Basic single-threaded walkthrough of the stack operations
fn stack_walkthrough(verbose: bool) {
    println!("{}", "Stack walkthrough...".yellow().bold());

    let stack = LockFreeStack::new();

    println!("Pushing values 1, 2, 3 onto the stack");
    for i in 1..=3 {
        stack.push(i);
        if verbose {
            println!("  pushed {}, stack is now {:?}", i, stack);
        }
    }

    println!("Top of stack (peek): {:?}", stack.peek());
    println!("Stack size: {}", stack.len());

    println!("Popping values from the stack:");
    while let Some(value) = stack.pop() {
        println!("  popped: {}", value);
    }

    println!("Stack is now empty: {}\n", stack.is_empty());
}

/// Basic single-threaded walkthrough of the queue operations
fn queue_walkthrough(verbose: bool) {
    println!("{}", "Queue walkthrough...".yellow().bold());

    let queue = LockFreeQueue::new();

    println!("Adding values 1, 2, 3 to the queue");
    for i in 1..=3 {
        queue.add(i);
        if verbose {
            println!("  added {}, queue is now {:?}", i, queue);
        }
    }

    println!("Taking values from the queue (front first):");
    while let Some(value) = queue.get() {
        println!("  got: {}", value);
    }

    println!("Queue is now empty: {}\n", queue.is_empty());
}

/// Runs mixed concurrent operations against both containers and verifies
/// that no element is lost or duplicated.
fn stress_test() {
    println!(
        "{}",
        "Running stress test with concurrent operations..."
            .yellow()
            .bold()
    );

    let num_threads = 8;
    let operations_per_thread = 10_000;
    run_conservation_check(num_threads, operations_per_thread);
}

/// Run a quick verification test with fewer operations
fn quick_verification_test() {
    println!("{}", "Running quick verification test...".yellow().bold());
    run_conservation_check(2, 500);
}

fn run_conservation_check(num_threads: usize, operations_per_thread: usize) {
    let stack = Arc::new(LockFreeStack::new());
    let queue = Arc::new(LockFreeQueue::new());

    println!(
        "Spawning {} threads with {} operations each",
        num_threads, operations_per_thread
    );

    let start = Instant::now();
    let mut handles = Vec::new();

    for thread_id in 0..num_threads {
        let stack = Arc::clone(&stack);
        let queue = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            let mut rng = rand::rng();
            let mut inserted: usize = 0;
            let mut removed: usize = 0;

            for op in 0..operations_per_thread {
                let value = (thread_id * operations_per_thread + op) as u64;

                // 60% chance to insert, 40% chance to remove
                if rng.random::<f32>() < 0.6 {
                    stack.push(value);
                    queue.add(value);
                    inserted += 1;
                } else {
                    if stack.pop().is_some() {
                        removed += 1;
                    }
                    if queue.get().is_some() {
                        removed += 1;
                    }
                }
            }

            (inserted, removed)
        });
        handles.push(handle);
    }

    let mut total_inserted = 0;
    let mut total_removed = 0;
    for handle in handles {
        let (inserted, removed) = handle.join().expect("worker thread panicked");
        // Each insert round touches both containers.
        total_inserted += inserted * 2;
        total_removed += removed;
    }

    let mut residual = 0;
    while stack.pop().is_some() {
        residual += 1;
    }
    while queue.get().is_some() {
        residual += 1;
    }

    let elapsed = start.elapsed();
    println!("Completed in {:.2}s", elapsed.as_secs_f32());
    println!("Total insertions:        {}", total_inserted);
    println!("Total removals:          {}", total_removed);
    println!("Residual after draining: {}", residual);

    assert_eq!(
        total_inserted,
        total_removed + residual,
        "element conservation violated"
    );
    println!("{}", "Conservation check passed!".green().bold());
}
