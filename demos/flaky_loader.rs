use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use stale_loader::Invocation;
use stale_loader::Loader;
use stale_loader::LoaderOptions;
use stale_loader::PendingOperation;

use rand::Rng;
use tokio::sync::Notify;

/// A slow lookup which fails on even numbers.
async fn get(key: usize) -> Result<String, String> {
    let num = rand::rng().random_range(100..400);
    tokio::time::sleep(Duration::from_millis(num)).await;

    if num % 2 == 0 {
        return Err(format!("key: {key}, BAD NUMBER: {num}"));
    }
    Ok(format!("key: {key}, duration: {num}"))
}

/// Run each lookup as its own task, so a superseded lookup can be aborted.
fn spawn_get(key: usize) -> Invocation<String, String> {
    let task = tokio::spawn(get(key));
    let abort = task.abort_handle();
    let op = PendingOperation::new(async move {
        task.await
            .map_err(|err| format!("key: {key}, {err}"))
            .and_then(|result| result)
    })
    .with_abort_handle(abort);
    Invocation::Pending(op)
}

/// Pretend to be a render loop. Every frame we ask the loader for the current key, which moves
/// on every 300ms. Frames show whatever the loader has: the fresh value, a stale value, nothing,
/// or the last error. Whenever a lookup settles between frames we are told to redraw early.
#[tokio::main]
async fn main() {
    let redraw = Arc::new(Notify::new());
    let notify = redraw.clone();
    let options = LoaderOptions::<String, String>::default()
        .timeout(Duration::from_millis(150))
        .on_settled(move |_| notify.notify_one());
    let loader = Loader::with_options(spawn_get, options);

    let start = Instant::now();
    for frame in 0..40 {
        let key = start.elapsed().as_millis() as usize / 300;
        match loader.call(key) {
            Ok(Some(value)) => println!("frame {frame:2}: {value}"),
            Ok(None) => println!("frame {frame:2}: loading key {key}"),
            Err(err) => println!("frame {frame:2}: failed: {err}"),
        }
        tokio::select! {
            _ = redraw.notified() => println!("redraw requested"),
            _ = tokio::time::sleep(Duration::from_millis(50)) => (),
        }
    }
    println!(
        "calls: {}, deduplicated: {}",
        loader.request_count(),
        loader.request_deduplicated_count()
    );
}
