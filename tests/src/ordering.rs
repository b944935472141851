// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Command ordering tests

use std::sync::{Arc, Mutex};

use log::debug;
use tokio::sync::oneshot;

use dbb::{executor::State, Executor};

/// Enqueue `n` commands from separate threads in sequence, checking
/// continuations run in enqueue order and exactly once each
pub async fn test(e: &Executor, password: &str, n: usize) -> anyhow::Result<()> {
    if n == 0 {
        return Ok(());
    }

    let order = Arc::new(Mutex::new(Vec::with_capacity(n)));
    let (tx, rx) = oneshot::channel();
    let mut tx = Some(tx);

    for i in 0..n {
        let e = e.clone();
        let o = order.clone();
        let p = password.to_string();
        let done = match i == n - 1 {
            true => tx.take(),
            false => None,
        };

        // Each thread enqueues after the previous has returned
        std::thread::spawn(move || {
            e.enqueue(r#"{"led":"toggle"}"#, Some(&p), move |s| {
                debug!("complete {}: {}", i, s);
                o.lock().unwrap().push(i);
                if let Some(tx) = done {
                    let _ = tx.send(());
                }
            });
        })
        .join()
        .map_err(|_| anyhow::anyhow!("enqueue thread panicked"))?;
    }

    rx.await?;

    let order = order.lock().unwrap().clone();
    assert_eq!(order, (0..n).collect::<Vec<_>>());

    // Worker returns to idle once drained
    for _ in 0..100 {
        if e.state() == State::Idle {
            return Ok(());
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    anyhow::bail!("executor did not return to idle")
}
