// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Encrypted envelope tests

use log::{debug, info};

use dbb::{proto::Reply, Error, Executor};

const LED_TOGGLE: &str = r#"{"led":"toggle"}"#;

/// Exchange encrypted commands with the correct and an incorrect password
pub async fn test(e: &Executor, password: &str) -> anyhow::Result<()> {
    // Correct password returns a decrypted reply
    let r = e.execute(LED_TOGGLE, Some(password)).await?;
    info!("reply: {}", r);

    let reply = Reply::parse(&r)?;
    assert_eq!(reply.status("led"), Some("toggle"));

    // Incorrect password is rejected by the device
    let wrong = format!("{password}-wrong");
    let r = e.execute(LED_TOGGLE, Some(&wrong)).await;
    debug!("wrong password: {:?}", r);

    match r {
        Err(Error::DeviceReported(_)) | Err(Error::Decrypt(_)) => (),
        Ok(v) => match Reply::parse(&v).ok().and_then(|r| r.error()) {
            Some(_) => (),
            None => anyhow::bail!("wrong password accepted: {}", v),
        },
        Err(e) => return Err(e.into()),
    }

    // Failures are reported as a marker via the string continuation
    let (tx, rx) = tokio::sync::oneshot::channel();
    e.enqueue(LED_TOGGLE, Some(&wrong), move |s| {
        let _ = tx.send(s);
    });

    let s = rx.await?;
    let reply = Reply::parse(&s)?;
    assert!(reply.error().is_some(), "expected failure marker: {s}");

    Ok(())
}
