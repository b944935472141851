// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Firmware upgrade tests

use log::info;

use dbb::{
    dbb_core::firmware::FirmwareImage, firmware::Progress, Connect, Executor, FirmwareUpgrade,
    Replug, UpgradeConfig,
};

/// Run a full firmware upgrade, checking progress is reported per chunk
pub async fn test<C, R>(
    e: Executor,
    connector: C,
    replug: R,
    password: &str,
    config: UpgradeConfig,
    image: &FirmwareImage,
) -> anyhow::Result<()>
where
    C: Connect,
    R: Replug,
{
    info!("upgrading firmware: {:?}", image);

    let lock = config.lock;
    let u = FirmwareUpgrade::new(e, connector, replug, password, config);

    let mut updates = vec![];
    let r = u
        .run(image, |p: Progress| {
            updates.push(p);
        })
        .await?;

    info!("upgrade result: {:?}", r);

    assert_eq!(r.chunks_written, image.num_chunks());
    assert_eq!(r.relocked, lock);

    // Progress is monotonic and ends at the total
    assert_eq!(updates.len(), image.num_chunks());
    for (i, p) in updates.iter().enumerate() {
        assert_eq!(p.written, i + 1);
        assert_eq!(p.total, image.num_chunks());
    }

    Ok(())
}
