use async_trait::async_trait;

use dbb::{
    dbb_core::firmware::{dummy_signature, FirmwareImage},
    firmware::{Progress, ReplugPrompt},
    proto::{DeviceMode, FIRMWARE_CHUNKS, FIRMWARE_SIG_LEN},
    Error, Executor, FirmwareUpgrade, Replug, UpgradeConfig,
};
use dbb_sim::{Sim, SimReplug};

mod helpers;
use helpers::{setup_logging, PASSWORD};

/// Development firmware config (unsigned, dummy signature)
fn dev_config() -> UpgradeConfig {
    UpgradeConfig {
        signed: false,
        dummy_signature: true,
        lock: true,
    }
}

fn dev_image() -> FirmwareImage {
    FirmwareImage::from_bytes(&[0x5a; 10_000], false).unwrap()
}

fn upgrade<R: Replug>(
    sim: &Sim,
    replug: R,
    config: UpgradeConfig,
) -> FirmwareUpgrade<dbb_sim::SimProvider, R> {
    setup_logging();

    FirmwareUpgrade::new(
        Executor::detached().unwrap(),
        sim.provider(),
        replug,
        PASSWORD,
        config,
    )
}

/// Replug handler that aborts touch confirmations once the new firmware starts
struct AbortOnStart(SimReplug, Sim);

#[async_trait]
impl Replug for AbortOnStart {
    async fn replug(&self, prompt: ReplugPrompt) -> Result<(), Error> {
        if prompt == ReplugPrompt::StartApplication {
            self.1.set_abort_touch(true);
        }
        self.0.replug(prompt).await
    }
}

/// Replug handler that never replugs
struct NoReplug;

#[async_trait]
impl Replug for NoReplug {
    async fn replug(&self, _prompt: ReplugPrompt) -> Result<(), Error> {
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn upgrade_dev_firmware() -> anyhow::Result<()> {
    setup_logging();

    let s = Sim::new(Some(PASSWORD));
    let image = dev_image();

    dbb_tests::upgrade::test(
        Executor::detached()?,
        s.provider(),
        s.replugger(),
        PASSWORD,
        dev_config(),
        &image,
    )
    .await?;

    let st = s.state();
    assert_eq!(st.mode, DeviceMode::Application);
    assert_eq!(st.flash, image.as_bytes());
    assert_eq!(st.chunks_written, FIRMWARE_CHUNKS);
    assert!(!st.bootloader_unlocked);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn upgrade_signed_firmware() -> anyhow::Result<()> {
    let s = Sim::new(Some(PASSWORD));

    // Signature block followed by the firmware body
    let mut source = vec![0xa5; FIRMWARE_SIG_LEN];
    source.extend_from_slice(&[0x11; 5000]);
    s.state().expected_signature = Some(hex::encode([0xa5; FIRMWARE_SIG_LEN]));

    let u = upgrade(&s, s.replugger(), UpgradeConfig::default());
    let image = u.load(&source[..])?;
    assert_eq!(image.source_len(), 5000);

    let r = u.run(&image, |_p| ()).await?;
    assert!(r.relocked);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn upgrade_from_bootloader() -> anyhow::Result<()> {
    let s = Sim::new(Some(PASSWORD));
    {
        let mut st = s.state();
        st.mode = DeviceMode::Bootloader;
        st.bootloader_unlocked = true;
    }

    let u = upgrade(&s, s.replugger(), dev_config());
    let r = u.run(&dev_image(), |_p| ()).await?;

    assert_eq!(r.chunks_written, FIRMWARE_CHUNKS);
    assert!(r.relocked);

    // Unlock is skipped when starting in the bootloader
    assert!(!s
        .state()
        .commands
        .iter()
        .any(|c| c.contains("unlock")));

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unlock_aborted() -> anyhow::Result<()> {
    let s = Sim::new(Some(PASSWORD));
    s.set_abort_touch(true);

    let u = upgrade(&s, s.replugger(), dev_config());
    let r = u.run(&dev_image(), |_p| ()).await;
    assert!(matches!(r, Err(Error::UserAborted)), "{r:?}");

    // No bootloader traffic
    let st = s.state();
    assert_eq!(st.mode, DeviceMode::Application);
    assert_eq!(st.boot_frames, 0);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn bootloader_not_entered() -> anyhow::Result<()> {
    let s = Sim::new(Some(PASSWORD));

    let u = upgrade(&s, NoReplug, dev_config());
    let r = u.run(&dev_image(), |_p| ()).await;
    assert!(
        matches!(
            r,
            Err(Error::ModeMismatch(
                DeviceMode::Application,
                DeviceMode::Bootloader
            ))
        ),
        "{r:?}"
    );
    assert_eq!(s.state().boot_frames, 0);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn stuck_in_bootloader() -> anyhow::Result<()> {
    let s = Sim::new(Some(PASSWORD));
    s.state().boot_to_app = false;

    let u = upgrade(&s, s.replugger(), dev_config());
    let r = u.run(&dev_image(), |_p| ()).await;
    assert!(
        matches!(
            r,
            Err(Error::ModeMismatch(
                DeviceMode::Bootloader,
                DeviceMode::Application
            ))
        ),
        "{r:?}"
    );

    // Firmware was written before the failure
    assert!(s.state().verified);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn chunk_write_failure() -> anyhow::Result<()> {
    let s = Sim::new(Some(PASSWORD));
    s.state().fail_chunk = Some(3);

    let u = upgrade(&s, s.replugger(), dev_config());

    let mut progress = vec![];
    let r = u
        .run(&dev_image(), |p: Progress| progress.push(p.written))
        .await;

    match r {
        Err(Error::UnexpectedResponse(m)) => assert!(m.contains("write chunk 3"), "{m}"),
        r => panic!("unexpected result: {r:?}"),
    }

    // Progress stops at the failed chunk
    assert_eq!(progress, vec![1, 2, 3]);
    assert_eq!(s.state().mode, DeviceMode::Bootloader);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn signature_rejected() -> anyhow::Result<()> {
    let s = Sim::new(Some(PASSWORD));
    s.state().expected_signature = Some("00".repeat(FIRMWARE_SIG_LEN));

    let u = upgrade(&s, s.replugger(), dev_config());
    let r = u.run(&dev_image(), |_p| ()).await;

    match r {
        Err(Error::UnexpectedResponse(m)) => assert!(m.contains("verify"), "{m}"),
        r => panic!("unexpected result: {r:?}"),
    }
    assert!(!s.state().verified);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn transfer_requires_bootloader() -> anyhow::Result<()> {
    let s = Sim::new(Some(PASSWORD));

    let u = upgrade(&s, s.replugger(), dev_config());
    let r = u.transfer(&dev_image(), |_p| ()).await;

    assert!(
        matches!(
            r,
            Err(Error::ModeMismatch(
                DeviceMode::Application,
                DeviceMode::Bootloader
            ))
        ),
        "{r:?}"
    );
    assert_eq!(s.state().boot_frames, 0);
    assert_eq!(s.state().reports, 0);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn lock_aborted_after_upgrade() -> anyhow::Result<()> {
    let s = Sim::new(Some(PASSWORD));

    let u = upgrade(&s, AbortOnStart(s.replugger(), s.clone()), dev_config());
    let r = u.run(&dev_image(), |_p| ()).await?;

    // Upgrade succeeds, bootloader remains unlocked
    assert!(!r.relocked);
    assert!(s.state().bootloader_unlocked);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn device_unplugged() -> anyhow::Result<()> {
    let s = Sim::new(Some(PASSWORD));
    s.unplug();

    let u = upgrade(&s, s.replugger(), dev_config());
    let r = u.run(&dev_image(), |_p| ()).await;
    assert!(matches!(r, Err(Error::DeviceNotFound)), "{r:?}");

    Ok(())
}

#[test]
fn dummy_signature_matches_sim() {
    let image = dev_image();
    let sig = hex::encode(dummy_signature(&image));

    assert_eq!(sig, image.signature_hex());
    assert_eq!(sig.len(), FIRMWARE_SIG_LEN * 2);
}
