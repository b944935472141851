// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Simulated device personalities

use std::{
    io::ErrorKind,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use log::{debug, trace, warn};
use rand_core::{OsRng, RngCore};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use dbb::{
    firmware::{Replug, ReplugPrompt},
    transport::{HandleGuard, HandleRegistry},
    Connect, Error, Transport,
};
use dbb_core::{envelope, firmware::FirmwareImage};
use dbb_proto::{
    bootloader::BootCommand,
    command::{
        BackupAction, BootloaderAction, DeviceAction, LedAction, RandomMode, SignRequest,
    },
    envelope::Envelope,
    report, Command, DeviceMode, ReportSizes, ERR_TOUCH_ABORT, FIRMWARE_CHUNKS,
    FIRMWARE_CHUNK_LEN, FIRMWARE_LEN,
};

/// Firmware version reported by the simulator
pub const SIM_SERIAL_VERSION: &str = "v2.2.3-sim";

/// Bootloader version reply
const BOOTLOADER_VERSION: &[u8] = b"v1.0.1-sim";

/// Error code for malformed or unknown commands
const ERR_INVALID_COMMAND: u16 = 101;

/// Error code for commands requiring a password / seed
const ERR_NOT_READY: u16 = 102;

/// Shared simulator state, public for inspection by tests
#[derive(Clone, Debug)]
pub struct SimState {
    /// Current mode (as enumerated on the bus)
    pub mode: DeviceMode,
    /// Enumeration session, incremented on replug
    pub session: u64,

    /// Device password, commands must be encrypted when set
    pub password: Option<String>,
    /// Abort touch confirmed commands
    pub abort_touch: bool,
    /// Wallet seed present
    pub seeded: bool,
    /// Device name
    pub name: String,
    /// LED state
    pub led: bool,
    /// Device locked to the verification app
    pub locked: bool,
    /// Decoded application commands, in receipt order
    pub commands: Vec<String>,

    /// Bootloader accepts firmware writes
    pub bootloader_unlocked: bool,
    /// Start the application after a successful flash (otherwise stays in bootloader)
    pub boot_to_app: bool,
    /// Reply with a failure to this chunk index
    pub fail_chunk: Option<u8>,
    /// Flash contents
    pub flash: Vec<u8>,
    /// Chunk writes accepted since the last erase
    pub chunks_written: usize,
    /// Expected hex signature, defaults to the dummy signature over the flash
    pub expected_signature: Option<String>,
    /// Signature verified for the current flash
    pub verified: bool,

    /// Total report exchanges
    pub reports: usize,
    /// Bootloader frames received
    pub boot_frames: usize,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            mode: DeviceMode::Application,
            session: 0,
            password: Some("0000".to_string()),
            abort_touch: false,
            seeded: true,
            name: "Digital Bitbox".to_string(),
            led: false,
            locked: false,
            commands: vec![],
            bootloader_unlocked: false,
            boot_to_app: true,
            fail_chunk: None,
            flash: vec![0xff; FIRMWARE_LEN],
            chunks_written: 0,
            expected_signature: None,
            verified: false,
            reports: 0,
            boot_frames: 0,
        }
    }
}

/// Simulated device handle, clones share state
#[derive(Clone, Default)]
pub struct Sim {
    state: Arc<Mutex<SimState>>,
    /// Open transports keyed by enumeration session, each replug
    /// presents a new device identity
    handles: HandleRegistry<u64>,
}

impl Sim {
    /// Create a simulator with the provided password (`None` for a factory device)
    pub fn new(password: Option<&str>) -> Self {
        Self::from_state(SimState {
            password: password.map(str::to_string),
            ..Default::default()
        })
    }

    /// Create a simulator from an explicit state
    pub fn from_state(state: SimState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            handles: HandleRegistry::new(),
        }
    }

    /// Lock the simulator state
    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fetch the current mode
    pub fn mode(&self) -> DeviceMode {
        self.state().mode
    }

    /// Abort (or stop aborting) touch confirmed commands
    pub fn set_abort_touch(&self, abort: bool) {
        self.state().abort_touch = abort;
    }

    /// Open a transport to the device in its current session, at most one
    /// transport may be open per session
    pub fn transport(&self) -> Result<SimTransport, Error> {
        let session = {
            let s = self.state();
            if s.mode == DeviceMode::NoDevice {
                return Err(Error::DeviceNotFound);
            }
            s.session
        };

        let handle = self.handles.claim(session)?;

        Ok(SimTransport {
            sim: self.clone(),
            session,
            handle: Some(handle),
        })
    }

    /// Create a provider for this device
    pub fn provider(&self) -> SimProvider {
        SimProvider { sim: self.clone() }
    }

    /// Create a replug handler for this device
    pub fn replugger(&self) -> SimReplug {
        SimReplug::new(self.clone())
    }

    /// Remove the device from the bus
    pub fn unplug(&self) {
        let mut s = self.state();
        s.session += 1;
        s.mode = DeviceMode::NoDevice;
    }

    /// Simulate an unplug / replug cycle, `hold_touch` holds the touch
    /// button during power up (entering the bootloader when unlocked)
    pub fn replug(&self, hold_touch: bool) {
        let mut s = self.state();

        let previous = match s.mode {
            // Replug after an unplug powers up into the application
            DeviceMode::NoDevice | DeviceMode::Unknown => DeviceMode::Application,
            m => m,
        };

        let next = match previous {
            DeviceMode::Application if hold_touch && s.bootloader_unlocked => {
                DeviceMode::Bootloader
            }
            DeviceMode::Bootloader if !hold_touch && s.verified && s.boot_to_app => {
                DeviceMode::Application
            }
            m => m,
        };

        if next == DeviceMode::Bootloader && previous != DeviceMode::Bootloader {
            s.verified = false;
            s.chunks_written = 0;
        }

        debug!("sim replug: {} -> {}", previous, next);

        s.session += 1;
        s.mode = next;
    }
}

impl SimState {
    /// Handle an application report payload, returning the reply string
    fn handle_app(&mut self, payload: &[u8]) -> String {
        let req = match std::str::from_utf8(payload) {
            Ok(v) => v,
            Err(_) => return error_reply(ERR_INVALID_COMMAND, "Invalid command.", None),
        };

        match serde_json::from_str::<Envelope>(req) {
            Ok(Envelope {
                ciphertext: Some(_),
                ..
            }) => self.handle_encrypted(req),
            _ => {
                // Only ping and initial password setup are accepted in plaintext
                let allowed = match Command::decode(req) {
                    Ok(Command::Ping(_)) => true,
                    Ok(Command::Password(_)) => self.password.is_none(),
                    _ => self.password.is_none(),
                };
                if !allowed {
                    return error_reply(ERR_NOT_READY, "Command must be encrypted.", None);
                }

                self.command(req)
            }
        }
    }

    /// Handle an encrypted envelope
    fn handle_encrypted(&mut self, req: &str) -> String {
        let password = match &self.password {
            Some(p) => p.clone(),
            None => return input_error("Please set a password."),
        };

        let cmd = match envelope::decrypt(req, &password) {
            Ok(v) => v,
            Err(e) => {
                debug!("sim decrypt failed: {}", e);
                return input_error("Could not decrypt. Please try again.");
            }
        };

        // Replies are encrypted with the password used for the request
        let reply = self.command(&cmd);
        match envelope::encrypt(&reply, &password) {
            Ok(v) => v,
            Err(_) => input_error("Could not encrypt reply."),
        }
    }

    /// Execute a plaintext command
    fn command(&mut self, s: &str) -> String {
        let cmd = match Command::decode(s) {
            Ok(v) => v,
            Err(_) => return error_reply(ERR_INVALID_COMMAND, "Invalid command.", None),
        };

        trace!("sim command: {}", cmd.name());
        self.commands.push(s.to_string());

        let name = cmd.name();
        let r = match cmd {
            Command::Led(a) => {
                self.led = !self.led;
                match a {
                    LedAction::Toggle => json!({ "led": "toggle" }),
                    LedAction::Blink => json!({ "led": "blink" }),
                }
            }
            Command::Password(p) => {
                if p.is_empty() {
                    return error_reply(ERR_INVALID_COMMAND, "Invalid password.", Some(name));
                }
                self.password = Some(p);
                json!({ "password": "success" })
            }
            Command::Seed(_) => {
                self.seeded = true;
                json!({ "seed": "success" })
            }
            Command::Bootloader(a) => {
                if let Some(e) = self.touch(name) {
                    return e;
                }
                match a {
                    BootloaderAction::Unlock => {
                        self.bootloader_unlocked = true;
                        json!({ "bootloader": "unlock" })
                    }
                    BootloaderAction::Lock => {
                        self.bootloader_unlocked = false;
                        json!({ "bootloader": "lock" })
                    }
                }
            }
            Command::Sign(r) => {
                if !self.seeded {
                    return error_reply(ERR_NOT_READY, "A seed must be created.", Some(name));
                }
                if let Some(e) = self.touch(name) {
                    return e;
                }
                json!({ "sign": [{ "sig": sign(&r), "recid": "00" }] })
            }
            Command::Device(DeviceAction::Info) => json!({
                "device": {
                    "serial": "sim",
                    "version": SIM_SERIAL_VERSION,
                    "name": self.name,
                    "id": "",
                    "seeded": self.seeded,
                    "lock": self.locked,
                    "bootlock": !self.bootloader_unlocked,
                    "sdcard": false,
                }
            }),
            Command::Device(DeviceAction::Lock) => {
                if let Some(e) = self.touch(name) {
                    return e;
                }
                self.locked = true;
                json!({ "device": "lock" })
            }
            Command::Random(m) => {
                let mut b = [0u8; 16];
                match m {
                    RandomMode::True => OsRng.fill_bytes(&mut b),
                    RandomMode::Pseudo => {
                        let h = Sha256::digest(self.reports.to_le_bytes());
                        b.copy_from_slice(&h[..16]);
                    }
                }
                json!({ "random": hex::encode(b) })
            }
            Command::Ping(_) => match self.password.is_some() {
                true => json!({ "ping": "password" }),
                false => json!({ "ping": "false" }),
            },
            Command::Xpub(path) => {
                if !self.seeded {
                    return error_reply(ERR_NOT_READY, "A seed must be created.", Some(name));
                }
                json!({ "xpub": format!("xpub{}", hex::encode(Sha256::digest(path.as_bytes()))) })
            }
            Command::Name(n) => {
                self.name = n;
                json!({ "name": self.name })
            }
            Command::Backup(BackupAction::List) => json!({ "backup": [] }),
            Command::Backup(BackupAction::Erase) => json!({ "backup": "success" }),
            Command::Reset(_) => {
                if let Some(e) = self.touch(name) {
                    return e;
                }
                self.password = None;
                self.seeded = false;
                self.locked = false;
                json!({ "reset": "success" })
            }
            _ => return error_reply(ERR_INVALID_COMMAND, "Invalid command.", Some(name)),
        };

        r.to_string()
    }

    /// Touch confirmation, returning the abort reply when configured to abort
    fn touch(&self, command: &str) -> Option<String> {
        match self.abort_touch {
            true => Some(error_reply(ERR_TOUCH_ABORT, "Aborted by user.", Some(command))),
            false => None,
        }
    }

    /// Handle a bootloader frame, returning the reply payload
    fn handle_boot(&mut self, frame: &[u8]) -> Vec<u8> {
        self.boot_frames += 1;

        let cmd = match BootCommand::decode(frame) {
            Ok(v) => v,
            Err(e) => {
                warn!("sim bootloader decode failed: {}", e);
                return b"x1".to_vec();
            }
        };

        match cmd {
            BootCommand::Version => BOOTLOADER_VERSION.to_vec(),
            BootCommand::Erase => {
                self.flash.fill(0xff);
                self.chunks_written = 0;
                self.verified = false;
                b"e0".to_vec()
            }
            BootCommand::Write { index, chunk } => {
                let i = index as usize;
                if self.fail_chunk == Some(index) || i >= FIRMWARE_CHUNKS {
                    return b"w1".to_vec();
                }

                self.flash[i * FIRMWARE_CHUNK_LEN..][..FIRMWARE_CHUNK_LEN].copy_from_slice(chunk);
                self.chunks_written += 1;
                b"w0".to_vec()
            }
            BootCommand::Verify { signature } => {
                let expected = match &self.expected_signature {
                    Some(s) => s.clone(),
                    None => match FirmwareImage::from_bytes(&self.flash, false) {
                        Ok(i) => i.signature_hex(),
                        Err(_) => return b"s1".to_vec(),
                    },
                };

                self.verified = signature.eq_ignore_ascii_case(&expected);
                match self.verified {
                    true => b"s0".to_vec(),
                    false => b"s1".to_vec(),
                }
            }
        }
    }
}

/// Transport to a simulated device
pub struct SimTransport {
    sim: Sim,
    session: u64,
    handle: Option<HandleGuard<u64>>,
}

impl Transport for SimTransport {
    fn exchange(&mut self, payload: &[u8], sizes: ReportSizes) -> Result<Vec<u8>, Error> {
        if self.handle.is_none() {
            return Err(Error::DeviceNotFound);
        }

        let mut s = self.sim.state();

        // Handles do not survive re-enumeration
        if s.session != self.session || s.mode == DeviceMode::NoDevice {
            return Err(Error::Io(std::io::Error::new(
                ErrorKind::BrokenPipe,
                "device disconnected",
            )));
        }

        let frame = report::frame(payload, sizes.write)?;
        s.reports += 1;

        let mode = s.mode;
        let reply = match mode {
            DeviceMode::Bootloader => s.handle_boot(&frame),
            DeviceMode::Application => s.handle_app(report::payload(&frame)).into_bytes(),
            m => {
                return Err(Error::UnexpectedResponse(format!(
                    "device in {m} mode did not respond"
                )))
            }
        };

        Ok(report::frame(&reply, sizes.read)?)
    }

    fn is_open(&self) -> bool {
        let s = self.sim.state();
        self.handle.is_some() && s.session == self.session && s.mode != DeviceMode::NoDevice
    }

    fn close(&mut self) {
        self.handle = None;
    }
}

/// Connector for simulated devices
#[derive(Clone)]
pub struct SimProvider {
    sim: Sim,
}

#[async_trait]
impl Connect for SimProvider {
    async fn detect(&self) -> Result<DeviceMode, Error> {
        Ok(self.sim.mode())
    }

    async fn connect(&self) -> Result<Box<dyn Transport>, Error> {
        Ok(Box::new(self.sim.transport()?))
    }
}

/// Replug handler for simulated devices, holding the touch button
/// when prompted to enter the bootloader
#[derive(Clone)]
pub struct SimReplug {
    sim: Sim,
}

impl SimReplug {
    pub fn new(sim: Sim) -> Self {
        Self { sim }
    }
}

#[async_trait]
impl Replug for SimReplug {
    async fn replug(&self, prompt: ReplugPrompt) -> Result<(), Error> {
        debug!("sim replug prompt: {}", prompt);
        self.sim.replug(prompt == ReplugPrompt::EnterBootloader);
        Ok(())
    }
}

/// Build a device error reply
fn error_reply(code: u16, message: &str, command: Option<&str>) -> String {
    let mut e = json!({ "message": message, "code": code });
    if let (Some(c), Value::Object(m)) = (command, &mut e) {
        m.insert("command".to_string(), Value::from(c));
    }
    json!({ "error": e }).to_string()
}

/// Build an envelope input error reply
fn input_error(message: &str) -> String {
    serde_json::to_string(&Envelope::input_error(message)).unwrap_or_default()
}

/// Deterministic stand-in signature
fn sign(r: &SignRequest) -> String {
    let mut h = Sha256::new();
    h.update(r.data.as_bytes());
    h.update(r.keypath.as_bytes());
    hex::encode(Sha256::digest(h.finalize()))
}
