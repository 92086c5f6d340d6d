//! Startup detection of an attached fuzzing engine.
//!
//! An engine running the harness in persistent mode publishes the id of its
//! shared-memory test-case segment in [`SHM_FUZZ_ENV_VAR`] and keeps the
//! fork-server descriptors of [`crate::engine`] open. Persistent mode needs
//! both: an attachable segment and a completed handshake. Anything less (a
//! missing or stale variable, a segment we cannot attach, no engine on the
//! descriptors) quietly falls back to reading a single case from stdin.

use crate::engine::{EngineError, ForkServer};
use crate::source::ShmChannel;
use std::fmt;
use std::sync::OnceLock;
use tracing::debug;

/// Environment variable carrying the engine's test-case segment id.
pub const SHM_FUZZ_ENV_VAR: &str = "__AFL_SHM_FUZZ_ID";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Many cases per process, delivered over shared memory.
    Persistent,
    /// Exactly one case, read from stdin or a file.
    OneShot,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Persistent => f.write_str("persistent"),
            Mode::OneShot => f.write_str("one-shot"),
        }
    }
}

/// Everything persistent mode runs on.
#[derive(Debug)]
pub struct EngineAttachment {
    pub channel: ShmChannel,
    pub fork_server: ForkServer,
}

/// Result of [`detect`]. `engine` is present exactly in persistent mode.
#[derive(Debug)]
pub struct Detection {
    pub mode: Mode,
    pub engine: Option<EngineAttachment>,
}

impl Detection {
    fn one_shot() -> Self {
        Self {
            mode: Mode::OneShot,
            engine: None,
        }
    }
}

static MODE: OnceLock<Mode> = OnceLock::new();

/// Inspects the process environment and the engine descriptors.
pub fn detect() -> Detection {
    detect_with(|key| std::env::var(key).ok(), ForkServer::connect)
}

/// Same as [`detect`] with an injectable environment lookup and engine
/// connection. `connect` only runs once a segment has been attached.
pub fn detect_with<F, C>(lookup: F, connect: C) -> Detection
where
    F: Fn(&str) -> Option<String>,
    C: FnOnce() -> Result<ForkServer, EngineError>,
{
    let Some(raw_id) = lookup(SHM_FUZZ_ENV_VAR) else {
        debug!("no engine channel advertised");
        return Detection::one_shot();
    };

    let channel = match ShmChannel::from_env_value(&raw_id) {
        Ok(channel) => channel,
        Err(e) => {
            debug!(error = %e, "engine channel unusable, falling back to one-shot");
            return Detection::one_shot();
        }
    };

    match connect() {
        Ok(fork_server) => {
            debug!(shm_id = channel.id(), "attached engine test-case channel");
            Detection {
                mode: Mode::Persistent,
                engine: Some(EngineAttachment {
                    channel,
                    fork_server,
                }),
            }
        }
        Err(e) => {
            debug!(error = %e, "no engine behind the advertised channel, falling back to one-shot");
            Detection::one_shot()
        }
    }
}

/// Records the process-wide mode. Only the first call has any effect; the
/// value actually in force is returned.
pub fn install(mode: Mode) -> Mode {
    *MODE.get_or_init(|| mode)
}
