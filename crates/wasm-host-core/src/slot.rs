//! Process-wide engine slot.
//!
//! Only one execution host may be alive per process. The slot records the
//! id of the host holding it; [`EngineSlot::acquire`] checks it out and
//! dropping the returned guard puts it back.

use parking_lot::{Mutex, const_mutex};
use tracing::{debug, error};
use uuid::Uuid;

use wasm_host_common::HostError;

static ENGINE_SLOT: Mutex<Option<Uuid>> = const_mutex(None);

/// Checked-out engine slot. Releases the slot on drop.
#[derive(Debug)]
pub struct EngineSlot {
    owner: Uuid,
}

impl EngineSlot {
    /// Claim the slot for `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::SingletonViolation`] if another host holds it.
    pub fn acquire(owner: Uuid) -> Result<Self, HostError> {
        let mut slot = ENGINE_SLOT.lock();

        if let Some(current) = *slot {
            error!(
                holder = %current,
                requester = %owner,
                "Execution host constructed while another is alive"
            );
            return Err(HostError::SingletonViolation {
                owner: current.to_string(),
            });
        }

        *slot = Some(owner);
        debug!(owner = %owner, "Engine slot acquired");

        Ok(Self { owner })
    }

    /// Returns `true` if some host currently holds the slot.
    pub fn is_held() -> bool {
        ENGINE_SLOT.lock().is_some()
    }

    /// The host id this guard was acquired for.
    pub fn owner(&self) -> Uuid {
        self.owner
    }
}

impl Drop for EngineSlot {
    fn drop(&mut self) {
        let mut slot = ENGINE_SLOT.lock();
        if *slot == Some(self.owner) {
            *slot = None;
            debug!(owner = %self.owner, "Engine slot released");
        }
    }
}
