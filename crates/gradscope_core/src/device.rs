#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Device {
    CPU,
}

impl Device {
    pub fn name(&self) -> String {
        match self {
            Device::CPU => "CPU".to_string(),
        }
    }
}

thread_local! {
    static DEFAULT_DEVICE: std::cell::Cell<Device> = const { std::cell::Cell::new(Device::CPU) };
}

pub fn get_default_device() -> Device {
    DEFAULT_DEVICE.with(|d| d.get())
}

pub fn set_default_device(device: Device) {
    DEFAULT_DEVICE.with(|d| d.set(device));
}

pub fn auto_set_device() {
    set_default_device(Device::CPU);
}

type FinalizeHook = Arc<dyn Fn() + Send + Sync>;

static FINALIZE_HOOKS: LazyLock<Mutex<Vec<FinalizeHook>>> = LazyLock::new(|| Mutex::new(Vec::new()));

/// Registers a hook fired by [`finalize_device`].
///
/// Hooks stay registered across finalizations; process-wide caches use this
/// to drop state that references device resources.
pub fn on_device_finalize<F>(hook: F)
where
    F: Fn() + Send + Sync + 'static,
{
    FINALIZE_HOOKS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(Arc::new(hook));
}

/// Signals device teardown to every registered hook.
///
/// Hooks run after the registry lock is released, so a hook may register
/// further hooks. Those fire from the next finalization on.
pub fn finalize_device() {
    let hooks: Vec<FinalizeHook> = FINALIZE_HOOKS.lock().unwrap_or_else(PoisonError::into_inner).clone();
    log::debug!("finalizing device, notifying {} subscribers", hooks.len());
    for hook in &hooks {
        hook();
    }
}
