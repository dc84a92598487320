//! Scripted USB host for integration testing.
//!
//! Tests plug and unplug devices with [`ScriptedUsbHost::attach`] and
//! [`ScriptedUsbHost::detach`]; the watcher thread picks the change up on its
//! next poll exactly as it would with real hardware.

use std::collections::VecDeque;
use std::sync::Mutex;

use devlink_core::{Backend, DeviceError, ProbeError};

use super::UsbHost;

/// A [`UsbHost`] whose device list and prompt answers are set by the test.
pub struct ScriptedUsbHost {
    supported: bool,
    devices: Mutex<Vec<Backend>>,
    prompt_answers: Mutex<VecDeque<Result<Backend, DeviceError>>>,
    list_calls: Mutex<usize>,
}

impl ScriptedUsbHost {
    /// A host with USB support and no devices.
    pub fn new() -> Self {
        Self {
            supported: true,
            devices: Mutex::new(Vec::new()),
            prompt_answers: Mutex::new(VecDeque::new()),
            list_calls: Mutex::new(0),
        }
    }

    /// A host that lacks USB support.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    /// Plugs in an authorized device.
    pub fn attach(&self, backend: Backend) {
        self.devices.lock().expect("lock poisoned").push(backend);
    }

    /// Unplugs the device with `id`.
    pub fn detach(&self, id: &str) {
        self.devices
            .lock()
            .expect("lock poisoned")
            .retain(|b| b.id != id);
    }

    /// Queues the answer of the next authorization prompt.
    ///
    /// An `Ok` answer also attaches the device, the way a real prompt makes
    /// the picked device show up in subsequent `list()` calls.
    pub fn answer_prompt(&self, answer: Result<Backend, DeviceError>) {
        self.prompt_answers
            .lock()
            .expect("lock poisoned")
            .push_back(answer);
    }

    /// Number of `list()` calls so far.
    pub fn list_calls(&self) -> usize {
        *self.list_calls.lock().expect("lock poisoned")
    }
}

impl Default for ScriptedUsbHost {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbHost for ScriptedUsbHost {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn list(&self) -> Result<Vec<Backend>, ProbeError> {
        *self.list_calls.lock().expect("lock poisoned") += 1;
        if !self.supported {
            return Err(ProbeError::Unsupported("USB"));
        }
        Ok(self.devices.lock().expect("lock poisoned").clone())
    }

    fn request_new(&self) -> Result<Backend, DeviceError> {
        let answer = self
            .prompt_answers
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .unwrap_or(Err(DeviceError::UserCancelled));
        if let Ok(backend) = &answer {
            self.attach(backend.clone());
        }
        answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_and_detach_change_list() {
        let host = ScriptedUsbHost::new();
        host.attach(Backend::usb("A", None));
        host.attach(Backend::usb("B", None));

        host.detach("A");

        assert_eq!(host.list().unwrap(), vec![Backend::usb("B", None)]);
        assert_eq!(host.list_calls(), 1);
    }

    #[test]
    fn test_successful_prompt_attaches_device() {
        let host = ScriptedUsbHost::new();
        host.answer_prompt(Ok(Backend::usb("C", None)));

        let picked = host.request_new().unwrap();

        assert_eq!(picked.id, "C");
        assert_eq!(host.list().unwrap().len(), 1);
    }

    #[test]
    fn test_unanswered_prompt_is_cancelled() {
        let host = ScriptedUsbHost::new();
        assert_eq!(host.request_new(), Err(DeviceError::UserCancelled));
    }
}
