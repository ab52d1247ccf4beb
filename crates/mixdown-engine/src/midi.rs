//! MIDI client selection

use crate::device::DeviceError;

/// Sibling MIDI backend. Event routing lives outside the mixer.
pub trait MidiClient: Send {
    fn name(&self) -> &str;

    /// Raw clients deliver byte streams instead of sequenced events
    fn is_raw(&self) -> bool;
}

/// Client used when no MIDI backend can be opened
#[derive(Debug, Default)]
pub struct DummyMidiClient;

impl DummyMidiClient {
    pub const NAME: &'static str = "dummy";
}

impl MidiClient for DummyMidiClient {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_raw(&self) -> bool {
        true
    }
}

type OpenFn = dyn Fn() -> Result<Box<dyn MidiClient>, DeviceError> + Send + Sync;

/// Named MIDI client factory tried by `Mixer::init_devices`
pub struct MidiCandidate {
    name: String,
    open: Box<OpenFn>,
}

impl MidiCandidate {
    pub fn new<F>(name: impl Into<String>, open: F) -> Self
    where
        F: Fn() -> Result<Box<dyn MidiClient>, DeviceError> + Send + Sync + 'static,
    {
        Self { name: name.into(), open: Box::new(open) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn open(&self) -> Result<Box<dyn MidiClient>, DeviceError> {
        (self.open)()
    }
}
