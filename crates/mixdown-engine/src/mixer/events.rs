use mixdown_core::QualitySettings;

/// Notifications published to `Mixer::subscribe` receivers
#[derive(Debug, Clone, PartialEq)]
pub enum MixerEvent {
    QualitySettingsChanged(QualitySettings),
    SampleRateChanged { processing: u32, output: u32 },
    /// A period finished rendering
    NextAudioBuffer { period: u64 },
    AudioDeviceChanged(String),
}
