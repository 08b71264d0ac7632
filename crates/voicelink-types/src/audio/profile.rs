use std::str::FromStr;

/// Microphone constraint profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicProfile {
    #[default]
    Standard,
    /// Aggressive processing for noisy rooms.
    Isolation,
    /// Raw capture, all processing disabled.
    HighFidelity,
}

impl MicProfile {
    pub fn noise_suppression(&self) -> bool {
        !matches!(self, MicProfile::HighFidelity)
    }

    pub fn echo_cancellation(&self) -> bool {
        !matches!(self, MicProfile::HighFidelity)
    }

    pub fn auto_gain(&self) -> bool {
        matches!(self, MicProfile::Isolation)
    }
}

impl FromStr for MicProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "standard" => Ok(MicProfile::Standard),
            "isolation" => Ok(MicProfile::Isolation),
            "high_fidelity" | "hifi" => Ok(MicProfile::HighFidelity),
            other => Err(format!("unknown mic profile: {other}")),
        }
    }
}

/// Procedural background sound played under the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbientMode {
    #[default]
    Off,
    /// Low-passed sawtooth with a slow LFO on the cutoff.
    Drone,
    /// Band-limited white noise.
    Rain,
}

impl FromStr for AmbientMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(AmbientMode::Off),
            "drone" => Ok(AmbientMode::Drone),
            "rain" | "noise" => Ok(AmbientMode::Rain),
            other => Err(format!("unknown ambient mode: {other}")),
        }
    }
}
