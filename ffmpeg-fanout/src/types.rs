use std::{collections::HashSet, time::Duration};

use serde::Deserialize;

use crate::error::{FanoutError, Result};

// ============================================================================
// Output Targets
// ============================================================================

/// One destination the input stream is forwarded to.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct OutputTarget {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub destination: String,
    // e.g. "6000k", None = keep source rate
    #[serde(default)]
    pub video_bitrate: Option<String>,
    #[serde(default)]
    pub audio_bitrate: Option<String>,
    /// Force re-encoding even when no bitrate is given
    #[serde(default)]
    pub transcode: bool,
    /// Serve the stream as an RTSP server instead of pushing it
    #[serde(default)]
    pub listen: bool,
    /// Encoder executable for this target only
    #[serde(default)]
    pub encoder: Option<String>,
}

impl OutputTarget {
    pub fn new(name: &str, destination: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            destination: destination.to_string(),
            video_bitrate: None,
            audio_bitrate: None,
            transcode: false,
            listen: false,
            encoder: None,
        }
    }

    pub fn with_bitrates(mut self, video: &str, audio: &str) -> Self {
        self.video_bitrate = Some(video.to_string());
        self.audio_bitrate = Some(audio.to_string());
        self
    }

    pub fn with_transcode(mut self) -> Self {
        self.transcode = true;
        self
    }

    pub fn with_listen(mut self) -> Self {
        self.listen = true;
        self
    }

    pub fn with_encoder(mut self, encoder: &str) -> Self {
        self.encoder = Some(encoder.to_string());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Check that the destination uses a transport this target can drive.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(self.invalid("name is empty"));
        }

        let (scheme, rest) = self
            .destination
            .split_once("://")
            .ok_or_else(|| self.invalid("destination is not a URI"))?;
        if rest.is_empty() || rest.starts_with('/') {
            return Err(self.invalid("destination has no host"));
        }

        let scheme = scheme.to_ascii_lowercase();
        if self.listen {
            if scheme != "rtsp" {
                return Err(self.invalid("listening targets need an rtsp:// destination"));
            }
        } else if scheme != "rtmp" && scheme != "rtmps" {
            return Err(self.invalid("push targets need an rtmp:// or rtmps:// destination"));
        }

        for bitrate in [&self.video_bitrate, &self.audio_bitrate].into_iter().flatten() {
            if bitrate.trim().is_empty() {
                return Err(self.invalid("bitrate is empty"));
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> FanoutError {
        FanoutError::InvalidTarget {
            name: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Shutdown Policy
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownMode {
    /// Request termination of every worker, then wait for all of them.
    #[default]
    Parallel,
    /// Request and wait one worker at a time, in start order.
    Sequential,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ShutdownPolicy {
    pub mode: ShutdownMode,
    // None = wait forever for a worker to exit after SIGINT
    pub grace_period_ms: Option<u64>,
}

impl ShutdownPolicy {
    pub fn grace_period(&self) -> Option<Duration> {
        self.grace_period_ms.map(Duration::from_millis)
    }
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        Self {
            mode: ShutdownMode::Parallel,
            grace_period_ms: Some(5_000),
        }
    }
}

// ============================================================================
// Fan-out Settings
// ============================================================================

/// Everything the supervisor needs, fixed for the lifetime of the process.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FanoutSettings {
    pub input: String,
    /// Encoder executable, looked up on PATH when not absolute
    pub encoder: String,
    /// Prefix every forwarded line with `[name] `
    pub tag_output: bool,
    pub shutdown: ShutdownPolicy,
    pub targets: Vec<OutputTarget>,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            input: "rtmp://127.0.0.1:1935/live/stream".to_string(),
            encoder: "ffmpeg".to_string(),
            tag_output: true,
            shutdown: ShutdownPolicy::default(),
            targets: Vec::new(),
        }
    }
}

impl FanoutSettings {
    pub fn enabled_targets(&self) -> impl Iterator<Item = &OutputTarget> {
        self.targets.iter().filter(|t| t.enabled)
    }

    pub fn validate(&self) -> Result<()> {
        if self.input.trim().is_empty() {
            return Err(FanoutError::InvalidTarget {
                name: "input".to_string(),
                reason: "input URI is empty".to_string(),
            });
        }

        let mut names = HashSet::new();
        for target in &self.targets {
            target.validate()?;
            if !names.insert(target.name.as_str()) {
                return Err(target.invalid("name is used by more than one target"));
            }
        }
        Ok(())
    }
}
