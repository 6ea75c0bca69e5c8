use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use ffmpeg_fanout::{FanoutSettings, OutputTarget};
use serde::Deserialize;

const CONFIG_ENV: &str = "FANOUT_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "fanout.json";

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    streaming: bool,
    #[serde(flatten)]
    fanout: FanoutSettings,
}

impl FanoutConfig {
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.fanout.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Master switch; nothing is started when false.
    pub fn streaming(&self) -> bool {
        self.streaming
    }

    pub fn fanout(&self) -> &FanoutSettings {
        &self.fanout
    }

    pub fn into_fanout(self) -> FanoutSettings {
        self.fanout
    }
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            streaming: true,
            fanout: FanoutSettings {
                targets: default_targets(),
                ..Default::default()
            },
        }
    }
}

/// The outputs a fresh install streams to. Stream keys are placeholders.
fn default_targets() -> Vec<OutputTarget> {
    vec![
        OutputTarget::new("twitch", "rtmp://live.twitch.tv/app/YOUR_TWITCH_KEY")
            .with_bitrates("6000k", "160k"),
        OutputTarget::new("kick", "rtmp://live.kick.com/app/YOUR_KICK_KEY")
            .with_bitrates("6000k", "160k"),
        OutputTarget::new("vlc", "rtmp://127.0.0.1:1935/live/vlc")
            .with_bitrates("4000k", "128k")
            .with_transcode(),
        OutputTarget::new("vrchat", "rtsp://0.0.0.0:8554/vrchat")
            .with_bitrates("4000k", "128k")
            .with_transcode()
            .with_listen(),
    ]
}

/// Load from `$FANOUT_CONFIG`, else `fanout.json` when present, else defaults.
pub fn load() -> anyhow::Result<FanoutConfig> {
    if let Some(path) = env::var_os(CONFIG_ENV) {
        return FanoutConfig::from_file(&PathBuf::from(path));
    }

    let path = Path::new(DEFAULT_CONFIG_PATH);
    if path.exists() {
        FanoutConfig::from_file(path)
    } else {
        log::warn!(
            "Config: {} not found, using built-in outputs",
            DEFAULT_CONFIG_PATH
        );
        Ok(FanoutConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use ffmpeg_fanout::ShutdownMode;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = FanoutConfig::default();
        config.fanout().validate().unwrap();
        assert!(config.streaming());

        let names: Vec<_> = config.fanout().targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["twitch", "kick", "vlc", "vrchat"]);
        assert!(config.fanout().targets[3].listen);
    }

    #[test]
    fn test_from_json_full() {
        let config = FanoutConfig::from_json(
            r#"{
                "streaming": true,
                "input": "rtmp://192.168.0.113:1935/live/stream",
                "encoder": "/usr/local/bin/ffmpeg",
                "tag_output": false,
                "shutdown": { "mode": "sequential", "grace_period_ms": 1000 },
                "targets": [
                    { "name": "twitch", "destination": "rtmp://live.twitch.tv/app/k",
                      "video_bitrate": "6000k", "audio_bitrate": "160k" },
                    { "name": "vrchat", "enabled": false,
                      "destination": "rtsp://0.0.0.0:8554/vrchat",
                      "transcode": true, "listen": true }
                ]
            }"#,
        )
        .unwrap();

        let fanout = config.into_fanout();
        assert_eq!(fanout.input, "rtmp://192.168.0.113:1935/live/stream");
        assert_eq!(fanout.encoder, "/usr/local/bin/ffmpeg");
        assert!(!fanout.tag_output);
        assert_eq!(fanout.shutdown.mode, ShutdownMode::Sequential);
        assert_eq!(fanout.shutdown.grace_period_ms, Some(1000));
        assert_eq!(fanout.targets.len(), 2);
        assert!(fanout.targets[0].enabled);
        assert_eq!(fanout.targets[0].video_bitrate.as_deref(), Some("6000k"));
        assert!(!fanout.targets[1].enabled);
        assert!(fanout.targets[1].listen);
    }

    #[test]
    fn test_from_json_minimal_uses_defaults() {
        let config = FanoutConfig::from_json(
            r#"{ "targets": [ { "name": "kick", "destination": "rtmp://live.kick.com/app/k" } ] }"#,
        )
        .unwrap();
        assert!(config.streaming());
        assert_eq!(config.fanout().encoder, "ffmpeg");
        assert!(config.fanout().tag_output);
        assert_eq!(config.fanout().shutdown.grace_period_ms, Some(5_000));
        assert_eq!(config.fanout().targets.len(), 1);
    }

    #[test]
    fn test_streaming_switch_off() {
        let config = FanoutConfig::from_json(r#"{ "streaming": false }"#).unwrap();
        assert!(!config.streaming());
    }

    #[test]
    fn test_invalid_target_is_rejected() {
        let err = FanoutConfig::from_json(
            r#"{ "targets": [ { "name": "vrchat", "destination": "rtmp://h/live", "listen": true } ] }"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("vrchat"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fanout.json");
        fs::write(
            &path,
            r#"{ "input": "rtmp://10.0.0.5/live/in", "targets": [] }"#,
        )
        .unwrap();

        let config = FanoutConfig::from_file(&path).unwrap();
        assert_eq!(config.fanout().input, "rtmp://10.0.0.5/live/in");
        assert!(config.fanout().targets.is_empty());

        let missing = FanoutConfig::from_file(&dir.path().join("missing.json")).unwrap_err();
        assert!(format!("{:#}", missing).contains("reading config"));
    }
}
