//! Encoder command lines, one per output target.
//!
//! ```text
//! <encoder> -y -i <input>  <video clause>  <audio clause>  <format clause>  <destination>
//!                          -c:v copy       -c:a copy       -f flv
//!                          -c:v libx264    -c:a aac        -f rtsp -rtsp_flags listen
//!                          -preset veryfast -b:a <rate>
//!                          [-b:v <rate>]
//! ```

use crate::types::OutputTarget;

pub const VIDEO_CODEC: &str = "libx264";
pub const VIDEO_PRESET: &str = "veryfast";
pub const AUDIO_CODEC: &str = "aac";
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";

const MASK: &str = "****";

/// Build the encoder argument list for `target`, reading from `input`.
pub fn build(target: &OutputTarget, input: &str) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into(), "-i".into(), input.into()];

    if target.transcode || target.video_bitrate.is_some() || target.listen {
        args.extend(["-c:v", VIDEO_CODEC, "-preset", VIDEO_PRESET].map(String::from));
        if let Some(bitrate) = &target.video_bitrate {
            args.push("-b:v".into());
            args.push(bitrate.clone());
        }
    } else {
        args.extend(["-c:v", "copy"].map(String::from));
    }

    if target.transcode || target.audio_bitrate.is_some() || target.listen {
        let bitrate = target.audio_bitrate.as_deref().unwrap_or(DEFAULT_AUDIO_BITRATE);
        args.extend(["-c:a", AUDIO_CODEC, "-b:a", bitrate].map(String::from));
    } else {
        args.extend(["-c:a", "copy"].map(String::from));
    }

    if target.listen {
        args.extend(["-f", "rtsp", "-rtsp_flags", "listen"].map(String::from));
    } else {
        args.extend(["-f", "flv"].map(String::from));
    }

    args.push(target.destination.clone());
    args
}

/// A fully resolved encoder invocation for one target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamJob {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    // push destinations carry the stream key in their last path segment
    mask_destination: bool,
}

impl StreamJob {
    /// `program` is used unless the target names its own encoder.
    pub fn new(target: &OutputTarget, input: &str, program: &str) -> Self {
        Self {
            name: target.name.clone(),
            program: target.encoder.as_deref().unwrap_or(program).to_string(),
            args: build(target, input),
            mask_destination: !target.listen,
        }
    }

    /// Job for an arbitrary command line; nothing is masked in logs.
    pub fn from_parts(name: &str, program: &str, args: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            args,
            mask_destination: false,
        }
    }

    /// Command line for logs, with the stream key hidden.
    pub fn display_args(&self) -> String {
        let last = self.args.len().saturating_sub(1);
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        for (i, arg) in self.args.iter().enumerate() {
            if i == last && self.mask_destination {
                parts.push(mask_stream_key(arg));
            } else {
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }
}

/// `rtmp://live.twitch.tv/app/KEY` -> `rtmp://live.twitch.tv/app/****`
pub fn mask_stream_key(uri: &str) -> String {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_string();
    };
    match rest.rfind('/') {
        Some(idx) if idx + 1 < rest.len() => format!("{}://{}/{}", scheme, &rest[..idx], MASK),
        _ => uri.to_string(),
    }
}
