//! Parsing of subprocess-backend device specifications.
//!
//! The form is `<format>:<target>?key=value&...`, e.g.
//! `pulse:bluez_source.XX?sample_rate=48000&channels=2` or
//! `dshow:audio=Headset Microphone?sample_fmt=s16le`. Query keys map to
//! encoder invocation flags. Malformed specs fail with
//! `InvalidDeviceSpec` before any recording starts.

use crate::error::{RecorderError, Result};

/// Raw PCM sample layout requested on the encoder's output pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    F32le,
    S16le,
    S32le,
}

impl SampleFormat {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "f32le" => Ok(Self::F32le),
            "s16le" => Ok(Self::S16le),
            "s32le" => Ok(Self::S32le),
            other => Err(RecorderError::InvalidDeviceSpec(format!(
                "output format must be one of f32le, s16le, s32le (got '{other}')"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::F32le => "f32le",
            Self::S16le => "s16le",
            Self::S32le => "s32le",
        }
    }

    pub fn codec(&self) -> &'static str {
        match self {
            Self::F32le => "pcm_f32le",
            Self::S16le => "pcm_s16le",
            Self::S32le => "pcm_s32le",
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::F32le => 4,
            Self::S16le => 2,
            Self::S32le => 4,
        }
    }

    /// Divisor mapping raw integer samples onto [-1.0, 1.0].
    pub fn scale(&self) -> f32 {
        match self {
            Self::F32le => 1.0,
            Self::S16le => 32768.0,
            Self::S32le => 2_147_483_648.0,
        }
    }
}

/// Parsed representation of an encoder capture target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    pub input_format: String,
    pub input_target: String,
    pub args_before_input: Vec<String>,
    pub args_after_input: Vec<String>,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
    pub chunk_frames: Option<usize>,
}

/// Parse a device specification, filling unset fields from the session
/// defaults.
pub fn parse_device_spec(
    device: &str,
    default_sample_rate: u32,
    default_channels: u16,
) -> Result<DeviceSpec> {
    let trimmed = device.trim();
    if trimmed.is_empty() {
        return Err(RecorderError::InvalidDeviceSpec(
            "subprocess backend requires a device specification".to_string(),
        ));
    }

    let (base, query) = match trimmed.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (trimmed, None),
    };

    let (input_format, input_target) = match split_scheme(base) {
        Some(parts) => parts,
        None => match guess_device_target(base) {
            Some(guessed) => {
                tracing::debug!("Normalised device specification '{}' -> '{}'", base, guessed);
                split_scheme(&guessed).ok_or_else(|| {
                    RecorderError::InvalidDeviceSpec(format!(
                        "could not normalise device target '{base}'"
                    ))
                })?
            }
            None => {
                return Err(RecorderError::InvalidDeviceSpec(
                    "device specification must start with an input format, for example \
                     'pulse:bluez_source.XX' or 'dshow:audio=Device'"
                        .to_string(),
                ))
            }
        },
    };

    if input_target.is_empty() {
        return Err(RecorderError::InvalidDeviceSpec(
            "device specification must include a device identifier".to_string(),
        ));
    }

    let mut spec = DeviceSpec {
        input_format,
        input_target,
        args_before_input: Vec::new(),
        args_after_input: Vec::new(),
        sample_rate: default_sample_rate,
        channels: default_channels,
        sample_format: SampleFormat::F32le,
        chunk_frames: None,
    };

    let mut pending_chunk_ms: Option<f64> = None;

    for (key, value) in parse_query(query.unwrap_or("")) {
        match key.as_str() {
            "" => continue,
            "sample_rate" if !value.is_empty() => {
                spec.sample_rate = parse_number(&value, "sample_rate")?;
            }
            "channels" if !value.is_empty() => {
                spec.channels = parse_number(&value, "channels")?;
            }
            "sample_fmt" if !value.is_empty() => {
                spec.sample_format = SampleFormat::parse(&value)?;
            }
            "chunk_frames" if !value.is_empty() => {
                let frames: usize = parse_number(&value, "chunk_frames")?;
                spec.chunk_frames = Some(frames.max(1));
            }
            "chunk_ms" if !value.is_empty() => {
                let ms: f64 = value.parse().map_err(|_| {
                    RecorderError::InvalidDeviceSpec(format!("invalid chunk_ms: {value}"))
                })?;
                pending_chunk_ms = Some(ms.max(0.0));
            }
            "args" if !value.is_empty() => {
                spec.args_before_input
                    .extend(value.split_whitespace().map(str::to_string));
            }
            "out_args" if !value.is_empty() => {
                spec.args_after_input
                    .extend(value.split_whitespace().map(str::to_string));
            }
            _ if key.starts_with("opt_") => {
                spec.args_before_input.push(option_flag(&key[4..]));
                if !value.is_empty() {
                    spec.args_before_input.push(value);
                }
            }
            _ if key.starts_with("flag_") => {
                spec.args_before_input.push(option_flag(&key[5..]));
            }
            _ if key.starts_with("out_opt_") => {
                spec.args_after_input.push(option_flag(&key[8..]));
                if !value.is_empty() {
                    spec.args_after_input.push(value);
                }
            }
            _ if key.starts_with("out_flag_") => {
                spec.args_after_input.push(option_flag(&key[9..]));
            }
            // A known key with an empty value keeps its default.
            "sample_rate" | "channels" | "sample_fmt" | "chunk_frames" | "chunk_ms" | "args"
            | "out_args" => {}
            other => {
                return Err(RecorderError::InvalidDeviceSpec(format!(
                    "unknown device option: {other}"
                )))
            }
        }
    }

    if spec.sample_rate == 0 {
        return Err(RecorderError::InvalidDeviceSpec(
            "sample_rate must be a positive integer".to_string(),
        ));
    }
    if spec.channels == 0 {
        return Err(RecorderError::InvalidDeviceSpec(
            "channels must be a positive integer".to_string(),
        ));
    }

    if spec.chunk_frames.is_none() {
        if let Some(ms) = pending_chunk_ms {
            let frames = (spec.sample_rate as f64 * ms / 1000.0) as usize;
            spec.chunk_frames = Some(frames.max(1));
        }
    }

    Ok(spec)
}

fn split_scheme(base: &str) -> Option<(String, String)> {
    let (scheme, target) = base.split_once(':')?;
    if scheme.is_empty() {
        return None;
    }
    // A single-letter scheme on Windows is a drive prefix, not a format.
    if cfg!(windows) && scheme.len() == 1 {
        return None;
    }
    Some((scheme.to_string(), target.trim().to_string()))
}

/// Best-effort scheme for targets the user typed without one.
fn guess_device_target(base: &str) -> Option<String> {
    let trimmed = base.trim();
    if trimmed.is_empty() {
        return None;
    }

    if cfg!(target_os = "linux") {
        return Some(format!("pulse:{trimmed}"));
    }
    if cfg!(target_os = "macos") {
        if trimmed.chars().all(|c| c.is_ascii_digit()) {
            return Some(format!("avfoundation:{trimmed}"));
        }
        return None;
    }
    if cfg!(windows) {
        let name = trimmed.strip_prefix("audio=").unwrap_or(trimmed);
        return Some(format!("dshow:audio={}", quote_dshow_name(name)));
    }
    None
}

fn quote_dshow_name(name: &str) -> String {
    let trimmed = name.trim().trim_matches('"');
    format!("\"{}\"", trimmed.replace('"', "\\\""))
}

fn option_flag(key: &str) -> String {
    format!("-{}", key.replace('_', "-"))
}

fn parse_number<T: std::str::FromStr>(value: &str, key: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| RecorderError::InvalidDeviceSpec(format!("invalid {key}: {value}")))
}

/// Split a query string into decoded key/value pairs.
fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (percent_decode(key), percent_decode(value)),
            None => (percent_decode(pair), String::new()),
        })
        .collect()
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
                match u8::from_str_radix(hex, 16) {
                    Ok(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    Err(_) => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_spec() {
        let spec = parse_device_spec(
            "pulse:bluez_source.AA?sample_rate=48000&channels=2&sample_fmt=s16le",
            16_000,
            1,
        )
        .unwrap();
        assert_eq!(spec.input_format, "pulse");
        assert_eq!(spec.input_target, "bluez_source.AA");
        assert_eq!(spec.sample_rate, 48_000);
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_format, SampleFormat::S16le);
    }

    #[test]
    fn defaults_fill_unset_fields() {
        let spec = parse_device_spec("pulse:default", 16_000, 1).unwrap();
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_format, SampleFormat::F32le);
        assert!(spec.chunk_frames.is_none());
    }

    #[test]
    fn chunk_ms_converts_to_frames() {
        let spec = parse_device_spec("pulse:default?chunk_ms=250", 16_000, 1).unwrap();
        assert_eq!(spec.chunk_frames, Some(4_000));
    }

    #[test]
    fn explicit_chunk_frames_wins_over_chunk_ms() {
        let spec =
            parse_device_spec("pulse:default?chunk_frames=512&chunk_ms=250", 16_000, 1).unwrap();
        assert_eq!(spec.chunk_frames, Some(512));
    }

    #[test]
    fn opt_and_flag_keys_expand_to_arguments() {
        let spec = parse_device_spec(
            "pulse:default?opt_fragment_size=960&flag_re&out_opt_af=volume=2.0",
            16_000,
            1,
        )
        .unwrap();
        assert_eq!(
            spec.args_before_input,
            vec!["-fragment-size".to_string(), "960".to_string(), "-re".to_string()]
        );
        assert_eq!(
            spec.args_after_input,
            vec!["-af".to_string(), "volume=2.0".to_string()]
        );
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = parse_device_spec("pulse:default?bogus=1", 16_000, 1).unwrap_err();
        assert!(matches!(err, RecorderError::InvalidDeviceSpec(_)));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        for spec in [
            "pulse:default?sample_rate=abc",
            "pulse:default?channels=x",
            "pulse:default?chunk_frames=1.5",
        ] {
            let err = parse_device_spec(spec, 16_000, 1).unwrap_err();
            assert!(matches!(err, RecorderError::InvalidDeviceSpec(_)), "{spec}");
        }
    }

    #[test]
    fn zero_rate_or_channels_is_rejected() {
        assert!(parse_device_spec("pulse:default?sample_rate=0", 16_000, 1).is_err());
        assert!(parse_device_spec("pulse:default?channels=0", 16_000, 1).is_err());
    }

    #[test]
    fn empty_spec_is_rejected() {
        assert!(parse_device_spec("", 16_000, 1).is_err());
        assert!(parse_device_spec("pulse:", 16_000, 1).is_err());
    }

    #[test]
    fn unsupported_sample_fmt_is_rejected() {
        let err = parse_device_spec("pulse:default?sample_fmt=u8", 16_000, 1).unwrap_err();
        assert!(matches!(err, RecorderError::InvalidDeviceSpec(_)));
    }

    #[test]
    fn target_keeps_literal_spaces() {
        let spec =
            parse_device_spec("dshow:audio=Headset Microphone?channels=1", 16_000, 1).unwrap();
        assert_eq!(spec.input_target, "audio=Headset Microphone");
        assert_eq!(spec.channels, 1);
    }

    #[test]
    fn query_values_are_percent_decoded() {
        let spec = parse_device_spec("pulse:default?opt_filter=a%20b+c", 16_000, 1).unwrap();
        assert_eq!(
            spec.args_before_input,
            vec!["-filter".to_string(), "a b c".to_string()]
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn bare_target_guesses_pulse_on_linux() {
        let spec = parse_device_spec("bluez_source.AA?channels=2", 16_000, 1).unwrap();
        assert_eq!(spec.input_format, "pulse");
        assert_eq!(spec.input_target, "bluez_source.AA");
        assert_eq!(spec.channels, 2);
    }
}
