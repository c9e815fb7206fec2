//! The `devices` command: list capture devices for the active backend.

use anyhow::Result;

use crate::audio::capture::BackendKind;
use crate::audio::cpal_capture;
use crate::config::Settings;

pub fn handle_devices_command(settings: Settings) -> Result<()> {
    match settings.audio_backend {
        BackendKind::Cpal => print_device_table()?,
        BackendKind::Ffmpeg => print_ffmpeg_instructions(&settings.ffmpeg_binary),
        BackendKind::Synthetic => {
            println!("Synthetic backend. Device specs:");
            println!("  sine:<hz>?seconds=&rate=&channels=");
            println!("  ramp:?seconds=&rate=");
            println!("  silence:?seconds=");
        }
    }
    Ok(())
}

fn print_device_table() -> Result<()> {
    let devices = cpal_capture::list_devices()?;
    if devices.is_empty() {
        println!("No input devices detected. Ensure audio hardware is accessible.");
        return Ok(());
    }

    let header = format!(
        "{:>3} | {:<40} | {:>2} | {:>7} | Loopback",
        "ID", "Name", "Ch", "Rate"
    );
    println!("{header}");
    println!("{}", "-".repeat(header.len()));
    for device in devices {
        println!(
            "{:>3} | {:<40.40} | {:>2} | {:>7} | {:>8}",
            device.id,
            device.label,
            device.max_channels,
            device.default_sample_rate,
            if device.is_loopback { "yes" } else { "no" },
        );
    }
    Ok(())
}

/// FFmpeg cannot enumerate devices through a pipe; point the user at the
/// discovery commands instead.
fn print_ffmpeg_instructions(binary: &str) {
    for line in [
        "FFmpeg backend is active. Provide a capture specification for each channel.",
        "The format follows: <input-format>:<input-target>?option=value&...",
        "Examples:",
        "  pulse:bluez_source.XX?sample_rate=48000&channels=2",
        "  dshow:audio=Bluetooth Headset?sample_rate=48000&channels=1",
        "  avfoundation:0?channels=1",
        "Additional FFmpeg arguments can be provided with opt_/flag_ parameters.",
        "Set CONFAB_AUDIO_BACKEND=cpal to use the native capture backend instead.",
    ] {
        println!("{line}");
    }
    println!();
    println!("Discover devices with:");
    println!("  Windows: {binary} -hide_banner -list_devices true -f dshow -i dummy");
    println!("  macOS:   {binary} -hide_banner -list_devices true -f avfoundation -i \"\"");
    println!("  Linux:   {binary} -hide_banner -sources pulse");
}
