//! Drives the core in real time: steps the CPU a frame's worth of cycles,
//! refreshes the VDP once per frame, keeps the PSG's audio ring fed, and
//! presents through SDL2 (§5's frame-pacing/audio-pull contract).
//!
//! No CRU keyboard-matrix device is part of this core's module list (§1's
//! module table stops at Speech/Cassette), so there is no machine input to
//! route keystrokes to — the only interactive control is closing the
//! window or pressing Escape.

use sdl2::event::Event;
use sdl2::keyboard::Scancode;

use ti99_core::machine::Machine;
use ti99_core::vdp::{VDP_HEIGHT, VDP_WIDTH};

use crate::audio;
use crate::overlay;
use crate::video::Video;

/// Approximate TMS9900 clock rate, used only for frame cycle budgeting —
/// the core itself is cycle-counted but not wall-clock-synchronized.
const CPU_CLOCK_HZ: u32 = 3_000_000;
const SAMPLE_RATE: u32 = 44_100;
const VDP_INTERRUPT_LEVEL: u8 = 1;

/// Standard TMS9918A 16-color RGB palette (index 0 doubles as the
/// transparent/backdrop color).
const PALETTE: [[u8; 3]; 16] = [
    [0, 0, 0],
    [0, 0, 0],
    [33, 200, 66],
    [94, 220, 120],
    [84, 85, 237],
    [125, 118, 252],
    [212, 82, 77],
    [66, 235, 245],
    [252, 85, 84],
    [255, 121, 120],
    [212, 193, 84],
    [230, 206, 128],
    [33, 176, 59],
    [201, 91, 186],
    [204, 204, 204],
    [255, 255, 255],
];

pub fn run(machine: &mut Machine, title: &str, refresh_hz: u32) {
    let sdl_context = sdl2::init().expect("Failed to initialize SDL2");
    let sdl_video = sdl_context.video().expect("Failed to init SDL video");
    let sdl_audio = sdl_context.audio().expect("Failed to init SDL audio");
    let mut event_pump = sdl_context.event_pump().expect("Failed to get event pump");

    let mut video = Video::new(&sdl_video, title, VDP_WIDTH as u32, VDP_HEIGHT as u32, 3);
    let sound = audio::init(&sdl_audio, SAMPLE_RATE);
    if let Some((device, _, _)) = &sound {
        device.resume();
    }

    let cycles_per_frame = (CPU_CLOCK_HZ / refresh_hz) as u64;
    let samples_per_frame = (SAMPLE_RATE / refresh_hz) as usize;

    let mut rgb = vec![0u8; VDP_WIDTH * VDP_HEIGHT * 3];
    let mut pcm = vec![0u8; samples_per_frame];

    let mut frames = 0u32;
    let mut fps_text = String::from("--");
    let mut fps_clock = std::time::Instant::now();

    'main: loop {
        for event in event_pump.poll_iter() {
            match event {
                Event::Quit { .. } => break 'main,
                Event::KeyDown { scancode: Some(Scancode::Escape), .. } => break 'main,
                _ => {}
            }
        }

        machine.cpu.clear_interrupt(VDP_INTERRUPT_LEVEL);
        let target = machine.cpu.clock_count() + cycles_per_frame;
        while machine.cpu.clock_count() < target {
            if !machine.cpu.step() {
                break;
            }
        }

        if machine.vdp().interrupt_pending() {
            machine.cpu.signal_interrupt(VDP_INTERRUPT_LEVEL);
        }

        if let Some(indices) = machine.vdp_mut().refresh(false) {
            for (i, &index) in indices.iter().enumerate() {
                rgb[i * 3..i * 3 + 3].copy_from_slice(&PALETTE[(index & 0x0F) as usize]);
            }
            overlay::draw_fps(&mut rgb, VDP_WIDTH, &fps_text);
            video.present(&rgb);
        }

        if let Some((_, ring, _)) = &sound {
            machine.psg_mut().fill(&mut pcm);
            let mut buf = ring.lock().unwrap();
            buf.extend(pcm.iter().map(|&s| (s as i16 - 128) << 8));
        }

        frames += 1;
        let elapsed = fps_clock.elapsed();
        if elapsed.as_secs_f64() >= 1.0 {
            fps_text = format!("{:.1}", frames as f64 / elapsed.as_secs_f64());
            frames = 0;
            fps_clock = std::time::Instant::now();
        }
    }

    if let Some((_, _, fade_out)) = &sound {
        fade_out.store(true, std::sync::atomic::Ordering::Relaxed);
        std::thread::sleep(audio::fade_out_duration());
    }
}
