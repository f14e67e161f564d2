//! Top-level render loop (spec §4.8): owns the song, the per-channel DSP
//! state, the sequencer, and the reverb bus, and renders interleaved stereo
//! audio one control tick (8 samples) at a time.

use log::debug;

use crate::config::EngineConfig;
use crate::quantize::{quantize, SampleFormat};
use crate::sequencer::player::{Player, SAMPLES_PER_CONTROL_TICK};
use crate::sequencer::song::{Song, CHANNEL_COUNT};
use crate::synth::channel::Channel;
use crate::synth::reverb::Reverb;
use crate::synth::wavetable::WavetableSet;

/// How quickly a channel's pan glides toward its destination, in control
/// ticks (spec §4.3's `Channel::glide_pan` caller contract).
const PAN_TRANSITION_SPEED: f32 = 20.0;

/// Owns everything needed to render a [`Song`] to audio: the shared
/// wavetables, per-channel DSP state, the sequencer, and the reverb bus.
pub struct Engine {
    song: Song,
    tables: WavetableSet,
    channels: [Channel; CHANNEL_COUNT],
    player: Player,
    reverb: Reverb,
    config: EngineConfig,
    /// Output master volume, independent of the song's own `global_volume`
    /// byte — a host-side fader, not tracker state. Defaults flat at 1.0.
    playback_volume: f32,
}

impl Engine {
    pub fn new(song: Song, config: EngineConfig) -> Self {
        let tables = WavetableSet::new(config.sample_rate);
        let player = Player::new(&song, &tables, config.sample_rate);
        let reverb = Reverb::new(
            config.sample_rate_ratio(),
            config.reverb_room_size,
            config.reverb_length,
        );
        debug!(
            "engine constructed: {} patterns, {} instruments, sample_rate={}",
            song.patterns.len(),
            song.instruments.len(),
            config.sample_rate
        );
        Self {
            song,
            tables,
            channels: Default::default(),
            player,
            reverb,
            config,
            playback_volume: 1.0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Sets the host-side master volume fader (1.0 = unity).
    pub fn set_playback_volume(&mut self, playback_volume: f32) {
        self.playback_volume = playback_volume;
    }

    /// Whether the sequencer is still advancing (a non-looping song reached
    /// its end, or `Player::looping` was exhausted).
    pub fn is_playing(&self) -> bool {
        self.player.playing
    }

    pub fn set_looping(&mut self, looping: i32) {
        self.player.looping = looping;
    }

    /// Renders `frame_count` stereo frames into `out_l`/`out_r`, both of
    /// which must have length `frame_count`. Runs the sequencer's control
    /// tick every [`SAMPLES_PER_CONTROL_TICK`] samples and the per-operator
    /// tick/update once per control tick, matching the spec's render loop.
    pub fn render(&mut self, out_l: &mut [f32], out_r: &mut [f32]) {
        assert_eq!(out_l.len(), out_r.len());
        let mut produced = 0;
        while produced < out_l.len() {
            self.control_tick();
            let remaining = out_l.len() - produced;
            let batch = remaining.min(SAMPLES_PER_CONTROL_TICK as usize);
            for i in 0..batch {
                let (l, r) = self.render_one_sample();
                out_l[produced + i] = l;
                out_r[produced + i] = r;
            }
            produced += batch;
        }
    }

    /// Same as [`Engine::render`], but quantizes the result to `format` and
    /// appends interleaved stereo bytes to `out`.
    pub fn render_quantized(
        &mut self,
        frame_count: usize,
        format: SampleFormat,
        pad32: bool,
        out: &mut Vec<u8>,
    ) {
        let mut left = vec![0.0f32; frame_count];
        let mut right = vec![0.0f32; frame_count];
        self.render(&mut left, &mut right);
        out.reserve(frame_count * format.bytes_per_sample() * 2);
        for (l, r) in left.iter().zip(right.iter()) {
            quantize(*l, format, pad32, out);
            quantize(*r, format, pad32, out);
        }
    }

    fn control_tick(&mut self) {
        self.player
            .control_tick(&self.song, &mut self.channels, &self.tables, self.config.sample_rate);

        if let Some(length) = self.player.pending_reverb_length.take() {
            self.reverb.set_length(length);
        }
        if let Some(room_size) = self.player.pending_room_size.take() {
            self.reverb
                .reinit(self.config.sample_rate_ratio(), room_size, self.song.reverb_length);
        }

        for channel in &mut self.channels {
            channel.tick(PAN_TRANSITION_SPEED);
            channel.update_operators(&self.tables, SAMPLES_PER_CONTROL_TICK);
        }
    }

    fn render_one_sample(&mut self) -> (f32, f32) {
        let mut dry_l = 0.0f32;
        let mut dry_r = 0.0f32;
        let mut send_l = 0.0f32;
        let mut send_r = 0.0f32;

        for channel in &mut self.channels {
            let (l, r) = channel.render_sample(&self.tables);
            dry_l += l;
            dry_r += r;
            send_l += l * channel.reverb_send;
            send_r += r * channel.reverb_send;
        }

        let (wet_l, wet_r) = self.reverb.process(send_l, send_r);

        let master = self.player.global_volume * self.playback_volume;
        ((dry_l + wet_l) * master, (dry_r + wet_r) * master)
    }
}
